//! kubeadm configuration generation
//!
//! Produces the per-host kubeadm config files staged as
//! `cfg/master_<index>.yaml`: the leader gets an init configuration, the other
//! control-plane hosts a join configuration pointing at the API endpoint.

use crate::BootstrapError;
use crate::addons::combine_manifests;
use crate::config::{ClusterConfig, HostConfig};
use serde_json::{Value, json};
use tracing::debug;

/// kubeadm config API generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KubeadmApi {
    /// Kubernetes 1.12
    V1Alpha3,
    /// Kubernetes 1.13 - 1.14
    V1Beta1,
    /// Kubernetes 1.15 - 1.21
    V1Beta2,
    /// Kubernetes 1.22+
    V1Beta3,
}

impl KubeadmApi {
    /// Select the config API for a Kubernetes version such as `1.13.5` or `v1.12.0`
    pub fn for_version(version: &str) -> Result<Self, BootstrapError> {
        let (major, minor) = parse_version(version)?;
        match (major, minor) {
            (1, 12) => Ok(Self::V1Alpha3),
            (1, 13..=14) => Ok(Self::V1Beta1),
            (1, 15..=21) => Ok(Self::V1Beta2),
            (1, 22..) => Ok(Self::V1Beta3),
            _ => Err(BootstrapError::UnsupportedVersion(version.to_string())),
        }
    }

    pub fn api_version(&self) -> &'static str {
        match self {
            Self::V1Alpha3 => "kubeadm.k8s.io/v1alpha3",
            Self::V1Beta1 => "kubeadm.k8s.io/v1beta1",
            Self::V1Beta2 => "kubeadm.k8s.io/v1beta2",
            Self::V1Beta3 => "kubeadm.k8s.io/v1beta3",
        }
    }

    /// Command installing the kube-proxy addon from a config file
    pub fn kube_proxy_command(&self, config_path: &str) -> String {
        let phase = match self {
            Self::V1Alpha3 => "alpha phase",
            _ => "init phase",
        };
        format!("sudo kubeadm {} addon kube-proxy --config={}", phase, config_path)
    }
}

fn parse_version(version: &str) -> Result<(u32, u32), BootstrapError> {
    let unsupported = || BootstrapError::UnsupportedVersion(version.to_string());
    let mut parts = version.trim().trim_start_matches('v').split('.');

    let major = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(unsupported)?;
    let minor = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(unsupported)?;

    Ok((major, minor))
}

/// Generates kubeadm configs for one cluster
pub struct Kubeadm<'a> {
    api: KubeadmApi,
    cluster: &'a ClusterConfig,
    token: &'a str,
}

impl<'a> Kubeadm<'a> {
    pub fn new(cluster: &'a ClusterConfig, token: &'a str) -> Result<Self, BootstrapError> {
        Ok(Self {
            api: KubeadmApi::for_version(&cluster.versions.kubernetes)?,
            cluster,
            token,
        })
    }

    pub fn api(&self) -> KubeadmApi {
        self.api
    }

    /// Config for one control-plane host
    pub fn config(&self, host: &HostConfig) -> Result<String, BootstrapError> {
        let leader = self.cluster.leader()?;
        let documents = if host.index == leader.index {
            vec![self.init_configuration(host), self.cluster_configuration()?]
        } else {
            vec![self.join_configuration(host)?]
        };

        let yaml = documents
            .iter()
            .map(serde_yaml::to_string)
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Generated kubeadm {} config for {}", self.api.api_version(), host);
        Ok(combine_manifests(&yaml))
    }

    fn node_registration(&self, host: &HostConfig) -> Value {
        json!({
            "name": host.node_name(),
            "kubeletExtraArgs": {
                "node-ip": host.internal_address(),
            },
        })
    }

    fn local_endpoint(&self, host: &HostConfig) -> Value {
        json!({
            "advertiseAddress": host.internal_address(),
            "bindPort": crate::config::DEFAULT_API_PORT,
        })
    }

    fn init_configuration(&self, host: &HostConfig) -> Value {
        let endpoint_key = match self.api {
            KubeadmApi::V1Alpha3 => "apiEndpoint",
            _ => "localAPIEndpoint",
        };
        json!({
            "apiVersion": self.api.api_version(),
            "kind": "InitConfiguration",
            "bootstrapTokens": [{
                "token": self.token,
                "ttl": "1h",
            }],
            "nodeRegistration": self.node_registration(host),
            endpoint_key: self.local_endpoint(host),
        })
    }

    fn cluster_configuration(&self) -> Result<Value, BootstrapError> {
        let endpoint = self.cluster.api_endpoint()?;
        let mut sans: Vec<&str> = vec![endpoint.host.as_str()];
        for host in self.cluster.control_plane_hosts() {
            for address in [host.public_address.as_str(), host.internal_address()] {
                if !sans.contains(&address) {
                    sans.push(address);
                }
            }
        }

        let mut config = json!({
            "apiVersion": self.api.api_version(),
            "kind": "ClusterConfiguration",
            "clusterName": self.cluster.name,
            "kubernetesVersion": format!("v{}", self.cluster.versions.kubernetes.trim_start_matches('v')),
            "controlPlaneEndpoint": endpoint.to_string(),
            "networking": {
                "podSubnet": self.cluster.network.pod_subnet,
                "serviceSubnet": self.cluster.network.service_subnet,
            },
        });

        if self.api == KubeadmApi::V1Alpha3 {
            config["apiServerCertSANs"] = json!(sans);
        } else {
            config["apiServer"] = json!({ "certSANs": sans });
        }
        Ok(config)
    }

    fn join_configuration(&self, host: &HostConfig) -> Result<Value, BootstrapError> {
        let endpoint = self.cluster.api_endpoint()?.to_string();

        let config = match self.api {
            KubeadmApi::V1Alpha3 => json!({
                "apiVersion": self.api.api_version(),
                "kind": "JoinConfiguration",
                "controlPlane": true,
                "apiEndpoint": self.local_endpoint(host),
                "token": self.token,
                "discoveryTokenAPIServers": [endpoint],
                "discoveryTokenUnsafeSkipCAVerification": true,
                "nodeRegistration": self.node_registration(host),
            }),
            _ => json!({
                "apiVersion": self.api.api_version(),
                "kind": "JoinConfiguration",
                "controlPlane": {
                    "localAPIEndpoint": self.local_endpoint(host),
                },
                "discovery": {
                    "bootstrapToken": {
                        "token": self.token,
                        "apiServerEndpoint": endpoint,
                        "unsafeSkipCAVerification": true,
                    },
                },
                "nodeRegistration": self.node_registration(host),
            }),
        };
        Ok(config)
    }
}

/// Staging path of the kubeadm config for the host at `index`
pub fn config_path(index: usize) -> String {
    format!("cfg/master_{}.yaml", index)
}
