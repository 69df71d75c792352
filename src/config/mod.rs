//! Cluster configuration parsing and types
//!
//! Describes the cluster to bootstrap: versions, hosts, networking, addons
//! and worker machines. The whole structure is exposed to addon templates
//! under the `Cluster` key.

pub mod loader;

pub use loader::load_cluster_config;

use crate::BootstrapError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

/// Default port of the Kubernetes API server
pub const DEFAULT_API_PORT: u16 = 6443;

/// Main cluster configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster name
    pub name: String,

    /// Component versions
    pub versions: VersionConfig,

    /// Control-plane and static worker hosts
    pub hosts: Vec<HostConfig>,

    /// Load-balanced API endpoint; defaults to the leader's address
    pub api_endpoint: Option<ApiEndpoint>,

    /// Cluster networking
    pub network: NetworkConfig,

    /// Addon manifests
    pub addons: AddonsConfig,

    /// Worker-lifecycle controller
    pub machine_controller: MachineControllerConfig,

    /// Worker machine sets managed by the machine-controller
    pub workers: Vec<WorkerConfig>,
}

/// Component versions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
    pub kubernetes: String,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            kubernetes: "1.13.5".to_string(),
        }
    }
}

/// Role of a host in the cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostRole {
    #[default]
    ControlPlane,
    Worker,
}

/// One target machine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Position in the host list, assigned when the config is loaded
    #[serde(skip_deserializing)]
    pub index: usize,
    /// Address used for SSH
    pub public_address: String,
    /// Address used for cluster-internal traffic
    pub private_address: Option<String>,
    /// Node name; defaults to the public address
    pub hostname: Option<String>,
    pub ssh_username: String,
    pub ssh_port: u16,
    pub ssh_private_key_file: Option<PathBuf>,
    pub role: HostRole,
    /// Marks the host that runs `kubeadm init`
    pub is_leader: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            index: 0,
            public_address: String::new(),
            private_address: None,
            hostname: None,
            ssh_username: "root".to_string(),
            ssh_port: 22,
            ssh_private_key_file: None,
            role: HostRole::ControlPlane,
            is_leader: false,
        }
    }
}

impl HostConfig {
    /// Address for cluster-internal traffic (private if set)
    pub fn internal_address(&self) -> &str {
        self.private_address
            .as_deref()
            .unwrap_or(&self.public_address)
    }

    /// Kubernetes node name
    pub fn node_name(&self) -> &str {
        self.hostname.as_deref().unwrap_or(&self.public_address)
    }

    pub fn is_control_plane(&self) -> bool {
        self.role == HostRole::ControlPlane
    }
}

impl fmt::Display for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host #{} ({})", self.index, self.public_address)
    }
}

/// API server endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEndpoint {
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

impl fmt::Display for ApiEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Pod network plugin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cni {
    #[default]
    Flannel,
    Weave,
    /// Installed out of band
    External,
}

impl fmt::Display for Cni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cni::Flannel => write!(f, "flannel"),
            Cni::Weave => write!(f, "weave"),
            Cni::External => write!(f, "external"),
        }
    }
}

/// Cluster networking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub pod_subnet: String,
    pub service_subnet: String,
    pub cni: Cni,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            // flannel's default network
            pod_subnet: "10.244.0.0/16".to_string(),
            service_subnet: "10.96.0.0/12".to_string(),
            cni: Cni::Flannel,
        }
    }
}

/// Addon manifests configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AddonsConfig {
    pub enable: bool,
    pub path: PathBuf,
}

impl Default for AddonsConfig {
    fn default() -> Self {
        Self {
            enable: false,
            path: PathBuf::from("addons"),
        }
    }
}

/// Machine-controller deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineControllerConfig {
    pub deploy: bool,
    /// Cloud provider name passed to the controller
    pub provider: String,
    pub image: String,
}

impl Default for MachineControllerConfig {
    fn default() -> Self {
        Self {
            deploy: true,
            provider: "none".to_string(),
            image: "docker.io/kubermatic/machine-controller:v1.1.0".to_string(),
        }
    }
}

/// A set of identical worker machines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub name: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Provider-specific machine spec, passed through untouched
    #[serde(default)]
    pub provider_spec: serde_yaml::Value,
}

fn default_replicas() -> u32 {
    1
}

impl ClusterConfig {
    /// Parse a cluster config from YAML, assigning host indices and validating
    pub fn from_yaml(yaml: &str) -> Result<Self, BootstrapError> {
        let mut config: ClusterConfig = serde_yaml::from_str(yaml)?;
        config.finalize();
        config.validate()?;
        Ok(config)
    }

    /// Assign each host its position in the host list
    pub fn finalize(&mut self) {
        for (index, host) in self.hosts.iter_mut().enumerate() {
            host.index = index;
        }
    }

    /// Check what the bootstrap steps rely on
    pub fn validate(&self) -> Result<(), BootstrapError> {
        if self.hosts.is_empty() {
            return Err(BootstrapError::Config("no hosts defined".into()));
        }

        let mut seen = HashSet::new();
        for host in &self.hosts {
            if host.public_address.is_empty() {
                return Err(BootstrapError::Config(format!(
                    "host #{} has no public_address",
                    host.index
                )));
            }
            if !seen.insert(host.public_address.as_str()) {
                return Err(BootstrapError::Config(format!(
                    "duplicate host address {}",
                    host.public_address
                )));
            }
        }

        let leaders = self.hosts.iter().filter(|h| h.is_leader).count();
        if leaders > 1 {
            return Err(BootstrapError::Config(format!(
                "{} hosts are marked as leader, at most one allowed",
                leaders
            )));
        }
        if self.hosts.iter().any(|h| h.is_leader && !h.is_control_plane()) {
            return Err(BootstrapError::Config(
                "the leader must be a control-plane host".into(),
            ));
        }
        if !self.hosts.iter().any(HostConfig::is_control_plane) {
            return Err(BootstrapError::Config("no control-plane hosts defined".into()));
        }

        Ok(())
    }

    /// The control-plane host that runs `kubeadm init`
    pub fn leader(&self) -> Result<&HostConfig, BootstrapError> {
        self.hosts
            .iter()
            .find(|h| h.is_leader)
            .or_else(|| self.hosts.iter().find(|h| h.is_control_plane()))
            .ok_or_else(|| BootstrapError::Config("no control-plane hosts defined".into()))
    }

    /// Control-plane hosts other than the leader
    pub fn followers(&self) -> Result<Vec<HostConfig>, BootstrapError> {
        let leader = self.leader()?.index;
        Ok(self
            .hosts
            .iter()
            .filter(|h| h.is_control_plane() && h.index != leader)
            .cloned()
            .collect())
    }

    pub fn control_plane_hosts(&self) -> impl Iterator<Item = &HostConfig> {
        self.hosts.iter().filter(|h| h.is_control_plane())
    }

    /// Hosts listed with `role: worker`, joined with the final join command
    pub fn static_workers(&self) -> Vec<HostConfig> {
        self.hosts
            .iter()
            .filter(|h| h.role == HostRole::Worker)
            .cloned()
            .collect()
    }

    /// API endpoint, falling back to the leader's internal address
    pub fn api_endpoint(&self) -> Result<ApiEndpoint, BootstrapError> {
        if let Some(endpoint) = &self.api_endpoint {
            return Ok(endpoint.clone());
        }
        Ok(ApiEndpoint {
            host: self.leader()?.internal_address().to_string(),
            port: DEFAULT_API_PORT,
        })
    }
}
