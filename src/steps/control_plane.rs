//! Control-plane bring-up
//!
//! The leader is initialized first. Its certificate authorities are then
//! copied into the configuration set, pushed to the other control-plane hosts
//! and installed there before they join.

use super::remote_kubeadm_config;
use crate::BootstrapError;
use crate::config::HostConfig;
use crate::state::State;
use crate::transport::{Connection, shell_quote};
use futures::future::BoxFuture;
use tracing::{debug, info};

/// Remote PKI directory managed by kubeadm
pub const KUBERNETES_PKI_DIR: &str = "/etc/kubernetes/pki";

/// Staging directory of the downloaded certificate authorities
pub const PKI_STAGING_DIR: &str = "pki";

/// Files shared between control-plane hosts, relative to the PKI directory
pub const CA_FILES: &[&str] = &[
    "ca.crt",
    "ca.key",
    "sa.key",
    "sa.pub",
    "front-proxy-ca.crt",
    "front-proxy-ca.key",
    "etcd/ca.crt",
    "etcd/ca.key",
];

const SETUP_KUBECONFIG: &str = "mkdir -p $HOME/.kube && \
    sudo cp -f /etc/kubernetes/admin.conf $HOME/.kube/config && \
    sudo chown $(id -u):$(id -g) $HOME/.kube/config";

pub async fn init_leader(state: &State) -> Result<(), BootstrapError> {
    info!("Initializing Kubernetes on leader…");
    state.run_task_on_leader(init_leader_on_node).await
}

fn init_leader_on_node<'a>(
    state: &'a State,
    host: &'a HostConfig,
    conn: &'a mut dyn Connection,
) -> BoxFuture<'a, Result<(), BootstrapError>> {
    Box::pin(async move {
        let config = remote_kubeadm_config(state, host.index);
        conn.run(&format!("sudo kubeadm init --config={}", config))
            .await?;
        conn.run(SETUP_KUBECONFIG).await?;
        Ok(())
    })
}

/// Read the leader's certificate authorities into the configuration set
pub async fn download_ca(state: &mut State) -> Result<(), BootstrapError> {
    info!("Downloading PKI files…");
    let leader = state.cluster.leader()?.clone();

    let mut files = Vec::with_capacity(CA_FILES.len());
    {
        let mut guard = state.connect(&leader).await?;
        let conn = guard.connection();
        for file in CA_FILES {
            let remote = format!("{}/{}", KUBERNETES_PKI_DIR, file);
            let content = conn.run(&format!("sudo cat {}", shell_quote(&remote))).await?;
            debug!("Downloaded {} ({} bytes)", remote, content.len());
            files.push((format!("{}/{}", PKI_STAGING_DIR, file), content));
        }
    }

    for (path, content) in files {
        state.configuration.add(path, content);
    }
    Ok(())
}

pub async fn deploy_ca(state: &State) -> Result<(), BootstrapError> {
    info!("Deploying PKI…");
    state.run_task_on_followers(deploy_ca_on_node, true).await
}

fn deploy_ca_on_node<'a>(
    state: &'a State,
    _: &'a HostConfig,
    conn: &'a mut dyn Connection,
) -> BoxFuture<'a, Result<(), BootstrapError>> {
    Box::pin(async move {
        state.configuration.upload_to(conn, &state.work_dir).await?;

        let staged = state.remote_path(PKI_STAGING_DIR);
        let command = format!(
            "sudo mkdir -p {pki}/etcd && \
             sudo cp -r {staged}/. {pki}/ && \
             sudo sh -c 'chmod 600 {pki}/*.key {pki}/etcd/*.key'",
            pki = KUBERNETES_PKI_DIR,
            staged = staged,
        );
        conn.run(&command).await?;
        Ok(())
    })
}

/// Join the followers one at a time
pub async fn join_control_plane(state: &State) -> Result<(), BootstrapError> {
    info!("Joining control plane nodes…");
    state
        .run_task_on_followers(join_control_plane_on_node, false)
        .await
}

fn join_control_plane_on_node<'a>(
    state: &'a State,
    host: &'a HostConfig,
    conn: &'a mut dyn Connection,
) -> BoxFuture<'a, Result<(), BootstrapError>> {
    Box::pin(async move {
        info!("Joining {} to the control plane", host);
        let config = remote_kubeadm_config(state, host.index);
        conn.run(&format!("sudo kubeadm join --config={}", config))
            .await?;
        conn.run(SETUP_KUBECONFIG).await?;
        Ok(())
    })
}
