//! In-cluster components installed from the leader

use super::remote_kubeadm_config;
use super::templates::MACHINE_CONTROLLER_MANIFEST;
use crate::BootstrapError;
use crate::config::{Cni, HostConfig};
use crate::kubeadm::KubeadmApi;
use crate::state::State;
use crate::template::TemplateRenderer;
use crate::transport::Connection;
use futures::future::BoxFuture;
use tracing::info;

/// Staging path of the rendered machine-controller manifest
pub const MACHINE_CONTROLLER_STAGING: &str = "machine-controller/machine-controller.yaml";

pub const FLANNEL_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/coreos/flannel/v0.11.0/Documentation/kube-flannel.yml";

const KUBECTL: &str = "sudo kubectl --kubeconfig=/etc/kubernetes/admin.conf";

pub async fn install_kube_proxy(state: &State) -> Result<(), BootstrapError> {
    info!("Installing kube-proxy…");
    state.run_task_on_leader(install_kube_proxy_on_node).await
}

fn install_kube_proxy_on_node<'a>(
    state: &'a State,
    host: &'a HostConfig,
    conn: &'a mut dyn Connection,
) -> BoxFuture<'a, Result<(), BootstrapError>> {
    Box::pin(async move {
        let api = KubeadmApi::for_version(&state.cluster.versions.kubernetes)?;
        let config = remote_kubeadm_config(state, host.index);
        conn.run(&api.kube_proxy_command(&config)).await?;
        Ok(())
    })
}

/// Render the machine-controller manifest for this cluster
pub fn machine_controller_manifest(state: &State) -> Result<String, BootstrapError> {
    TemplateRenderer::for_cluster(&state.cluster)
        .render("machine-controller.yaml", MACHINE_CONTROLLER_MANIFEST)
        .map_err(|e| BootstrapError::template("machine-controller.yaml", e))
}

pub async fn install_machine_controller(state: &mut State) -> Result<(), BootstrapError> {
    if !state.cluster.machine_controller.deploy {
        info!("machine-controller deployment is disabled. Skipping.");
        return Ok(());
    }

    info!("Installing machine-controller…");
    let manifest = machine_controller_manifest(state)?;
    state
        .configuration
        .add(MACHINE_CONTROLLER_STAGING, manifest);
    state
        .run_task_on_leader(install_machine_controller_on_node)
        .await
}

fn install_machine_controller_on_node<'a>(
    state: &'a State,
    _: &'a HostConfig,
    conn: &'a mut dyn Connection,
) -> BoxFuture<'a, Result<(), BootstrapError>> {
    Box::pin(async move { upload_and_apply(state, conn, MACHINE_CONTROLLER_STAGING).await })
}

/// Upload one staged file to the connected host and `kubectl apply` it
pub(crate) async fn upload_and_apply(
    state: &State,
    conn: &mut dyn Connection,
    staged: &str,
) -> Result<(), BootstrapError> {
    let content = state
        .configuration
        .get(staged)
        .ok_or_else(|| BootstrapError::Manifest(format!("{} was never generated", staged)))?;

    let remote = state.remote_path(staged);
    conn.upload(&remote, content)
        .await
        .map_err(|e| BootstrapError::Upload {
            path: staged.to_string(),
            source: Box::new(e),
        })?;
    conn.run(&format!("{} apply -f {}", KUBECTL, remote)).await?;
    Ok(())
}

/// Manifest URL of a CNI plugin, `None` when installed out of band
pub fn cni_manifest_url(cni: Cni, kubernetes_version: &str) -> Option<String> {
    match cni {
        Cni::Flannel => Some(FLANNEL_MANIFEST_URL.to_string()),
        Cni::Weave => Some(format!(
            "https://cloud.weave.works/k8s/net?k8s-version=v{}",
            kubernetes_version.trim_start_matches('v')
        )),
        Cni::External => None,
    }
}

pub async fn apply_cni(state: &State) -> Result<(), BootstrapError> {
    let cni = state.cluster.network.cni;
    if cni == Cni::External {
        info!("CNI is managed externally. Skipping.");
        return Ok(());
    }

    info!("Applying {} CNI plugin…", cni);
    state.run_task_on_leader(apply_cni_on_node).await
}

fn apply_cni_on_node<'a>(
    state: &'a State,
    _: &'a HostConfig,
    conn: &'a mut dyn Connection,
) -> BoxFuture<'a, Result<(), BootstrapError>> {
    Box::pin(async move {
        let cluster = &state.cluster;
        if let Some(url) = cni_manifest_url(cluster.network.cni, &cluster.versions.kubernetes) {
            conn.run(&format!("{} apply -f '{}'", KUBECTL, url)).await?;
        }
        Ok(())
    })
}
