//! Cluster addons
//!
//! Addons are user-supplied manifests rendered against the cluster
//! description, labelled, combined into a single file and applied with
//! `kubectl apply --prune` scoped to the addon label.

pub mod manifest;

pub use manifest::{
    ADDON_LABEL, DOCUMENT_SEPARATOR, RawResourceDocument, combine_manifests, ensure_addons_labels,
    load_addons_manifests, split_documents,
};

use crate::BootstrapError;
use crate::config::{ClusterConfig, HostConfig};
use crate::state::State;
use crate::template::TemplateVars;
use crate::transport::Connection;
use futures::future::BoxFuture;
use tracing::info;

/// Staging path of the combined addons manifest
pub const ADDONS_MANIFEST: &str = "addons/addons.yaml";

/// Load, label and combine every addon manifest of the cluster
pub async fn build_addons_manifest(
    cluster: &ClusterConfig,
    verbose: bool,
) -> Result<String, BootstrapError> {
    let vars = TemplateVars::new(cluster);
    let manifests = load_addons_manifests(&cluster.addons.path, verbose, &vars).await?;
    info!("Loaded {} addon resources", manifests.len());

    let labelled = ensure_addons_labels(manifests)?;
    Ok(combine_manifests(&labelled))
}

/// Stage the combined addons manifest when addons are enabled
pub async fn ensure_addons(state: &mut State) -> Result<(), BootstrapError> {
    if !state.cluster.addons.enable {
        return Ok(());
    }

    let combined = build_addons_manifest(&state.cluster, state.verbose).await?;
    state.configuration.add(ADDONS_MANIFEST, combined);
    Ok(())
}

/// True if a combined manifest holds no documents
pub fn is_empty_manifest(manifest: &[u8]) -> bool {
    String::from_utf8_lossy(manifest).trim().is_empty()
}

/// Apply the staged addons manifest on the leader, pruning stale addon resources
pub async fn apply_addons(state: &State) -> Result<(), BootstrapError> {
    match state.configuration.get(ADDONS_MANIFEST) {
        None => {
            info!("Addons are disabled. Skipping.");
            return Ok(());
        }
        Some(manifest) if is_empty_manifest(manifest) => {
            info!("Addons manifest is empty. Nothing to apply.");
            return Ok(());
        }
        Some(_) => {}
    }

    info!("Applying addons…");
    state.run_task_on_leader(apply_addons_on_leader).await
}

fn apply_addons_on_leader<'a>(
    state: &'a State,
    _: &'a HostConfig,
    conn: &'a mut dyn Connection,
) -> BoxFuture<'a, Result<(), BootstrapError>> {
    Box::pin(async move {
        let command = format!(
            "sudo kubectl --kubeconfig=/etc/kubernetes/admin.conf apply --prune -l {} -f {}",
            ADDON_LABEL,
            state.remote_path(ADDONS_MANIFEST)
        );
        conn.run(&command).await?;
        Ok(())
    })
}
