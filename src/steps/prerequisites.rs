//! Host preparation

use super::templates::PREREQUISITES_SCRIPT;
use crate::BootstrapError;
use crate::config::HostConfig;
use crate::state::State;
use crate::template::TemplateRenderer;
use crate::transport::Connection;
use futures::future::BoxFuture;
use minijinja::context;
use tracing::info;

pub async fn install_prerequisites(state: &State) -> Result<(), BootstrapError> {
    info!("Installing prerequisites…");
    state
        .run_task_on_all_hosts(install_prerequisites_on_node, true)
        .await
}

/// Render the provisioning script for this run
pub fn prerequisites_script(state: &State) -> Result<String, BootstrapError> {
    let renderer = TemplateRenderer::for_cluster(&state.cluster);
    renderer
        .render_with(
            "prerequisites.sh",
            PREREQUISITES_SCRIPT,
            context! {
                kubernetes_version => state.cluster.versions.kubernetes.trim_start_matches('v'),
                work_dir => state.work_dir,
            },
        )
        .map_err(|e| BootstrapError::template("prerequisites.sh", e))
}

fn install_prerequisites_on_node<'a>(
    state: &'a State,
    host: &'a HostConfig,
    conn: &'a mut dyn Connection,
) -> BoxFuture<'a, Result<(), BootstrapError>> {
    Box::pin(async move {
        let script = prerequisites_script(state)?;
        info!("Installing kubeadm on {}", host);
        conn.run(&script).await?;
        Ok(())
    })
}
