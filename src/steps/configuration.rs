//! Configuration generation and distribution

use crate::BootstrapError;
use crate::addons;
use crate::config::HostConfig;
use crate::kubeadm::{Kubeadm, config_path};
use crate::state::State;
use crate::transport::Connection;
use futures::future::BoxFuture;
use tracing::{debug, info};

/// Stage every generated file and upload the set to all hosts
pub async fn generate_configuration(state: &mut State) -> Result<(), BootstrapError> {
    info!("Generating kubeadm config files…");
    generate_files(state).await?;

    info!("Uploading config files to nodes…");
    state
        .run_task_on_all_hosts(upload_configuration_on_node, true)
        .await
}

/// Populate the configuration set without touching any host
pub async fn generate_files(state: &mut State) -> Result<(), BootstrapError> {
    let configs = {
        let kubeadm = Kubeadm::new(&state.cluster, &state.bootstrap_token)?;
        state
            .cluster
            .control_plane_hosts()
            .map(|host| -> Result<_, BootstrapError> {
                Ok((config_path(host.index), kubeadm.config(host)?))
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    for (path, config) in configs {
        debug!("Staged {}", path);
        state.configuration.add(path, config);
    }

    addons::ensure_addons(state).await
}

fn upload_configuration_on_node<'a>(
    state: &'a State,
    _: &'a HostConfig,
    conn: &'a mut dyn Connection,
) -> BoxFuture<'a, Result<(), BootstrapError>> {
    Box::pin(async move { state.configuration.upload_to(conn, &state.work_dir).await })
}
