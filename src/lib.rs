//! clusterboot library
//!
//! Bootstraps a kubeadm-based Kubernetes cluster on a set of SSH-reachable
//! hosts.
//!
//! # Design Principles
//!
//! - **Safety First**: No unsafe code (`#![forbid(unsafe_code)]`)
//! - **Ordered steps**: The bootstrap is a fixed list of steps; the first
//!   failure stops the run and names the step
//! - **Isolated hosts**: A task failing on one host never stops the same task
//!   on the others
//! - **Declarative addons**: User manifests are templated, labelled and
//!   applied with pruning

pub mod addons;
pub mod config;
pub mod configset;
pub mod kubeadm;
pub mod pipeline;
pub mod runner;
pub mod state;
pub mod steps;
pub mod template;
pub mod transport;

mod error;

pub use error::{BootstrapError, HostFailure, HostFailures};
pub use state::State;
pub use steps::Step;

use std::path::Path;
use tracing::info;

/// Run the full bootstrap against the hosts of `state`
pub async fn install(state: &mut State) -> Result<(), BootstrapError> {
    run_steps(state, &Step::ALL).await
}

/// Run the specified steps in order
pub async fn run_steps(state: &mut State, steps: &[Step]) -> Result<(), BootstrapError> {
    info!(
        "Bootstrapping cluster {} ({} hosts)",
        state.cluster.name,
        state.cluster.hosts.len()
    );
    let mut pipeline = steps::pipeline(steps);
    pipeline.run(state).await?;
    info!("Cluster {} is ready", state.cluster.name);
    Ok(())
}

/// Generate every configuration file without contacting any host
pub async fn generate(state: &mut State, output: impl AsRef<Path>) -> Result<(), BootstrapError> {
    let output = output.as_ref();
    steps::configuration::generate_files(state).await?;
    if state.cluster.machine_controller.deploy {
        let manifest = steps::components::machine_controller_manifest(state)?;
        state
            .configuration
            .add(steps::components::MACHINE_CONTROLLER_STAGING, manifest);
    }
    if !state.cluster.workers.is_empty() {
        let manifest = steps::workers::machine_deployments_manifest(&state.cluster)?;
        state
            .configuration
            .add(steps::workers::WORKERS_STAGING, manifest);
    }

    state.configuration.write_to_dir(output).await?;
    info!(
        "Wrote {} files to {}",
        state.configuration.len(),
        output.display()
    );
    Ok(())
}
