//! Cluster bootstrap steps
//!
//! Steps run in this order:
//! 1. Install prerequisites - container runtime and kube packages on every host
//! 2. Generate configuration - kubeadm configs and addons, uploaded to every host
//! 3. Init leader - `kubeadm init` on the leader
//! 4. Download CA / deploy CA - share the leader's PKI with the followers
//! 5. Join control plane - `kubeadm join` on each follower
//! 6. Cluster components - kube-proxy, machine-controller, CNI and addons
//! 7. Worker machines, join token and static workers

pub mod components;
pub mod configuration;
pub mod control_plane;
pub mod prerequisites;
pub mod templates;
pub mod workers;

use crate::BootstrapError;
use crate::pipeline::{BoxedStep, PipelineStep, StepPipeline};
use crate::state::State;
use async_trait::async_trait;
use std::fmt;

/// Bootstrap steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    InstallPrerequisites,
    GenerateConfiguration,
    InitLeader,
    DownloadCa,
    DeployCa,
    JoinControlPlane,
    InstallKubeProxy,
    InstallMachineController,
    ApplyCni,
    ApplyAddons,
    CreateWorkerMachines,
    CreateJoinToken,
    JoinStaticWorkers,
}

impl Step {
    /// Every step, in execution order
    pub const ALL: [Step; 13] = [
        Step::InstallPrerequisites,
        Step::GenerateConfiguration,
        Step::InitLeader,
        Step::DownloadCa,
        Step::DeployCa,
        Step::JoinControlPlane,
        Step::InstallKubeProxy,
        Step::InstallMachineController,
        Step::ApplyCni,
        Step::ApplyAddons,
        Step::CreateWorkerMachines,
        Step::CreateJoinToken,
        Step::JoinStaticWorkers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::InstallPrerequisites => "install prerequisites",
            Step::GenerateConfiguration => "generate configuration",
            Step::InitLeader => "init leader",
            Step::DownloadCa => "download CA",
            Step::DeployCa => "deploy CA",
            Step::JoinControlPlane => "join control plane",
            Step::InstallKubeProxy => "install kube-proxy",
            Step::InstallMachineController => "install machine-controller",
            Step::ApplyCni => "apply CNI",
            Step::ApplyAddons => "apply addons",
            Step::CreateWorkerMachines => "create worker machines",
            Step::CreateJoinToken => "create join token",
            Step::JoinStaticWorkers => "join static workers",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
impl PipelineStep<State> for Step {
    fn name(&self) -> &str {
        self.as_str()
    }

    async fn run(&self, state: &mut State) -> Result<(), BootstrapError> {
        match self {
            Step::InstallPrerequisites => prerequisites::install_prerequisites(state).await,
            Step::GenerateConfiguration => configuration::generate_configuration(state).await,
            Step::InitLeader => control_plane::init_leader(state).await,
            Step::DownloadCa => control_plane::download_ca(state).await,
            Step::DeployCa => control_plane::deploy_ca(state).await,
            Step::JoinControlPlane => control_plane::join_control_plane(state).await,
            Step::InstallKubeProxy => components::install_kube_proxy(state).await,
            Step::InstallMachineController => components::install_machine_controller(state).await,
            Step::ApplyCni => components::apply_cni(state).await,
            Step::ApplyAddons => crate::addons::apply_addons(state).await,
            Step::CreateWorkerMachines => workers::create_worker_machines(state).await,
            Step::CreateJoinToken => workers::create_join_token(state).await,
            Step::JoinStaticWorkers => workers::join_static_workers(state).await,
        }
    }
}

/// Pipeline of the given steps
pub fn pipeline(steps: &[Step]) -> StepPipeline<State> {
    StepPipeline::new(
        steps
            .iter()
            .map(|step| Box::new(*step) as BoxedStep<State>)
            .collect(),
    )
}

/// The full bootstrap pipeline
pub fn bootstrap_pipeline() -> StepPipeline<State> {
    pipeline(&Step::ALL)
}

/// Staging path of a kubeadm config, resolved on the remote host
pub(crate) fn remote_kubeadm_config(state: &State, index: usize) -> String {
    state.remote_path(&crate::kubeadm::config_path(index))
}
