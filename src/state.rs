//! Run state shared by every bootstrap step

use crate::BootstrapError;
use crate::config::{ClusterConfig, HostConfig};
use crate::configset::{ConfigFileSet, remote_path};
use crate::transport::{ConnectionGuard, Connector};
use std::sync::Arc;
use uuid::Uuid;

/// Default remote working directory, relative to the SSH user's home
pub const DEFAULT_WORK_DIR: &str = "clusterboot";

/// State of one bootstrap run
///
/// Steps mutate the state only from sequential code; host tasks get a shared
/// reference.
pub struct State {
    /// Cluster description, fixed for the run
    pub cluster: ClusterConfig,
    /// Files generated during the run, uploaded to hosts by later steps
    pub configuration: ConfigFileSet,
    /// Remote working directory
    pub work_dir: String,
    pub verbose: bool,
    pub connector: Arc<dyn Connector>,
    /// Token used by control-plane hosts to join the leader
    pub bootstrap_token: String,
    /// Worker join command issued by the last step
    pub join_command: Option<String>,
}

impl State {
    pub fn new(cluster: ClusterConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            cluster,
            configuration: ConfigFileSet::new(),
            work_dir: DEFAULT_WORK_DIR.to_string(),
            verbose: false,
            connector,
            bootstrap_token: generate_bootstrap_token(),
            join_command: None,
        }
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<String>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Remote location of a staged file
    pub fn remote_path(&self, relative: &str) -> String {
        remote_path(&self.work_dir, relative)
    }

    /// Open a scoped connection to one host
    pub async fn connect(&self, host: &HostConfig) -> Result<ConnectionGuard, BootstrapError> {
        ConnectionGuard::acquire(self.connector.as_ref(), host).await
    }
}

/// Generate a kubeadm bootstrap token (`[a-z0-9]{6}.[a-z0-9]{16}`)
pub fn generate_bootstrap_token() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}.{}", &hex[..6], &hex[6..22])
}
