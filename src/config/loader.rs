//! Cluster config loader

use super::ClusterConfig;
use crate::BootstrapError;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

/// Load a cluster config file, resolving a relative addons path against the
/// directory of the config file
pub async fn load_cluster_config(path: impl AsRef<Path>) -> Result<ClusterConfig, BootstrapError> {
    let path = path.as_ref();

    let content = fs::read_to_string(path)
        .await
        .map_err(|source| BootstrapError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let mut config = ClusterConfig::from_yaml(&content)?;

    if config.addons.path.is_relative() {
        if let Some(base) = path.parent() {
            config.addons.path = base.join(&config.addons.path);
            debug!("Resolved addons path to {}", config.addons.path.display());
        }
    }

    info!(
        "Loaded cluster '{}' with {} hosts from {}",
        config.name,
        config.hosts.len(),
        path.display()
    );
    Ok(config)
}
