//! In-memory staging area for generated files
//!
//! Files are collected here while the run generates them and then pushed to
//! each host's working directory in one go.

use crate::BootstrapError;
use crate::transport::Connection;
use indexmap::IndexMap;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Ordered mapping of relative path to file content
#[derive(Debug, Clone, Default)]
pub struct ConfigFileSet {
    files: IndexMap<String, Vec<u8>>,
}

impl ConfigFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, replacing any previous content at the same path
    pub fn add(&mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        let path = path.into();
        debug!("Staging file {}", path);
        self.files.insert(path, content.into());
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Upload every file below `remote_dir` on the given connection.
    ///
    /// Stops at the first failed transfer. Files uploaded before the failure
    /// stay in place; uploading again overwrites them.
    pub async fn upload_to(
        &self,
        conn: &mut dyn Connection,
        remote_dir: &str,
    ) -> Result<(), BootstrapError> {
        for (path, content) in &self.files {
            let remote_path = remote_path(remote_dir, path);
            debug!("Uploading {} ({} bytes)", remote_path, content.len());
            conn.upload(&remote_path, content)
                .await
                .map_err(|e| BootstrapError::Upload {
                    path: path.clone(),
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }

    /// Write every file below a local directory
    pub async fn write_to_dir(&self, dir: impl AsRef<Path>) -> Result<(), BootstrapError> {
        let dir = dir.as_ref();
        for (path, content) in &self.files {
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&target, content).await?;
        }
        Ok(())
    }
}

/// Join a remote directory and a relative path with a single `/`
pub fn remote_path(remote_dir: &str, path: &str) -> String {
    let dir = remote_dir.trim_end_matches('/');
    if dir.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", dir, path.trim_start_matches('/'))
    }
}
