//! OpenSSH transport
//!
//! Drives the system `ssh` client. Each connection starts a control master
//! with its own socket; commands and uploads are multiplexed over it and the
//! master is stopped when the connection is closed.

use super::{CommandOutput, Connection, Connector, shell_quote};
use crate::BootstrapError;
use crate::config::HostConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default SSH connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 30;

/// Connector backed by the `ssh` binary
#[derive(Debug, Clone)]
pub struct OpenSshConnector {
    ssh_binary: PathBuf,
    connect_timeout: u64,
    socket_dir: PathBuf,
}

impl Default for OpenSshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenSshConnector {
    pub fn new() -> Self {
        Self {
            ssh_binary: PathBuf::from("ssh"),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            socket_dir: std::env::temp_dir(),
        }
    }

    /// Use a different `ssh` executable
    pub fn with_ssh_binary(mut self, path: impl AsRef<Path>) -> Self {
        self.ssh_binary = path.as_ref().to_path_buf();
        self
    }

    pub fn with_connect_timeout(mut self, seconds: u64) -> Self {
        self.connect_timeout = seconds;
        self
    }

    fn base_args(&self, host: &HostConfig) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout),
            "-p".to_string(),
            host.ssh_port.to_string(),
        ];
        if let Some(key) = &host.ssh_private_key_file {
            args.push("-i".to_string());
            args.push(expand_home(key).to_string_lossy().into_owned());
        }
        args
    }
}

#[async_trait]
impl Connector for OpenSshConnector {
    async fn connect(&self, host: &HostConfig) -> Result<Box<dyn Connection>, BootstrapError> {
        let socket = self
            .socket_dir
            .join(format!("clusterboot-{}.sock", Uuid::new_v4().simple()));
        let destination = format!("{}@{}", host.ssh_username, host.public_address);
        let base_args = self.base_args(host);

        debug!("Starting SSH control master for {}", destination);
        let output = Command::new(&self.ssh_binary)
            .args(&base_args)
            .arg("-M")
            .arg("-S")
            .arg(&socket)
            .arg("-fN")
            .arg(&destination)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| BootstrapError::connection(host, e.to_string()))?;

        if !output.status.success() {
            return Err(BootstrapError::connection(
                host,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(Box::new(OpenSshConnection {
            target: host.to_string(),
            ssh_binary: self.ssh_binary.clone(),
            base_args,
            socket,
            destination,
            closed: false,
        }))
    }
}

/// One multiplexed SSH session
pub struct OpenSshConnection {
    target: String,
    ssh_binary: PathBuf,
    base_args: Vec<String>,
    socket: PathBuf,
    destination: String,
    closed: bool,
}

impl OpenSshConnection {
    fn command(&self, remote: &str) -> Command {
        let mut cmd = Command::new(&self.ssh_binary);
        cmd.args(&self.base_args)
            .arg("-S")
            .arg(&self.socket)
            .arg(&self.destination)
            .arg("--")
            .arg(remote);
        cmd
    }
}

#[async_trait]
impl Connection for OpenSshConnection {
    fn target(&self) -> &str {
        &self.target
    }

    async fn exec(&mut self, command: &str) -> Result<CommandOutput, BootstrapError> {
        let output = self
            .command(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| BootstrapError::connection(&self.target, e.to_string()))?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn upload(&mut self, remote_path: &str, content: &[u8]) -> Result<(), BootstrapError> {
        let dir = remote_path.rsplit_once('/').map(|(d, _)| d).unwrap_or(".");
        let remote = format!(
            "mkdir -p {} && cat > {}",
            shell_quote(dir),
            shell_quote(remote_path)
        );

        let mut child = self
            .command(&remote)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BootstrapError::connection(&self.target, e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(content)
                .await
                .map_err(|e| BootstrapError::connection(&self.target, e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BootstrapError::connection(&self.target, e.to_string()))?;

        if !output.status.success() {
            return Err(BootstrapError::connection(
                &self.target,
                format!(
                    "writing {} failed: {}",
                    remote_path,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut exit = std::process::Command::new(&self.ssh_binary);
        exit.arg("-S")
            .arg(&self.socket)
            .args(["-O", "exit"])
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let target = self.target.clone();
        let socket = self.socket.clone();

        // close runs from Drop inside host futures; it must not block them
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let mut exit = Command::from(exit);
                handle.spawn(async move {
                    if let Err(e) = exit.status().await {
                        warn!("Failed to stop SSH control master for {}: {}", target, e);
                    }
                    let _ = tokio::fs::remove_file(&socket).await;
                });
            }
            Err(_) => {
                if let Err(e) = exit.status() {
                    warn!("Failed to stop SSH control master for {}: {}", target, e);
                }
                let _ = std::fs::remove_file(&socket);
            }
        }
    }
}

impl Drop for OpenSshConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Expand a leading `~/` to the user's home directory
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home() {
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_home(Path::new("~/.ssh/id_rsa")),
                PathBuf::from(home).join(".ssh/id_rsa")
            );
        }
        assert_eq!(
            expand_home(Path::new("/etc/key")),
            PathBuf::from("/etc/key")
        );
    }

    #[test]
    fn test_base_args() {
        let connector = OpenSshConnector::new().with_connect_timeout(5);
        let host = HostConfig {
            public_address: "10.0.0.1".into(),
            ssh_port: 2222,
            ssh_private_key_file: Some(PathBuf::from("/keys/id")),
            ..Default::default()
        };

        let args = connector.base_args(&host);
        assert!(args.contains(&"ConnectTimeout=5".to_string()));
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/keys/id"]));
    }

    fn connection(socket: PathBuf) -> OpenSshConnection {
        OpenSshConnection {
            target: "host #0 (10.0.0.1)".into(),
            ssh_binary: PathBuf::from("/nonexistent/ssh"),
            base_args: Vec::new(),
            socket,
            destination: "root@10.0.0.1".into(),
            closed: false,
        }
    }

    #[tokio::test]
    async fn test_close_in_runtime_does_not_wait() {
        let dir = tempfile::TempDir::new().unwrap();
        let socket = dir.path().join("ctl.sock");
        std::fs::write(&socket, b"").unwrap();

        let mut conn = connection(socket.clone());
        conn.close();
        assert!(conn.closed);
        conn.close();

        for _ in 0..100 {
            if !socket.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(!socket.exists());
    }

    #[test]
    fn test_close_without_runtime() {
        let dir = tempfile::TempDir::new().unwrap();
        let socket = dir.path().join("ctl.sock");
        std::fs::write(&socket, b"").unwrap();

        drop(connection(socket.clone()));
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_connect_failure_reported() {
        let connector = OpenSshConnector::new().with_ssh_binary("/nonexistent/ssh");
        let host = HostConfig {
            public_address: "10.0.0.1".into(),
            ..Default::default()
        };

        let err = match connector.connect(&host).await {
            Ok(_) => panic!("connect should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, BootstrapError::Connection { .. }));
    }
}
