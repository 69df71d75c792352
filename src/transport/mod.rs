//! Remote-shell transport
//!
//! A [`Connector`] opens a [`Connection`] to one host. Connections are owned
//! by exactly one host task at a time and released through
//! [`ConnectionGuard`] when that task ends, however it ends.

pub mod mock;
pub mod openssh;

use crate::BootstrapError;
use crate::config::HostConfig;
use async_trait::async_trait;
use tracing::debug;

/// Result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// A live session to one host
#[async_trait]
pub trait Connection: Send {
    /// Display name of the remote end, used in error messages
    fn target(&self) -> &str;

    /// Execute a shell command on the host
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, BootstrapError>;

    /// Write `content` to `remote_path`, creating parent directories
    async fn upload(&mut self, remote_path: &str, content: &[u8]) -> Result<(), BootstrapError>;

    /// Release the session. Must be safe to call more than once.
    fn close(&mut self) {}

    /// Execute a command and fail on a non-zero exit status
    async fn run(&mut self, command: &str) -> Result<String, BootstrapError> {
        debug!("[{}] $ {}", self.target(), command);
        let output = self.exec(command).await?;
        if !output.success() {
            return Err(BootstrapError::Command {
                host: self.target().to_string(),
                command: command.to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

/// Opens connections to hosts
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &HostConfig) -> Result<Box<dyn Connection>, BootstrapError>;
}

/// Connector for runs that must not reach any host
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineConnector;

#[async_trait]
impl Connector for OfflineConnector {
    async fn connect(&self, host: &HostConfig) -> Result<Box<dyn Connection>, BootstrapError> {
        Err(BootstrapError::connection(host, "offline run, no connections allowed"))
    }
}

/// Owns a connection for one scope and closes it on drop
pub struct ConnectionGuard {
    host: String,
    conn: Box<dyn Connection>,
}

impl ConnectionGuard {
    /// Open a connection to `host`
    pub async fn acquire(
        connector: &dyn Connector,
        host: &HostConfig,
    ) -> Result<Self, BootstrapError> {
        debug!("Connecting to {}", host);
        let conn = connector.connect(host).await?;
        Ok(Self {
            host: host.to_string(),
            conn,
        })
    }

    pub fn connection(&mut self) -> &mut dyn Connection {
        self.conn.as_mut()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        debug!("Releasing connection to {}", self.host);
        self.conn.close();
    }
}

/// Quote a string for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
