//! Mock transport for testing
//!
//! Records every command and upload per host and can be configured to fail
//! connections, commands or uploads.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{CommandOutput, Connection, Connector};
use crate::BootstrapError;
use crate::config::HostConfig;

/// Mock connector for testing
///
/// # Example
/// ```
/// use clusterboot::transport::mock::MockConnector;
///
/// let mock = MockConnector::new()
///     .with_response("kubeadm token create", "kubeadm join 10.0.0.1:6443 --token abc\n")
///     .with_failing_command(Some(2), "apt-get");
/// ```
#[derive(Clone, Default)]
pub struct MockConnector {
    behavior: Arc<Behavior>,
    log: Arc<Mutex<Log>>,
}

#[derive(Clone, Default)]
struct Behavior {
    unreachable: Vec<usize>,
    /// (host filter, command substring)
    failing_commands: Vec<(Option<usize>, String)>,
    panicking_commands: Vec<(Option<usize>, String)>,
    failing_uploads: Vec<String>,
    responses: Vec<(String, String)>,
}

#[derive(Default)]
struct Log {
    commands: Vec<(usize, String)>,
    uploads: Vec<(usize, String, Vec<u8>)>,
    opened: usize,
    released: usize,
    active: HashMap<usize, usize>,
    max_active: HashMap<usize, usize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn behavior_mut(&mut self) -> &mut Behavior {
        Arc::make_mut(&mut self.behavior)
    }

    /// Refuse connections to the host at `index`
    pub fn with_unreachable_host(mut self, index: usize) -> Self {
        self.behavior_mut().unreachable.push(index);
        self
    }

    /// Exit with status 1 for commands containing `pattern`, on one host or all
    pub fn with_failing_command(mut self, host: Option<usize>, pattern: &str) -> Self {
        self.behavior_mut()
            .failing_commands
            .push((host, pattern.to_string()));
        self
    }

    /// Panic inside `exec` for commands containing `pattern`
    pub fn with_panicking_command(mut self, host: Option<usize>, pattern: &str) -> Self {
        self.behavior_mut()
            .panicking_commands
            .push((host, pattern.to_string()));
        self
    }

    /// Fail uploads whose remote path contains `pattern`
    pub fn with_failing_upload(mut self, pattern: &str) -> Self {
        self.behavior_mut()
            .failing_uploads
            .push(pattern.to_string());
        self
    }

    /// Return `stdout` for commands containing `pattern`
    pub fn with_response(mut self, pattern: &str, stdout: &str) -> Self {
        self.behavior_mut()
            .responses
            .push((pattern.to_string(), stdout.to_string()));
        self
    }

    fn log(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Commands run on the host at `index`, in order
    pub fn commands_for(&self, index: usize) -> Vec<String> {
        self.log()
            .commands
            .iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Every command run, with the host index, in order
    pub fn all_commands(&self) -> Vec<(usize, String)> {
        self.log().commands.clone()
    }

    /// Remote paths uploaded to the host at `index`, in order
    pub fn uploads_for(&self, index: usize) -> Vec<String> {
        self.log()
            .uploads
            .iter()
            .filter(|(i, _, _)| *i == index)
            .map(|(_, p, _)| p.clone())
            .collect()
    }

    /// Last content uploaded to `path` on the host at `index`
    pub fn uploaded_content(&self, index: usize, path: &str) -> Option<Vec<u8>> {
        self.log()
            .uploads
            .iter()
            .rev()
            .find(|(i, p, _)| *i == index && p == path)
            .map(|(_, _, c)| c.clone())
    }

    pub fn connections_opened(&self) -> usize {
        self.log().opened
    }

    pub fn connections_released(&self) -> usize {
        self.log().released
    }

    /// Highest number of simultaneously open connections seen for one host
    pub fn max_concurrent_connections(&self, index: usize) -> usize {
        self.log().max_active.get(&index).copied().unwrap_or(0)
    }
}

fn matches(filter: &[(Option<usize>, String)], index: usize, command: &str) -> bool {
    filter
        .iter()
        .any(|(host, pattern)| host.is_none_or(|h| h == index) && command.contains(pattern))
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, host: &HostConfig) -> Result<Box<dyn Connection>, BootstrapError> {
        if self.behavior.unreachable.contains(&host.index) {
            return Err(BootstrapError::connection(host, "host unreachable"));
        }

        {
            let mut log = self.log();
            log.opened += 1;
            let active = log.active.entry(host.index).or_insert(0);
            *active += 1;
            let now = *active;
            let max = log.max_active.entry(host.index).or_insert(0);
            *max = (*max).max(now);
        }

        Ok(Box::new(MockConnection {
            index: host.index,
            target: host.to_string(),
            connector: self.clone(),
            closed: false,
        }))
    }
}

/// Connection handed out by [`MockConnector`]
pub struct MockConnection {
    index: usize,
    target: String,
    connector: MockConnector,
    closed: bool,
}

#[async_trait]
impl Connection for MockConnection {
    fn target(&self) -> &str {
        &self.target
    }

    async fn exec(&mut self, command: &str) -> Result<CommandOutput, BootstrapError> {
        self.connector
            .log()
            .commands
            .push((self.index, command.to_string()));

        let behavior = &self.connector.behavior;
        if matches(&behavior.panicking_commands, self.index, command) {
            panic!("mock panic on {}: {}", self.target, command);
        }
        if matches(&behavior.failing_commands, self.index, command) {
            return Ok(CommandOutput {
                status: 1,
                stdout: String::new(),
                stderr: format!("mock failure: {}", command),
            });
        }

        let stdout = behavior
            .responses
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();

        Ok(CommandOutput {
            status: 0,
            stdout,
            stderr: String::new(),
        })
    }

    async fn upload(&mut self, remote_path: &str, content: &[u8]) -> Result<(), BootstrapError> {
        if self
            .connector
            .behavior
            .failing_uploads
            .iter()
            .any(|p| remote_path.contains(p.as_str()))
        {
            return Err(BootstrapError::connection(
                &self.target,
                format!("mock upload failure: {}", remote_path),
            ));
        }

        self.connector
            .log()
            .uploads
            .push((self.index, remote_path.to_string(), content.to_vec()));
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut log = self.connector.log();
        log.released += 1;
        if let Some(active) = log.active.get_mut(&self.index) {
            *active = active.saturating_sub(1);
        }
    }
}
