//! Error types for clusterboot

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for clusterboot operations
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to template manifest {file}: {message}")]
    Template { file: String, message: String },

    #[error("Failed to decode manifest {file}: {message}")]
    Decode { file: String, message: String },

    #[error("Invalid resource document: {0}")]
    Manifest(String),

    #[error("Connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    #[error("Command `{command}` on {host} exited with status {status}: {stderr}")]
    Command {
        host: String,
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("Failed to upload '{path}': {source}")]
    Upload {
        path: String,
        source: Box<BootstrapError>,
    },

    #[error("Task on {host} terminated unexpectedly")]
    TaskPanicked { host: String },

    #[error("{0}")]
    Hosts(HostFailures),

    #[error("Step '{step}' failed: {source}")]
    Step {
        step: String,
        source: Box<BootstrapError>,
    },

    #[error("Unsupported Kubernetes version: {0}")]
    UnsupportedVersion(String),
}

impl BootstrapError {
    /// Create a connection error
    pub fn connection(host: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::Connection {
            host: host.to_string(),
            message: message.into(),
        }
    }

    /// Create a template error for a named file
    pub fn template(file: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Template {
            file: file.into(),
            message: message.to_string(),
        }
    }

    /// Create a decode error for a named file
    pub fn decode(file: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Decode {
            file: file.into(),
            message: message.to_string(),
        }
    }

    /// Wrap an error with the name of the step that produced it
    pub fn step(step: impl Into<String>, source: BootstrapError) -> Self {
        Self::Step {
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Name of the failed step, if this error came out of the pipeline
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            Self::Step { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Per-host failures carried by this error, looking through a step wrapper
    pub fn host_failures(&self) -> Option<&HostFailures> {
        match self {
            Self::Hosts(failures) => Some(failures),
            Self::Step { source, .. } => source.host_failures(),
            _ => None,
        }
    }
}

/// One host whose task failed during a dispatch
#[derive(Debug)]
pub struct HostFailure {
    /// Position of the host in the cluster host list
    pub index: usize,
    /// Display name of the host
    pub host: String,
    pub error: BootstrapError,
}

/// Aggregate of every host that failed during one dispatch
#[derive(Debug, Default)]
pub struct HostFailures(pub Vec<HostFailure>);

impl HostFailures {
    /// Indices of the failed hosts, in dispatch order
    pub fn indices(&self) -> Vec<usize> {
        self.0.iter().map(|f| f.index).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for HostFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} host(s) failed", self.0.len())?;
        for failure in &self.0 {
            write!(f, "; {}: {}", failure.host, failure.error)?;
        }
        Ok(())
    }
}
