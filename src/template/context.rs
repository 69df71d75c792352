//! Template variable context
//!
//! Templates see exactly one top-level variable, `Cluster`, holding the
//! serialized cluster configuration.

use crate::config::ClusterConfig;
use minijinja::Value;
use serde::Serialize;

/// Name of the top-level template variable
pub const CLUSTER_KEY: &str = "Cluster";

/// Variables available to addon templates
#[derive(Debug, Clone, Serialize)]
pub struct TemplateVars<'a> {
    #[serde(rename = "Cluster")]
    pub cluster: &'a ClusterConfig,
}

impl<'a> TemplateVars<'a> {
    pub fn new(cluster: &'a ClusterConfig) -> Self {
        Self { cluster }
    }

    /// Convert into a template context value
    pub fn to_value(&self) -> Value {
        Value::from_serialize(self)
    }
}
