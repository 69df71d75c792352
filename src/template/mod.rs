//! Jinja2-compatible template rendering
//!
//! Renders addon manifests and provisioning scripts against the cluster
//! description. Undefined variables are errors: a template that references a
//! field the cluster config does not have fails to render instead of silently
//! producing an empty string.

pub mod context;

pub use context::{CLUSTER_KEY, TemplateVars};

use crate::config::ClusterConfig;
use minijinja::{AutoEscape, Environment, UndefinedBehavior, Value};
use tracing::trace;

/// Template renderer bound to one variable context
pub struct TemplateRenderer {
    env: Environment<'static>,
    context: Value,
}

impl TemplateRenderer {
    /// Create a renderer over an arbitrary context value
    pub fn new(context: Value) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        // manifests and scripts are emitted verbatim
        env.set_auto_escape_callback(|_| AutoEscape::None);
        Self { env, context }
    }

    /// Create a renderer exposing the cluster under [`CLUSTER_KEY`]
    pub fn for_cluster(cluster: &ClusterConfig) -> Self {
        Self::new(TemplateVars::new(cluster).to_value())
    }

    /// Create a renderer from template variables
    pub fn with_vars(vars: &TemplateVars<'_>) -> Self {
        Self::new(vars.to_value())
    }

    /// Render a template string; `name` appears in error messages
    pub fn render(&self, name: &str, source: &str) -> Result<String, minijinja::Error> {
        trace!("Rendering template {}", name);
        self.env.render_named_str(name, source, &self.context)
    }

    /// Render a template with extra variables layered over the base context
    pub fn render_with(
        &self,
        name: &str,
        source: &str,
        extra: Value,
    ) -> Result<String, minijinja::Error> {
        let ctx = minijinja::context! { ..extra, ..self.context.clone() };
        self.env.render_named_str(name, source, ctx)
    }
}
