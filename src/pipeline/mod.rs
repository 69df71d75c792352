//! Sequential step execution
//!
//! A [`StepPipeline`] runs named steps one after another against a shared,
//! mutable state. The first failing step stops the run; its error is returned
//! wrapped with the step name.

use crate::BootstrapError;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{error, info};

/// One named unit of a pipeline
#[async_trait]
pub trait PipelineStep<S: Send>: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, state: &mut S) -> Result<(), BootstrapError>;
}

pub type BoxedStep<S> = Box<dyn PipelineStep<S>>;

/// Where a pipeline run currently stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    NotStarted,
    Running(String),
    Failed { step: String, error: String },
    Completed,
}

/// Timing of a finished step
#[derive(Debug, Clone)]
pub struct StepMetrics {
    pub name: String,
    pub duration_ms: u128,
}

/// An ordered list of steps
pub struct StepPipeline<S> {
    steps: Vec<BoxedStep<S>>,
    status: PipelineStatus,
    metrics: Vec<StepMetrics>,
}

impl<S: Send> StepPipeline<S> {
    pub fn new(steps: Vec<BoxedStep<S>>) -> Self {
        Self {
            steps,
            status: PipelineStatus::NotStarted,
            metrics: Vec::new(),
        }
    }

    /// Append a step to the end of the pipeline
    pub fn with_step(mut self, step: impl PipelineStep<S> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn status(&self) -> &PipelineStatus {
        &self.status
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Steps that completed in the last run, in execution order
    pub fn metrics(&self) -> &[StepMetrics] {
        &self.metrics
    }

    /// Run every step in order, stopping at the first failure.
    ///
    /// Steps after a failed one are never started. Running a pipeline again
    /// starts over from the first step.
    pub async fn run(&mut self, state: &mut S) -> Result<(), BootstrapError> {
        self.metrics.clear();

        for step in &self.steps {
            let name = step.name().to_string();
            info!("Starting step: {}", name);
            self.status = PipelineStatus::Running(name.clone());
            let start = Instant::now();

            if let Err(e) = step.run(state).await {
                error!("Step {} failed: {}", name, e);
                self.status = PipelineStatus::Failed {
                    step: name.clone(),
                    error: e.to_string(),
                };
                return Err(BootstrapError::step(name, e));
            }

            let duration_ms = start.elapsed().as_millis();
            info!("Completed step: {} ({} ms)", name, duration_ms);
            self.metrics.push(StepMetrics { name, duration_ms });
        }

        self.status = PipelineStatus::Completed;
        Ok(())
    }
}
