//! Per-host task dispatch
//!
//! Fans one operation out over a set of hosts. Every host runs to completion
//! regardless of what happens on the others; failures are collected and
//! reported together once all hosts are done.

use crate::config::HostConfig;
use crate::error::{BootstrapError, HostFailure, HostFailures};
use crate::state::State;
use crate::transport::Connection;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

/// An operation run against one host over its connection.
///
/// Implemented for any function of the shape
/// `fn(&State, &HostConfig, &mut dyn Connection) -> BoxFuture<Result<()>>`.
pub trait HostTask:
    for<'a> Fn(&'a State, &'a HostConfig, &'a mut dyn Connection) -> BoxFuture<'a, Result<(), BootstrapError>>
    + Sync
{
}

impl<F> HostTask for F where
    F: for<'a> Fn(
            &'a State,
            &'a HostConfig,
            &'a mut dyn Connection,
        ) -> BoxFuture<'a, Result<(), BootstrapError>>
        + Sync
{
}

/// Run `task` on every host in `hosts`.
///
/// With `parallel` all hosts run concurrently, otherwise one at a time in
/// list order. Hosts appearing more than once run once. Each invocation owns
/// its own connection, released when the invocation ends.
pub async fn run_on_hosts<F>(
    state: &State,
    hosts: &[HostConfig],
    task: F,
    parallel: bool,
) -> Result<(), BootstrapError>
where
    F: HostTask,
{
    let mut seen = HashSet::new();
    let targets: Vec<&HostConfig> = hosts.iter().filter(|h| seen.insert(h.index)).collect();

    let outcomes = if parallel {
        join_all(targets.iter().map(|host| run_on_host(state, host, &task))).await
    } else {
        let mut outcomes = Vec::with_capacity(targets.len());
        for host in &targets {
            outcomes.push(run_on_host(state, host, &task).await);
        }
        outcomes
    };

    let failures: Vec<HostFailure> = targets
        .iter()
        .zip(outcomes)
        .filter_map(|(host, outcome)| {
            outcome.err().map(|error| {
                warn!("Task failed on {}: {}", host, error);
                HostFailure {
                    index: host.index,
                    host: host.to_string(),
                    error,
                }
            })
        })
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(BootstrapError::Hosts(HostFailures(failures)))
    }
}

async fn run_on_host<F>(state: &State, host: &HostConfig, task: &F) -> Result<(), BootstrapError>
where
    F: HostTask,
{
    let mut guard = state.connect(host).await?;
    debug!("Running task on {}", host);

    let outcome = AssertUnwindSafe(task(state, host, guard.connection()))
        .catch_unwind()
        .await;

    match outcome {
        Ok(result) => result,
        Err(_) => Err(BootstrapError::TaskPanicked {
            host: host.to_string(),
        }),
    }
}

impl State {
    /// Run `task` on every host in the cluster
    pub async fn run_task_on_all_hosts<F>(&self, task: F, parallel: bool) -> Result<(), BootstrapError>
    where
        F: HostTask,
    {
        run_on_hosts(self, &self.cluster.hosts, task, parallel).await
    }

    /// Run `task` on the leader only
    pub async fn run_task_on_leader<F>(&self, task: F) -> Result<(), BootstrapError>
    where
        F: HostTask,
    {
        let leader = self.cluster.leader()?.clone();
        run_on_hosts(self, std::slice::from_ref(&leader), task, false).await
    }

    /// Run `task` on every control-plane host except the leader
    pub async fn run_task_on_followers<F>(&self, task: F, parallel: bool) -> Result<(), BootstrapError>
    where
        F: HostTask,
    {
        let followers = self.cluster.followers()?;
        run_on_hosts(self, &followers, task, parallel).await
    }
}
