//! Worker machines, the join token and statically listed workers

use super::components::upload_and_apply;
use crate::BootstrapError;
use crate::addons::combine_manifests;
use crate::config::{ClusterConfig, HostConfig, WorkerConfig};
use crate::runner::run_on_hosts;
use crate::state::State;
use crate::transport::Connection;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use tracing::info;

/// Staging path of the worker MachineDeployments
pub const WORKERS_STAGING: &str = "workers/machines.yaml";

const MACHINE_API_VERSION: &str = "cluster.k8s.io/v1alpha1";

fn machine_deployment(cluster: &ClusterConfig, worker: &WorkerConfig) -> Result<Value, BootstrapError> {
    let provider_spec = serde_json::to_value(&worker.provider_spec)?;
    let kubelet = format!("v{}", cluster.versions.kubernetes.trim_start_matches('v'));

    Ok(json!({
        "apiVersion": MACHINE_API_VERSION,
        "kind": "MachineDeployment",
        "metadata": {
            "name": worker.name,
            "namespace": "kube-system",
        },
        "spec": {
            "replicas": worker.replicas,
            "selector": {
                "matchLabels": { "workerset": worker.name },
            },
            "template": {
                "metadata": {
                    "labels": { "workerset": worker.name },
                },
                "spec": {
                    "providerSpec": { "value": provider_spec },
                    "versions": { "kubelet": kubelet },
                },
            },
        },
    }))
}

/// Combined MachineDeployment manifest for every worker set
pub fn machine_deployments_manifest(cluster: &ClusterConfig) -> Result<String, BootstrapError> {
    let documents = cluster
        .workers
        .iter()
        .map(|worker| -> Result<String, BootstrapError> {
            Ok(serde_yaml::to_string(&machine_deployment(cluster, worker)?)?)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(combine_manifests(&documents))
}

pub async fn create_worker_machines(state: &mut State) -> Result<(), BootstrapError> {
    if state.cluster.workers.is_empty() {
        info!("No worker machines defined. Skipping.");
        return Ok(());
    }
    if !state.cluster.machine_controller.deploy {
        return Err(BootstrapError::Config(
            "worker machines require the machine-controller".into(),
        ));
    }

    info!("Creating worker machines…");
    let manifest = machine_deployments_manifest(&state.cluster)?;
    state.configuration.add(WORKERS_STAGING, manifest);
    state
        .run_task_on_leader(create_worker_machines_on_node)
        .await
}

fn create_worker_machines_on_node<'a>(
    state: &'a State,
    _: &'a HostConfig,
    conn: &'a mut dyn Connection,
) -> BoxFuture<'a, Result<(), BootstrapError>> {
    Box::pin(async move {
        conn.run(
            "sudo kubectl --kubeconfig=/etc/kubernetes/admin.conf -n kube-system \
             rollout status deployment/machine-controller --timeout=5m",
        )
        .await?;
        upload_and_apply(state, conn, WORKERS_STAGING).await
    })
}

/// Issue a join command for additional nodes
pub async fn create_join_token(state: &mut State) -> Result<(), BootstrapError> {
    info!("Creating join token…");
    let leader = state.cluster.leader()?.clone();

    let output = {
        let mut guard = state.connect(&leader).await?;
        guard
            .connection()
            .run("sudo kubeadm token create --print-join-command")
            .await?
    };

    let command = output.trim();
    if command.is_empty() {
        return Err(BootstrapError::Config(format!(
            "{} returned an empty join command",
            leader
        )));
    }
    state.join_command = Some(command.to_string());
    Ok(())
}

/// Join every `role: worker` host with the issued join command
pub async fn join_static_workers(state: &mut State) -> Result<(), BootstrapError> {
    let workers = state.cluster.static_workers();
    if workers.is_empty() {
        info!("No static workers defined. Skipping.");
        return Ok(());
    }
    if state.join_command.is_none() {
        return Err(BootstrapError::Config(
            "no join command issued for static workers".into(),
        ));
    }

    info!("Joining {} static worker(s)…", workers.len());
    run_on_hosts(state, &workers, join_static_worker_on_node, true).await
}

fn join_static_worker_on_node<'a>(
    state: &'a State,
    host: &'a HostConfig,
    conn: &'a mut dyn Connection,
) -> BoxFuture<'a, Result<(), BootstrapError>> {
    Box::pin(async move {
        let join = state.join_command.as_deref().ok_or_else(|| {
            BootstrapError::Config(format!("no join command for {}", host))
        })?;
        conn.run(&format!("sudo {}", join)).await?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::split_documents;
    use crate::transport::mock::MockConnector;
    use std::sync::Arc;

    const WORKERS: &str = r#"
workers:
  - name: pool-a
    replicas: 3
    provider_spec:
      cloudProvider: aws
      operatingSystem: ubuntu
  - name: pool-b
"#;

    fn state(mock: MockConnector, extra: &str) -> State {
        let yaml = format!("name: demo\nhosts:\n  - public_address: 1.1.1.1\n{extra}");
        State::new(ClusterConfig::from_yaml(&yaml).unwrap(), Arc::new(mock))
    }

    #[test]
    fn test_machine_deployments_manifest() {
        let state = state(MockConnector::new(), WORKERS);
        let manifest = machine_deployments_manifest(&state.cluster).unwrap();

        let docs: Vec<serde_yaml::Value> = split_documents(&manifest)
            .iter()
            .map(|d| serde_yaml::from_str(d).unwrap())
            .collect();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["kind"], "MachineDeployment");
        assert_eq!(docs[0]["spec"]["replicas"], 3);
        assert_eq!(
            docs[0]["spec"]["template"]["spec"]["providerSpec"]["value"]["cloudProvider"],
            "aws"
        );
        assert_eq!(docs[1]["metadata"]["name"], "pool-b");
        assert_eq!(docs[1]["spec"]["replicas"], 1);
        assert_eq!(docs[1]["spec"]["template"]["spec"]["versions"]["kubelet"], "v1.13.5");
    }

    #[tokio::test]
    async fn test_no_workers_skips() {
        let mock = MockConnector::new();
        let mut state = state(mock.clone(), "");

        create_worker_machines(&mut state).await.unwrap();
        assert_eq!(mock.connections_opened(), 0);
    }

    #[tokio::test]
    async fn test_workers_need_machine_controller() {
        let mock = MockConnector::new();
        let extra = format!("{WORKERS}machine_controller:\n  deploy: false\n");
        let mut state = state(mock.clone(), &extra);

        let err = create_worker_machines(&mut state).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Config(_)));
        assert_eq!(mock.connections_opened(), 0);
    }

    #[tokio::test]
    async fn test_workers_applied_after_rollout() {
        let mock = MockConnector::new();
        let mut state = state(mock.clone(), WORKERS);

        create_worker_machines(&mut state).await.unwrap();

        let commands = mock.commands_for(0);
        assert!(commands[0].contains("rollout status deployment/machine-controller"));
        assert!(commands[1].ends_with("apply -f clusterboot/workers/machines.yaml"));
        assert!(mock.uploaded_content(0, "clusterboot/workers/machines.yaml").is_some());
    }

    #[tokio::test]
    async fn test_join_token_stored() {
        let mock = MockConnector::new().with_response(
            "token create",
            "kubeadm join 10.0.0.1:6443 --token abc.def\n",
        );
        let mut state = state(mock.clone(), "");

        create_join_token(&mut state).await.unwrap();

        assert_eq!(
            state.join_command.as_deref(),
            Some("kubeadm join 10.0.0.1:6443 --token abc.def")
        );
        assert_eq!(mock.connections_released(), 1);
    }

    #[tokio::test]
    async fn test_static_workers_joined() {
        let mock = MockConnector::new();
        let extra = "  - public_address: 1.1.1.2\n    role: worker\n  - public_address: 1.1.1.3\n    role: worker\n";
        let mut state = state(mock.clone(), extra);
        state.join_command = Some("kubeadm join 1.1.1.1:6443 --token abc.def".into());

        join_static_workers(&mut state).await.unwrap();

        assert!(mock.commands_for(0).is_empty());
        for i in 1..3 {
            assert_eq!(
                mock.commands_for(i),
                vec!["sudo kubeadm join 1.1.1.1:6443 --token abc.def".to_string()]
            );
        }
    }

    #[tokio::test]
    async fn test_no_static_workers_skips() {
        let mock = MockConnector::new();
        let mut state = state(mock.clone(), "");

        join_static_workers(&mut state).await.unwrap();
        assert_eq!(mock.connections_opened(), 0);
    }

    #[tokio::test]
    async fn test_static_workers_need_join_command() {
        let mock = MockConnector::new();
        let mut state = state(mock.clone(), "  - public_address: 1.1.1.2\n    role: worker\n");

        let err = join_static_workers(&mut state).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Config(_)));
        assert_eq!(mock.connections_opened(), 0);
    }

    #[tokio::test]
    async fn test_empty_join_command_is_error() {
        let mut state = state(MockConnector::new(), "");
        assert!(create_join_token(&mut state).await.is_err());
        assert!(state.join_command.is_none());
    }
}
