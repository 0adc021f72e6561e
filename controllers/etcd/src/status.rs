//! Status aggregation
//!
//! Sums declared and ready replicas over the cluster's StatefulSets, derives
//! the cluster state and renders the external connect address.

use crate::convergence::write_status;
use crate::error::ControllerError;
use crate::labels::Labels;
use crate::retry::ReconcileOutcome;
use chrono::Utc;
use crds::{ClusterCondition, ClusterState, EtcdCluster, EtcdClusterStatus};
use kube_store::KubeStoreTrait;
use tracing::{debug, info, warn};

pub const CONDITION_AVAILABLE: &str = "Available";

/// Declared and ready replicas summed over a cluster's StatefulSets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadyCount {
    pub declared: i32,
    pub ready: i32,
}

/// Maps replica counts onto a cluster state. A cluster with nothing declared
/// is `Failed`, not `Ready`.
pub fn derive_state(count: ReadyCount) -> ClusterState {
    if count.ready == count.declared && count.declared > 0 {
        ClusterState::Ready
    } else if count.ready == 0 {
        ClusterState::Failed
    } else {
        ClusterState::PartialReady
    }
}

/// Lists the cluster's StatefulSets and sums their replica counts.
pub async fn check_ready(
    store: &dyn KubeStoreTrait,
    namespace: &str,
    labels: &Labels,
) -> Result<ReadyCount, ControllerError> {
    let stateful_sets = store.list_stateful_sets(namespace, labels).await?;
    Ok(stateful_sets.iter().fold(ReadyCount::default(), |acc, sts| ReadyCount {
        declared: acc.declared + sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
        ready: acc.ready
            + sts
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0),
    }))
}

/// `host:port` for every port, comma-joined
pub fn external_connect_addr(host: &str, ports: &[i32]) -> Result<String, ControllerError> {
    if ports.is_empty() {
        return Err(ControllerError::MissingPorts(format!(
            "no ports to render for {}",
            host
        )));
    }
    Ok(ports
        .iter()
        .map(|port| format!("{}:{}", host, port))
        .collect::<Vec<_>>()
        .join(","))
}

/// The `Available` condition for `state`, keeping the previous transition
/// time when the condition status did not flip.
pub fn available_condition(
    state: ClusterState,
    count: ReadyCount,
    previous: Option<&ClusterCondition>,
) -> ClusterCondition {
    let status = if state == ClusterState::Ready { "True" } else { "False" };
    let last_transition_time = match previous {
        Some(prev) if prev.status == status => prev.last_transition_time,
        _ => Some(Utc::now()),
    };
    ClusterCondition {
        type_: CONDITION_AVAILABLE.to_string(),
        status: status.to_string(),
        reason: state.as_str().to_string(),
        message: format!("{}/{} replicas ready", count.ready, count.declared),
        last_transition_time,
    }
}

/// Builds the status to persist from the current readiness and ports.
pub fn desired_status(
    current: Option<&EtcdClusterStatus>,
    state: ClusterState,
    count: ReadyCount,
    connect_addr: String,
) -> EtcdClusterStatus {
    let previous = current.and_then(|s| s.conditions.iter().find(|c| c.type_ == CONDITION_AVAILABLE));
    EtcdClusterStatus {
        status: state,
        connect_addr,
        conditions: vec![available_condition(state, count, previous)],
    }
}

/// True when persisting `desired` would change the live status
pub fn status_needs_update(current: Option<&EtcdClusterStatus>, desired: &EtcdClusterStatus) -> bool {
    match current {
        None => true,
        Some(status) => status != desired,
    }
}

/// Aggregates readiness, persists the status when it changed, and asks for a
/// requeue while the cluster is not `Ready`.
///
/// A failed write does not hide a not-ready cluster: the wait is still
/// reported, and the write is retried on the next pass.
pub async fn handle_status(
    store: &dyn KubeStoreTrait,
    cluster: &EtcdCluster,
    member_labels: &Labels,
    external_host: &str,
    node_ports: &[i32],
) -> Result<ReconcileOutcome, ControllerError> {
    let namespace = cluster.metadata.namespace.as_deref().unwrap_or_default();
    let count = match check_ready(store, namespace, member_labels).await {
        Ok(count) => count,
        Err(e) => {
            warn!("Readiness is {}: {}", ClusterState::Unknown, e);
            return Err(e);
        }
    };
    let state = derive_state(count);
    let connect_addr = external_connect_addr(external_host, node_ports)?;
    let desired = desired_status(cluster.status.as_ref(), state, count, connect_addr);

    if status_needs_update(cluster.status.as_ref(), &desired) {
        match write_status(store, cluster, &desired).await {
            Ok(_) => info!("Status is now {} ({}/{} ready)", state, count.ready, count.declared),
            Err(e) if state != ClusterState::Ready => {
                warn!("Failed to persist status {}: {}", state, e);
            }
            Err(e) => return Err(e),
        }
    } else {
        debug!("Status unchanged ({})", state);
    }

    if state == ClusterState::Ready {
        Ok(ReconcileOutcome::Done)
    } else {
        Ok(ReconcileOutcome::requeue(format!(
            "cluster is {} ({}/{} ready)",
            state, count.ready, count.declared
        )))
    }
}
