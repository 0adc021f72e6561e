//! Finalizer lifecycle
//!
//! Owner references cascade-delete every child except the member volume
//! claims, which the StatefulSet controller leaves behind. The finalizer
//! holds the cluster until those are gone.

use crate::error::ControllerError;
use crate::labels::Labels;
use crate::retry::ReconcileOutcome;
use crds::EtcdCluster;
use kube_store::KubeStoreTrait;
use std::fmt;
use tracing::{debug, info, warn};

pub const FINALIZER: &str = "etcd-operator/finalizer";

/// Children that are not removed through owner references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonCascaded {
    Claims,
}

impl fmt::Display for NonCascaded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NonCascaded::Claims => f.write_str("PersistentVolumeClaims"),
        }
    }
}

pub const NON_CASCADED: &[NonCascaded] = &[NonCascaded::Claims];

impl NonCascaded {
    async fn cleanup(
        self,
        store: &dyn KubeStoreTrait,
        namespace: &str,
        labels: &Labels,
    ) -> Result<(), ControllerError> {
        match self {
            NonCascaded::Claims => store.delete_claims_by_label(namespace, labels).await?,
        }
        Ok(())
    }
}

pub fn has_finalizer(cluster: &EtcdCluster) -> bool {
    cluster
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == FINALIZER))
}

/// Adds the finalizer with a single update when it is missing.
///
/// Returns the cluster as persisted, so later phases work on the fresh
/// resourceVersion.
pub async fn ensure_finalizer(
    store: &dyn KubeStoreTrait,
    cluster: EtcdCluster,
) -> Result<EtcdCluster, ControllerError> {
    if has_finalizer(&cluster) {
        return Ok(cluster);
    }
    let mut updated = cluster;
    updated
        .metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(FINALIZER.to_string());
    let persisted = store.update_cluster(&updated).await?;
    debug!("Added finalizer to EtcdCluster {}", updated.metadata.name.as_deref().unwrap_or_default());
    Ok(persisted)
}

/// Runs cleanup for a cluster being deleted and releases it.
///
/// The finalizer is only removed after every non-cascaded kind is gone, so a
/// failed cleanup keeps the cluster around for the next attempt.
pub async fn finalize(
    store: &dyn KubeStoreTrait,
    cluster: &EtcdCluster,
    member_labels: &Labels,
) -> Result<ReconcileOutcome, ControllerError> {
    if !has_finalizer(cluster) {
        debug!("Deletion in progress without our finalizer, nothing to clean up");
        return Ok(ReconcileOutcome::Done);
    }
    let namespace = cluster.metadata.namespace.as_deref().unwrap_or_default();
    let name = cluster.metadata.name.as_deref().unwrap_or_default();

    for kind in NON_CASCADED {
        if let Err(e) = kind.cleanup(store, namespace, member_labels).await {
            warn!("Cleanup of {} for {}/{} failed: {}", kind, namespace, name, e);
            return Err(e);
        }
        info!("Deleted {} of EtcdCluster {}/{}", kind, namespace, name);
    }

    let mut released = cluster.clone();
    if let Some(finalizers) = released.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != FINALIZER);
    }
    store.update_cluster(&released).await?;
    info!("Removed finalizer from EtcdCluster {}/{}", namespace, name);
    Ok(ReconcileOutcome::Done)
}
