//! Reconciliation of EtcdCluster resources.
//!
//! One invocation walks a fixed sequence of phases. Any failed phase aborts
//! the rest; the next invocation starts over from the top.

use crate::backoff::FibonacciBackoff;
use crate::builder::ResourceBuilder;
use crate::config::OperatorConfig;
use crate::convergence::{Ensured, ensure_service, ensure_stateful_set, patch_stateful_set};
use crate::error::ControllerError;
use crate::finalizer::{ensure_finalizer, finalize};
use crate::fingerprint::stored_fingerprint;
use crate::labels::{Ordinal, export_service_labels, member_labels};
use crate::retry::{ReconcileOutcome, RetryDecision, classify};
use crate::services::{list_node_ports, sync_export_services};
use crate::status::handle_status;
use kube_store::KubeStoreTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{Instrument, debug, info_span, warn};

/// Reconciles EtcdCluster resources against the object store.
pub struct Reconciler {
    store: Arc<dyn KubeStoreTrait>,
    config: Arc<OperatorConfig>,
    /// Per-cluster error backoff (namespace/name -> backoff)
    backoff_states: Arc<Mutex<HashMap<String, FibonacciBackoff>>>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn KubeStoreTrait>, config: Arc<OperatorConfig>) -> Self {
        Self {
            store,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Runs one reconcile pass for the cluster `namespace/name`.
    ///
    /// Always re-reads the cluster; the caller only supplies its identity.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> RetryDecision {
        let span = info_span!("reconcile", namespace = %namespace, name = %name);
        let result = self.run_phases(namespace, name).instrument(span.clone()).await;
        let decision = span.in_scope(|| classify(result));
        if !decision.is_error() {
            self.reset_backoff(&resource_key(namespace, name));
        }
        decision
    }

    async fn run_phases(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome, ControllerError> {
        let store = self.store.as_ref();

        let Some(cluster) = store.get_cluster(namespace, name).await? else {
            debug!("EtcdCluster is gone, nothing to do");
            self.forget_backoff(&resource_key(namespace, name));
            return Ok(ReconcileOutcome::Done);
        };

        if cluster.metadata.deletion_timestamp.is_some() {
            debug!(phase = "finalize", "EtcdCluster is being deleted");
            let builder = ResourceBuilder::new(&cluster, &self.config)?;
            return finalize(store, &cluster, &member_labels(builder.identity(), Ordinal::All)).await;
        }

        debug!(phase = "finalizer");
        let cluster = ensure_finalizer(store, cluster).await?;
        let builder = ResourceBuilder::new(&cluster, &self.config)?;
        let id = builder.identity();

        debug!(phase = "export-services", members = builder.members());
        sync_export_services(store, &cluster, &builder).await?;

        debug!(phase = "headless-service");
        ensure_service(store, &cluster, builder.headless_service()).await?;

        debug!(phase = "stateful-set");
        let desired = builder.stateful_set()?;
        if let Ensured::Existing(live) = ensure_stateful_set(store, &cluster, desired.clone()).await? {
            let wanted = stored_fingerprint(&desired.metadata);
            if stored_fingerprint(&live.metadata) != wanted {
                debug!("StatefulSet fingerprint changed to {:?}", wanted);
                patch_stateful_set(store, &desired).await?;
            }
        }

        debug!(phase = "status");
        let node_ports = list_node_ports(store, namespace, &export_service_labels(id, Ordinal::All)).await?;
        handle_status(
            store,
            &cluster,
            &member_labels(id, Ordinal::All),
            builder.external_host(),
            &node_ports,
        )
        .await
    }

    /// Next error backoff for a cluster, advancing its sequence
    pub fn error_backoff(&self, namespace: &str, name: &str) -> Duration {
        match self.backoff_states.lock() {
            Ok(mut states) => states
                .entry(resource_key(namespace, name))
                .or_default()
                .next_backoff(),
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                crate::retry::REQUEUE_AFTER
            }
        }
    }

    fn forget_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) fn has_backoff(&self, namespace: &str, name: &str) -> bool {
        self.backoff_states
            .lock()
            .map(|states| states.contains_key(&resource_key(namespace, name)))
            .unwrap_or(false)
    }

    fn reset_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock()
            && let Some(state) = states.get_mut(key)
        {
            state.reset();
        }
    }
}

fn resource_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}
