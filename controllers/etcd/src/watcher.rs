//! Kubernetes resource watchers.
//!
//! Drives reconciliation of EtcdCluster resources with
//! `kube_runtime::Controller`. Changes to owned StatefulSets and Services, and
//! to member volume claims, trigger a reconcile of the owning cluster.

use crate::error::ControllerError;
use crate::labels::LABEL_CR_NAME;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::retry::{REQUEUE_AFTER, RetryDecision};
use crds::EtcdCluster;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{self, Action, Config as ControllerConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, watcher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Shared state handed to every reconcile call
struct Context {
    reconciler: Arc<Reconciler>,
    metrics: Arc<Metrics>,
}

/// Watches EtcdCluster resources and their children.
pub struct Watcher {
    client: Client,
    reconciler: Arc<Reconciler>,
    metrics: Arc<Metrics>,
}

impl Watcher {
    pub fn new(client: Client, reconciler: Arc<Reconciler>, metrics: Arc<Metrics>) -> Self {
        Self {
            client,
            reconciler,
            metrics,
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match self.reconciler.config().watch_namespace.as_deref() {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Runs the controller until its stream ends.
    pub async fn watch_clusters(&self) -> Result<(), ControllerError> {
        info!(
            "Starting EtcdCluster watcher in {}",
            self.reconciler
                .config()
                .watch_namespace
                .as_deref()
                .unwrap_or("all namespaces")
        );

        let context = Arc::new(Context {
            reconciler: self.reconciler.clone(),
            metrics: self.metrics.clone(),
        });

        // Debounce batches the burst of child events a single pass produces
        let controller_config = ControllerConfig::default()
            .debounce(Duration::from_secs(1))
            .concurrency(3);

        let controller = Controller::new(self.api::<EtcdCluster>(), watcher::Config::default())
            .owns(self.api::<StatefulSet>(), watcher::Config::default())
            .owns(self.api::<Service>(), watcher::Config::default())
            .watches(
                self.api::<PersistentVolumeClaim>(),
                watcher::Config::default().labels(LABEL_CR_NAME),
                |claim| claim_owner(&claim),
            )
            .with_config(controller_config);

        self.metrics.mark_ready();
        controller
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok((obj, action)) => debug!("Reconciled {}: {:?}", obj, action),
                    // already logged by the classifier
                    Err(controller::Error::ReconcilerFailed(_, obj)) => {
                        debug!("Reconcile of {} failed", obj)
                    }
                    Err(e) => error!("Controller error: {}", e),
                }
            })
            .await;

        Err(ControllerError::Watch("EtcdCluster watch stream ended".to_string()))
    }
}

async fn reconcile(cluster: Arc<EtcdCluster>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    let started = Instant::now();
    let decision = ctx.reconciler.reconcile(&namespace, &name).await;
    ctx.metrics.observe(&decision, started.elapsed());
    into_action(decision)
}

fn error_policy(cluster: Arc<EtcdCluster>, _error: &ControllerError, ctx: Arc<Context>) -> Action {
    let namespace = cluster.namespace().unwrap_or_default();
    let backoff = ctx.reconciler.error_backoff(&namespace, &cluster.name_any());
    debug!("Retrying {}/{} in {:?}", namespace, cluster.name_any(), backoff);
    Action::requeue(backoff.max(REQUEUE_AFTER))
}

/// Maps a retry decision onto what the controller runtime expects
fn into_action(decision: RetryDecision) -> Result<Action, ControllerError> {
    match decision {
        RetryDecision { error: Some(e), .. } => Err(e),
        RetryDecision {
            requeue: true, after, ..
        } => Ok(Action::requeue(after)),
        RetryDecision { .. } => Ok(Action::await_change()),
    }
}

/// The cluster a member volume claim belongs to, read from its labels
fn claim_owner(claim: &PersistentVolumeClaim) -> Option<ObjectRef<EtcdCluster>> {
    let cluster = claim.labels().get(LABEL_CR_NAME)?;
    let reference = ObjectRef::new(cluster);
    Some(match claim.namespace() {
        Some(ns) => reference.within(&ns),
        None => reference,
    })
}
