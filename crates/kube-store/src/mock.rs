//! Mock KubeStore for unit testing
//!
//! Keeps objects in memory and records every call so tests can assert on
//! exactly which writes a reconcile pass issued. Individual operations can be
//! made to fail with [`MockKubeStore::fail`].
//!
//! The mock models the server behaviour the operator relies on: NodePort
//! allocation, resourceVersion conflicts, AlreadyExists on create, merge-patch
//! semantics, and finalizer-gated deletion of the custom resource.

use crate::error::StoreError;
use crate::selector::matches;
use crate::store_trait::KubeStoreTrait;
use crds::{EtcdCluster, EtcdClusterStatus};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// First port handed out to NodePort services
const NODE_PORT_BASE: i32 = 30000;

type Key = (String, String);
type Objects<T> = Arc<Mutex<BTreeMap<Key, T>>>;

/// Store operation, used for call recording and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreOp {
    GetCluster,
    UpdateCluster,
    PatchClusterStatus,
    GetStatefulSet,
    ListStatefulSets,
    CreateStatefulSet,
    PatchStatefulSet,
    GetService,
    ListServices,
    CreateService,
    DeleteService,
    DeleteClaims,
}

impl StoreOp {
    /// True for operations that change server state
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            StoreOp::UpdateCluster
                | StoreOp::PatchClusterStatus
                | StoreOp::CreateStatefulSet
                | StoreOp::PatchStatefulSet
                | StoreOp::CreateService
                | StoreOp::DeleteService
                | StoreOp::DeleteClaims
        )
    }
}

/// Error a failing operation returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// `StoreError::Injected` with the given message
    Injected(String),
    AlreadyExists,
    Conflict,
    /// `StoreError::Timeout` after a nominal 10s
    Timeout,
}

impl FailureKind {
    fn to_error(&self, op: StoreOp) -> StoreError {
        match self {
            FailureKind::Injected(msg) => StoreError::Injected(msg.clone()),
            FailureKind::AlreadyExists => StoreError::AlreadyExists(format!("{:?}", op)),
            FailureKind::Conflict => StoreError::Conflict(format!("{:?}", op)),
            FailureKind::Timeout => StoreError::Timeout {
                op: "mock",
                after: std::time::Duration::from_secs(10),
            },
        }
    }
}

/// One recorded store call. `name` is empty for list and collection calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub namespace: String,
    pub name: String,
}

/// In-memory KubeStore
#[derive(Debug, Clone, Default)]
pub struct MockKubeStore {
    clusters: Objects<EtcdCluster>,
    stateful_sets: Objects<StatefulSet>,
    services: Objects<Service>,
    claims: Objects<PersistentVolumeClaim>,
    calls: Arc<Mutex<Vec<StoreCall>>>,
    failures: Arc<Mutex<BTreeMap<StoreOp, FailureKind>>>,
    next_node_port: Arc<AtomicI32>,
    revision: Arc<AtomicU64>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key_of(meta: &ObjectMeta) -> Result<Key, StoreError> {
    let name = meta
        .name
        .clone()
        .ok_or_else(|| StoreError::InvalidObject("metadata.name is required".to_string()))?;
    let namespace = meta
        .namespace
        .clone()
        .ok_or_else(|| StoreError::InvalidObject(format!("metadata.namespace is required for {}", name)))?;
    Ok((namespace, name))
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Applies an RFC 7386 JSON merge patch to `target`.
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (k, v) in patch_map {
            if v.is_null() {
                target_map.remove(k);
            } else {
                merge_patch(target_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}

fn select<T: Clone>(
    objects: &Objects<T>,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    meta: impl Fn(&T) -> &ObjectMeta,
) -> Vec<T> {
    lock(objects)
        .iter()
        .filter(|((ns, _), obj)| ns == namespace && matches(labels, meta(obj).labels.as_ref()))
        .map(|(_, obj)| obj.clone())
        .collect()
}

impl MockKubeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, op: StoreOp, namespace: &str, name: &str) -> Result<(), StoreError> {
        lock(&self.calls).push(StoreCall {
            op,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        match lock(&self.failures).get(&op) {
            Some(kind) => Err(kind.to_error(op)),
            None => Ok(()),
        }
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn stamp(&self, meta: &mut ObjectMeta) {
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        meta.resource_version = Some(self.next_revision());
    }

    // Failure injection

    /// Makes every subsequent call to `op` fail with `msg`.
    pub fn fail(&self, op: StoreOp, msg: impl Into<String>) {
        self.fail_with(op, FailureKind::Injected(msg.into()));
    }

    /// Makes every subsequent call to `op` fail with a specific error kind.
    pub fn fail_with(&self, op: StoreOp, kind: FailureKind) {
        lock(&self.failures).insert(op, kind);
    }

    pub fn clear_failure(&self, op: StoreOp) {
        lock(&self.failures).remove(&op);
    }

    // Call log

    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    /// Calls that would have changed server state
    pub fn mutating_calls(&self) -> Vec<StoreCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.op.is_mutating())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    // Fixtures and inspection

    /// Seeds a cluster, stamping uid and resourceVersion. Not recorded.
    pub fn add_cluster(&self, mut cluster: EtcdCluster) -> EtcdCluster {
        self.stamp(&mut cluster.metadata);
        let k = key(
            cluster.metadata.namespace.as_deref().unwrap_or_default(),
            cluster.metadata.name.as_deref().unwrap_or_default(),
        );
        lock(&self.clusters).insert(k, cluster.clone());
        cluster
    }

    pub fn cluster(&self, namespace: &str, name: &str) -> Option<EtcdCluster> {
        lock(&self.clusters).get(&key(namespace, name)).cloned()
    }

    /// Requests deletion of a cluster the way the API server does: objects
    /// without finalizers vanish, others only get a deletionTimestamp.
    pub fn delete_cluster(&self, namespace: &str, name: &str) {
        let mut clusters = lock(&self.clusters);
        let k = key(namespace, name);
        let Some(cluster) = clusters.get_mut(&k) else {
            return;
        };
        if cluster.metadata.finalizers.as_ref().is_none_or(Vec::is_empty) {
            clusters.remove(&k);
            return;
        }
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let now: Option<Time> = serde_json::from_value(Value::String(now)).ok();
        cluster.metadata.deletion_timestamp = now;
        cluster.metadata.resource_version = Some(self.next_revision());
    }

    pub fn stateful_set(&self, namespace: &str, name: &str) -> Option<StatefulSet> {
        lock(&self.stateful_sets).get(&key(namespace, name)).cloned()
    }

    /// Simulates the StatefulSet controller reporting `ready` ready replicas.
    pub fn set_ready_replicas(&self, namespace: &str, name: &str, ready: i32) {
        if let Some(sts) = lock(&self.stateful_sets).get_mut(&key(namespace, name)) {
            let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
            sts.status = Some(StatefulSetStatus {
                replicas,
                ready_replicas: Some(ready),
                ..Default::default()
            });
        }
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        lock(&self.services).get(&key(namespace, name)).cloned()
    }

    /// Names of all services in `namespace`, sorted
    pub fn service_names(&self, namespace: &str) -> Vec<String> {
        lock(&self.services)
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Seeds a service as-is. Not recorded.
    pub fn add_service(&self, mut service: Service) {
        self.stamp(&mut service.metadata);
        let k = key(
            service.metadata.namespace.as_deref().unwrap_or_default(),
            service.metadata.name.as_deref().unwrap_or_default(),
        );
        lock(&self.services).insert(k, service);
    }

    /// Seeds a claim as-is. Not recorded.
    pub fn add_claim(&self, mut claim: PersistentVolumeClaim) {
        self.stamp(&mut claim.metadata);
        let k = key(
            claim.metadata.namespace.as_deref().unwrap_or_default(),
            claim.metadata.name.as_deref().unwrap_or_default(),
        );
        lock(&self.claims).insert(k, claim);
    }

    pub fn claim_count(&self, namespace: &str) -> usize {
        lock(&self.claims).keys().filter(|(ns, _)| ns == namespace).count()
    }
}

#[async_trait::async_trait]
impl KubeStoreTrait for MockKubeStore {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<EtcdCluster>, StoreError> {
        self.record(StoreOp::GetCluster, namespace, name)?;
        Ok(self.cluster(namespace, name))
    }

    async fn update_cluster(&self, cluster: &EtcdCluster) -> Result<EtcdCluster, StoreError> {
        let k = key_of(&cluster.metadata)?;
        self.record(StoreOp::UpdateCluster, &k.0, &k.1)?;
        let mut clusters = lock(&self.clusters);
        let existing = clusters
            .get(&k)
            .ok_or_else(|| StoreError::NotFound(format!("etcdclusters {}", k.1)))?;
        if cluster.metadata.resource_version.is_some()
            && cluster.metadata.resource_version != existing.metadata.resource_version
        {
            return Err(StoreError::Conflict(format!(
                "etcdclusters {}: the object has been modified",
                k.1
            )));
        }
        let mut updated = cluster.clone();
        // status is a subresource and is ignored by a main-resource update
        updated.status = existing.status.clone();
        updated.metadata.uid = existing.metadata.uid.clone();
        updated.metadata.deletion_timestamp = existing.metadata.deletion_timestamp.clone();
        updated.metadata.resource_version = Some(self.next_revision());

        let released = updated.metadata.deletion_timestamp.is_some()
            && updated.metadata.finalizers.as_ref().is_none_or(Vec::is_empty);
        if released {
            clusters.remove(&k);
        } else {
            clusters.insert(k, updated.clone());
        }
        Ok(updated)
    }

    async fn patch_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &EtcdClusterStatus,
    ) -> Result<EtcdCluster, StoreError> {
        self.record(StoreOp::PatchClusterStatus, namespace, name)?;
        let mut clusters = lock(&self.clusters);
        let cluster = clusters
            .get_mut(&key(namespace, name))
            .ok_or_else(|| StoreError::NotFound(format!("etcdclusters {}", name)))?;
        cluster.status = Some(status.clone());
        cluster.metadata.resource_version = Some(self.next_revision());
        Ok(cluster.clone())
    }

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>, StoreError> {
        self.record(StoreOp::GetStatefulSet, namespace, name)?;
        Ok(self.stateful_set(namespace, name))
    }

    async fn list_stateful_sets(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<StatefulSet>, StoreError> {
        self.record(StoreOp::ListStatefulSets, namespace, "")?;
        Ok(select(&self.stateful_sets, namespace, labels, |s| &s.metadata))
    }

    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, StoreError> {
        let k = key_of(&stateful_set.metadata)?;
        self.record(StoreOp::CreateStatefulSet, &k.0, &k.1)?;
        let mut stateful_sets = lock(&self.stateful_sets);
        if stateful_sets.contains_key(&k) {
            return Err(StoreError::AlreadyExists(format!("statefulsets {}", k.1)));
        }
        let mut created = stateful_set.clone();
        self.stamp(&mut created.metadata);
        stateful_sets.insert(k, created.clone());
        Ok(created)
    }

    async fn patch_stateful_set(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<StatefulSet, StoreError> {
        self.record(StoreOp::PatchStatefulSet, namespace, name)?;
        let mut stateful_sets = lock(&self.stateful_sets);
        let existing = stateful_sets
            .get_mut(&key(namespace, name))
            .ok_or_else(|| StoreError::NotFound(format!("statefulsets {}", name)))?;
        let mut doc = serde_json::to_value(&*existing)?;
        merge_patch(&mut doc, patch);
        let mut patched: StatefulSet = serde_json::from_value(doc)?;
        patched.metadata.resource_version = Some(self.next_revision());
        *existing = patched.clone();
        Ok(patched)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, StoreError> {
        self.record(StoreOp::GetService, namespace, name)?;
        Ok(self.service(namespace, name))
    }

    async fn list_services(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Service>, StoreError> {
        self.record(StoreOp::ListServices, namespace, "")?;
        Ok(select(&self.services, namespace, labels, |s| &s.metadata))
    }

    async fn create_service(&self, service: &Service) -> Result<Service, StoreError> {
        let k = key_of(&service.metadata)?;
        self.record(StoreOp::CreateService, &k.0, &k.1)?;
        let mut services = lock(&self.services);
        if services.contains_key(&k) {
            return Err(StoreError::AlreadyExists(format!("services {}", k.1)));
        }
        let mut created = service.clone();
        self.stamp(&mut created.metadata);
        if let Some(spec) = created.spec.as_mut()
            && spec.type_.as_deref() == Some("NodePort")
        {
            for port in spec.ports.iter_mut().flatten() {
                if port.node_port.is_none() {
                    port.node_port =
                        Some(NODE_PORT_BASE + self.next_node_port.fetch_add(1, Ordering::SeqCst));
                }
            }
        }
        services.insert(k, created.clone());
        Ok(created)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.record(StoreOp::DeleteService, namespace, name)?;
        lock(&self.services).remove(&key(namespace, name));
        Ok(())
    }

    async fn delete_claims_by_label(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        self.record(StoreOp::DeleteClaims, namespace, "")?;
        lock(&self.claims)
            .retain(|(ns, _), c| !(ns == namespace && matches(labels, c.metadata.labels.as_ref())));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn node_port_service(name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                labels: Some(labels(&[("svc", "export")])),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                ports: Some(vec![ServicePort {
                    port: 2379,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_service_assigns_node_ports() {
        let store = MockKubeStore::new();
        let a = store.create_service(&node_port_service("a")).await.unwrap();
        let b = store.create_service(&node_port_service("b")).await.unwrap();

        let port = |s: &Service| s.spec.as_ref().unwrap().ports.as_ref().unwrap()[0].node_port;
        assert_eq!(port(&a), Some(30000));
        assert_eq!(port(&b), Some(30001));
    }

    #[tokio::test]
    async fn test_create_existing_returns_already_exists() {
        let store = MockKubeStore::new();
        store.create_service(&node_port_service("a")).await.unwrap();
        let err = store.create_service(&node_port_service("a")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_injected_failure_is_recorded_and_cleared() {
        let store = MockKubeStore::new();
        store.fail(StoreOp::ListServices, "boom");
        let err = store.list_services("default", &BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Injected(ref m) if m == "boom"));
        assert_eq!(store.calls().len(), 1);

        store.clear_failure(StoreOp::ListServices);
        assert!(store.list_services("default", &BTreeMap::new()).await.is_ok());
        assert!(store.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_filters_by_labels_and_namespace() {
        let store = MockKubeStore::new();
        store.add_service(node_port_service("a"));
        let mut other = node_port_service("b");
        other.metadata.namespace = Some("other".to_string());
        store.add_service(other);

        let found = store
            .list_services("default", &labels(&[("svc", "export")]))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        let none = store
            .list_services("default", &labels(&[("svc", "internal")]))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_merge_patch_replaces_and_removes() {
        let mut doc = serde_json::json!({"a": {"b": 1, "c": 2}, "d": [1, 2]});
        merge_patch(&mut doc, &serde_json::json!({"a": {"b": null, "e": 3}, "d": [3]}));
        assert_eq!(doc, serde_json::json!({"a": {"c": 2, "e": 3}, "d": [3]}));
    }
}
