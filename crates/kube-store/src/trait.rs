//! KubeStore trait for mocking
//!
//! This trait abstracts the object-store calls the operator makes so that
//! reconciliation can be unit tested against an in-memory store.

use crate::error::StoreError;
use crds::{EtcdCluster, EtcdClusterStatus};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use std::collections::BTreeMap;

/// Object-store operations used by the etcd operator
///
/// `get_*` calls return `Ok(None)` for absent objects. Deletes treat an
/// already-absent object as success. All methods must be `Send` to work with
/// Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait KubeStoreTrait: Send + Sync {
    // EtcdCluster
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<EtcdCluster>, StoreError>;
    /// Full-object update, subject to resourceVersion conflict detection
    async fn update_cluster(&self, cluster: &EtcdCluster) -> Result<EtcdCluster, StoreError>;
    /// Merge-patches the status subresource
    async fn patch_cluster_status(&self, namespace: &str, name: &str, status: &EtcdClusterStatus) -> Result<EtcdCluster, StoreError>;

    // StatefulSet
    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>, StoreError>;
    async fn list_stateful_sets(&self, namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<StatefulSet>, StoreError>;
    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, StoreError>;
    /// JSON merge patch; only the fields present in `patch` are touched
    async fn patch_stateful_set(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<StatefulSet, StoreError>;

    // Service
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, StoreError>;
    async fn list_services(&self, namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<Service>, StoreError>;
    async fn create_service(&self, service: &Service) -> Result<Service, StoreError>;
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    // PersistentVolumeClaim
    /// Namespaced delete-collection by label selector
    async fn delete_claims_by_label(&self, namespace: &str, labels: &BTreeMap<String, String>) -> Result<(), StoreError>;
}
