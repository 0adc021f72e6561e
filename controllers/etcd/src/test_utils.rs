//! Test utilities for unit testing the reconciler
//!
//! This module provides helpers for creating test clusters and a reconciler
//! wired to an in-memory store.

#[cfg(test)]
use crate::config::OperatorConfig;
#[cfg(test)]
use crate::reconciler::Reconciler;
#[cfg(test)]
use crds::{EtcdCluster, EtcdClusterSpec};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use kube_store::MockKubeStore;
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
pub const TEST_NAMESPACE: &str = "default";

/// Helper to create a test EtcdCluster with a uid, as the API server would
#[cfg(test)]
pub fn create_test_cluster(name: &str, members: u32) -> EtcdCluster {
    EtcdCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            uid: Some(format!("uid-{}", name)),
            ..Default::default()
        },
        spec: EtcdClusterSpec {
            members,
            external_host: "etcd.example.com".to_string(),
            ..Default::default()
        },
        status: None,
    }
}

/// Operator configuration with the built-in defaults
#[cfg(test)]
pub fn test_config() -> OperatorConfig {
    OperatorConfig::default()
}

/// Reconciler backed by `store`, sharing it so tests can inspect calls
#[cfg(test)]
pub fn create_test_reconciler(store: &MockKubeStore) -> Reconciler {
    Reconciler::new(Arc::new(store.clone()), Arc::new(test_config()))
}
