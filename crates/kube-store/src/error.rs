//! Object-store errors

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when talking to the Kubernetes API server
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create raced with another writer
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic-concurrency conflict on resourceVersion
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Call did not complete within the store timeout. The request may still
    /// land on the server after this error is returned.
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    /// Any other Kubernetes client error
    #[error("Kubernetes error: {0}")]
    Kube(kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object is missing a field the call needs (name, namespace)
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Background request task failed to join
    #[error("Request task failed: {0}")]
    Task(String),

    /// Failure injected by the mock store
    #[error("Injected failure: {0}")]
    Injected(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    /// Transient errors that a later reconcile may clear
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict(_)
                | StoreError::Timeout { .. }
                | StoreError::Kube(_)
                | StoreError::Task(_)
                | StoreError::Injected(_)
        )
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        if let kube::Error::Api(resp) = &err {
            match resp.code {
                404 => return StoreError::NotFound(resp.message.clone()),
                409 if resp.reason == "AlreadyExists" => {
                    return StoreError::AlreadyExists(resp.message.clone());
                }
                409 => return StoreError::Conflict(resp.message.clone()),
                _ => {}
            }
        }
        StoreError::Kube(err)
    }
}
