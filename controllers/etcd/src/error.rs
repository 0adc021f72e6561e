//! Controller-specific error types.
//!
//! Store failures keep their `StoreError` so the retry classifier can tell a
//! transient conflict from a defect. Expected waits ("members not ready yet")
//! are not errors at all; see `ReconcileOutcome`.

use kube::Error as KubeError;
use kube_store::StoreError;
use thiserror::Error;

/// Errors that can occur in the etcd controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Backing object-store call failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Kubernetes client error outside the store (client construction, watch)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid operator configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Spec could not be turned into child objects
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// No export service reports a node port for the client port
    #[error("No node ports found on export services of {0}")]
    MissingPorts(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metric registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Metrics endpoint could not bind or serve
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),
}

impl ControllerError {
    /// Errors that a later reconcile is expected to clear on its own
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerError::Store(e) => e.is_retryable(),
            ControllerError::Kube(_) | ControllerError::MissingPorts(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_store_timeout_is_transient() {
        let err = ControllerError::from(StoreError::Timeout {
            op: "get_cluster",
            after: Duration::from_secs(10),
        });
        assert!(err.is_transient());
    }

    #[test]
    fn test_invalid_spec_is_not_transient() {
        assert!(!ControllerError::InvalidSpec("bad quantity".to_string()).is_transient());
    }
}
