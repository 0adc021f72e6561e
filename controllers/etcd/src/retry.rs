//! Reconcile outcome classification
//!
//! Every invocation ends in exactly one [`RetryDecision`]. An expected wait
//! ("members not ready yet") is a [`ReconcileOutcome::Requeue`], not an error,
//! so it never shows up in error counts.

use crate::error::ControllerError;
use std::time::Duration;
use tracing::{debug, error};

/// Fixed requeue cadence for both waits and errors
pub const REQUEUE_AFTER: Duration = Duration::from_secs(3);

/// Successful result of a reconcile pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Converged; nothing to do until the next change
    Done,
    /// Not converged yet, but nothing failed
    Requeue { after: Duration, reason: String },
}

impl ReconcileOutcome {
    pub fn requeue(reason: impl Into<String>) -> Self {
        ReconcileOutcome::Requeue {
            after: REQUEUE_AFTER,
            reason: reason.into(),
        }
    }
}

/// What the scheduler should do after an invocation
#[derive(Debug)]
pub struct RetryDecision {
    pub requeue: bool,
    pub after: Duration,
    pub error: Option<ControllerError>,
}

impl RetryDecision {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Label used for the reconcile outcome metric
    pub fn outcome_label(&self) -> &'static str {
        match (self.requeue, self.error.is_some()) {
            (_, true) => "error",
            (true, false) => "requeue",
            (false, false) => "done",
        }
    }
}

/// Maps a reconcile result onto a retry decision, logging it once.
pub fn classify(result: Result<ReconcileOutcome, ControllerError>) -> RetryDecision {
    match result {
        Ok(ReconcileOutcome::Done) => RetryDecision {
            requeue: false,
            after: Duration::ZERO,
            error: None,
        },
        Ok(ReconcileOutcome::Requeue { after, reason }) => {
            debug!("Requeue in {:?}: {}", after, reason);
            RetryDecision {
                requeue: true,
                after,
                error: None,
            }
        }
        Err(e) => {
            error!(transient = e.is_transient(), "Reconcile failed: {}", e);
            RetryDecision {
                requeue: true,
                after: REQUEUE_AFTER,
                error: Some(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_does_not_requeue() {
        let decision = classify(Ok(ReconcileOutcome::Done));
        assert!(!decision.requeue);
        assert!(!decision.is_error());
        assert_eq!(decision.outcome_label(), "done");
    }

    #[test]
    fn test_wait_requeues_without_error() {
        let decision = classify(Ok(ReconcileOutcome::requeue("cluster is PartialReady")));
        assert!(decision.requeue);
        assert_eq!(decision.after, Duration::from_secs(3));
        assert!(!decision.is_error());
        assert_eq!(decision.outcome_label(), "requeue");
    }

    #[test]
    fn test_error_requeues_with_error() {
        let decision = classify(Err(ControllerError::Reconciliation("boom".to_string())));
        assert!(decision.requeue);
        assert_eq!(decision.after, Duration::from_secs(3));
        assert!(decision.is_error());
        assert_eq!(decision.outcome_label(), "error");
    }
}
