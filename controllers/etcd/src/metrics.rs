//! Prometheus metrics and probe endpoints.
//!
//! # Metrics
//! - `etcd_operator_reconcile_total{outcome}` - reconcile invocations by outcome
//!   (`done`, `requeue`, `error`). A wait for members is a `requeue`.
//! - `etcd_operator_reconcile_duration_seconds` - wall time of one invocation

use crate::error::ControllerError;
use crate::retry::RetryDecision;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

const DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

pub struct Metrics {
    registry: Registry,
    pub reconcile_total: IntCounterVec,
    pub reconcile_duration: Histogram,
    ready: AtomicBool,
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("etcd_operator_reconcile_total", "Reconcile invocations by outcome"),
            &["outcome"],
        )?;
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new(
                "etcd_operator_reconcile_duration_seconds",
                "Duration of one reconcile invocation",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_duration,
            ready: AtomicBool::new(false),
        })
    }

    pub fn observe(&self, decision: &RetryDecision, elapsed: Duration) {
        self.reconcile_total
            .with_label_values(&[decision.outcome_label()])
            .inc();
        self.reconcile_duration.observe(elapsed.as_secs_f64());
    }

    /// Flips `/readyz` to OK once the watcher is running
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Encode all metrics in Prometheus text format
    pub fn encode(&self) -> Result<String, ControllerError> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            warn!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    if metrics.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(metrics)
}

pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving metrics and probes on {}", addr);
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{ReconcileOutcome, classify};
    use axum::response::Response;

    #[test]
    fn test_wait_is_counted_as_requeue() {
        let metrics = Metrics::new().unwrap();
        metrics.observe(&classify(Ok(ReconcileOutcome::requeue("waiting"))), Duration::from_millis(20));
        metrics.observe(&classify(Ok(ReconcileOutcome::Done)), Duration::from_millis(20));
        metrics.observe(
            &classify(Err(ControllerError::Reconciliation("boom".to_string()))),
            Duration::from_millis(20),
        );

        let count = |outcome: &str| metrics.reconcile_total.with_label_values(&[outcome]).get();
        assert_eq!(count("requeue"), 1);
        assert_eq!(count("done"), 1);
        assert_eq!(count("error"), 1);
        assert_eq!(metrics.reconcile_duration.get_sample_count(), 3);
    }

    #[test]
    fn test_encode_exposes_metric_names() {
        let metrics = Metrics::new().unwrap();
        metrics.observe(&classify(Ok(ReconcileOutcome::Done)), Duration::from_millis(5));
        let text = metrics.encode().unwrap();
        assert!(text.contains("etcd_operator_reconcile_total{outcome=\"done\"} 1"));
        assert!(text.contains("etcd_operator_reconcile_duration_seconds_count 1"));
    }

    #[tokio::test]
    async fn test_readyz_follows_ready_flag() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let status = |r: Response| r.status();

        assert_eq!(
            status(readyz(State(metrics.clone())).await.into_response()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        metrics.mark_ready();
        assert_eq!(status(readyz(State(metrics.clone())).await.into_response()), StatusCode::OK);
        assert_eq!(status(healthz().await.into_response()), StatusCode::OK);
    }
}
