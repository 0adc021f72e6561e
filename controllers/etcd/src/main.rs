//! etcd Controller
//!
//! Converges `EtcdCluster` resources into a StatefulSet, a headless Service,
//! one NodePort Service per member and (with storage) per-member claims, and
//! reports readiness and the external connect address in the status.

mod backoff;
mod builder;
mod config;
mod controller;
mod convergence;
mod error;
mod finalizer;
mod fingerprint;
mod labels;
mod metrics;
mod reconciler;
mod retry;
mod services;
mod status;
mod watcher;

#[cfg(test)]
mod builder_test;
mod test_utils;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }

    info!("Starting etcd Controller");

    let config = OperatorConfig::from_env()?;
    info!("Configuration:");
    info!("  Default image: {}", config.image);
    info!("  External domain: {}", config.external_domain);
    info!(
        "  Namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all namespaces")
    );
    info!("  Metrics: {}", config.metrics_bind_address);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
