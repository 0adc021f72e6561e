//! Main controller implementation.
//!
//! Wires the object store, reconciler, watcher and metrics endpoint together
//! and runs them until one of them exits.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use kube::Client;
use kube_store::KubeStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for EtcdCluster resources.
pub struct Controller {
    cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates the controller and starts its tasks.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing etcd controller");

        let client = Client::try_default().await?;
        let store = KubeStore::new(client.clone()).with_timeout(config.store_timeout);
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new()?);

        let reconciler = Arc::new(Reconciler::new(Arc::new(store), config.clone()));
        let watcher = Watcher::new(client, reconciler, metrics.clone());

        let cluster_watcher = tokio::spawn(async move { watcher.watch_clusters().await });
        let metrics_server = {
            let addr = config.metrics_bind_address;
            tokio::spawn(async move { metrics::serve(addr, metrics).await })
        };

        Ok(Self {
            cluster_watcher,
            metrics_server,
        })
    }

    /// Runs the controller.
    ///
    /// Both tasks are expected to run forever; the first one to exit takes
    /// the controller down with it.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("etcd controller running");

        tokio::select! {
            result = &mut self.cluster_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("EtcdCluster watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("EtcdCluster watcher error: {}", e)))?;
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Watch(format!("metrics server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
