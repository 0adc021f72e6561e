//! KubeStore implementation backed by kube::Client

use crate::error::StoreError;
use crate::selector::label_selector;
use crate::store_trait::KubeStoreTrait;
use crds::{EtcdCluster, EtcdClusterStatus};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Api;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-call deadline used when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Object-store client
///
/// Each call runs on its own task and is raced against `timeout`. A call that
/// loses the race is abandoned rather than cancelled, so the server may still
/// apply it; callers observe `StoreError::Timeout` either way.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
    timeout: Duration,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, kube::Error>> + Send + 'static,
        T: Send + 'static,
    {
        bounded(op, self.timeout, fut).await
    }
}

/// Runs `fut` on a background task and waits at most `timeout` for it.
///
/// On timeout the task is left running; its result is dropped.
async fn bounded<T, F>(op: &'static str, timeout: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, kube::Error>> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(fut);
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result.map_err(StoreError::from),
        Ok(Err(join_err)) => Err(StoreError::Task(join_err.to_string())),
        Err(_elapsed) => {
            warn!("{} did not complete within {:?}; abandoning request", op, timeout);
            Err(StoreError::Timeout { op, after: timeout })
        }
    }
}

fn object_key(meta: &ObjectMeta) -> Result<(String, String), StoreError> {
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

#[async_trait::async_trait]
impl KubeStoreTrait for KubeStore {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<EtcdCluster>, StoreError> {
        let api: Api<EtcdCluster> = self.api(namespace);
        let name = name.to_string();
        self.bounded("get_cluster", async move { api.get_opt(&name).await }).await
    }

    async fn update_cluster(&self, cluster: &EtcdCluster) -> Result<EtcdCluster, StoreError> {
        let (namespace, name) = object_key(&cluster.metadata)?;
        debug!("Updating EtcdCluster {}/{}", namespace, name);
        let api: Api<EtcdCluster> = self.api(&namespace);
        let cluster = cluster.clone();
        self.bounded("update_cluster", async move {
            api.replace(&name, &PostParams::default(), &cluster).await
        })
        .await
    }

    async fn patch_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &EtcdClusterStatus,
    ) -> Result<EtcdCluster, StoreError> {
        let api: Api<EtcdCluster> = self.api(namespace);
        let name = name.to_string();
        let patch = serde_json::json!({ "status": serde_json::to_value(status)? });
        self.bounded("patch_cluster_status", async move {
            api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
        })
        .await
    }

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>, StoreError> {
        let api: Api<StatefulSet> = self.api(namespace);
        let name = name.to_string();
        self.bounded("get_stateful_set", async move { api.get_opt(&name).await })
            .await
    }

    async fn list_stateful_sets(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<StatefulSet>, StoreError> {
        let api: Api<StatefulSet> = self.api(namespace);
        let lp = ListParams::default().labels(&label_selector(labels));
        let list = self
            .bounded("list_stateful_sets", async move { api.list(&lp).await })
            .await?;
        Ok(list.items)
    }

    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, StoreError> {
        let (namespace, _) = object_key(&stateful_set.metadata)?;
        let api: Api<StatefulSet> = self.api(&namespace);
        let stateful_set = stateful_set.clone();
        self.bounded("create_stateful_set", async move {
            api.create(&PostParams::default(), &stateful_set).await
        })
        .await
    }

    async fn patch_stateful_set(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<StatefulSet, StoreError> {
        let api: Api<StatefulSet> = self.api(namespace);
        let name = name.to_string();
        let patch = patch.clone();
        self.bounded("patch_stateful_set", async move {
            api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
        })
        .await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, StoreError> {
        let api: Api<Service> = self.api(namespace);
        let name = name.to_string();
        self.bounded("get_service", async move { api.get_opt(&name).await }).await
    }

    async fn list_services(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Service>, StoreError> {
        let api: Api<Service> = self.api(namespace);
        let lp = ListParams::default().labels(&label_selector(labels));
        let list = self
            .bounded("list_services", async move { api.list(&lp).await })
            .await?;
        Ok(list.items)
    }

    async fn create_service(&self, service: &Service) -> Result<Service, StoreError> {
        let (namespace, _) = object_key(&service.metadata)?;
        let api: Api<Service> = self.api(&namespace);
        let service = service.clone();
        self.bounded("create_service", async move {
            api.create(&PostParams::default(), &service).await
        })
        .await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let api: Api<Service> = self.api(namespace);
        let owned = name.to_string();
        match self
            .bounded("delete_service", async move {
                api.delete(&owned, &DeleteParams::default()).await
            })
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Service {}/{} already gone", namespace, name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_claims_by_label(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let api: Api<PersistentVolumeClaim> = self.api(namespace);
        let lp = ListParams::default().labels(&label_selector(labels));
        match self
            .bounded("delete_claims_by_label", async move {
                api.delete_collection(&DeleteParams::default(), &lp).await
            })
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
