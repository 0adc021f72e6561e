//! Convergence helpers on top of the object store
//!
//! `ensure_*` creates a child with an owner reference when it is missing and
//! otherwise leaves it alone; whether to patch is the caller's decision.

use crate::error::ControllerError;
use crds::{EtcdCluster, EtcdClusterStatus};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use kube_store::{KubeStoreTrait, StoreError};
use tracing::{debug, info, warn};

/// Result of an ensure call
#[derive(Debug, Clone, PartialEq)]
pub enum Ensured<T> {
    /// The object was missing and has been created
    Created(T),
    /// The object already existed; carries the live copy
    Existing(T),
}

impl<T> Ensured<T> {
    pub fn was_created(&self) -> bool {
        matches!(self, Ensured::Created(_))
    }
}

fn object_key(meta: &ObjectMeta) -> Result<(String, String), ControllerError> {
    match (&meta.namespace, &meta.name) {
        (Some(ns), Some(name)) => Ok((ns.clone(), name.clone())),
        _ => Err(ControllerError::InvalidSpec(
            "child object needs a name and namespace".to_string(),
        )),
    }
}

/// Makes `owner` the controlling owner of `meta`, so the API server
/// cascade-deletes the child together with the cluster.
pub fn set_owner(meta: &mut ObjectMeta, owner: &EtcdCluster) -> Result<(), ControllerError> {
    let owner_ref = owner.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::InvalidSpec("EtcdCluster has no name or uid for an owner reference".to_string())
    })?;
    meta.owner_references = Some(vec![owner_ref]);
    Ok(())
}

pub async fn ensure_service(
    store: &dyn KubeStoreTrait,
    owner: &EtcdCluster,
    mut desired: Service,
) -> Result<Ensured<Service>, ControllerError> {
    let (namespace, name) = object_key(&desired.metadata)?;
    if let Some(live) = store.get_service(&namespace, &name).await? {
        return Ok(Ensured::Existing(live));
    }

    set_owner(&mut desired.metadata, owner)?;
    match store.create_service(&desired).await {
        Ok(created) => {
            info!("Created Service {}/{}", namespace, name);
            Ok(Ensured::Created(created))
        }
        Err(StoreError::AlreadyExists(_)) => {
            debug!("Service {}/{} created concurrently", namespace, name);
            Ok(Ensured::Existing(desired))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn ensure_stateful_set(
    store: &dyn KubeStoreTrait,
    owner: &EtcdCluster,
    mut desired: StatefulSet,
) -> Result<Ensured<StatefulSet>, ControllerError> {
    let (namespace, name) = object_key(&desired.metadata)?;
    if let Some(live) = store.get_stateful_set(&namespace, &name).await? {
        return Ok(Ensured::Existing(live));
    }

    set_owner(&mut desired.metadata, owner)?;
    match store.create_stateful_set(&desired).await {
        Ok(created) => {
            info!("Created StatefulSet {}/{}", namespace, name);
            Ok(Ensured::Created(created))
        }
        Err(StoreError::AlreadyExists(_)) => {
            debug!("StatefulSet {}/{} created concurrently", namespace, name);
            Ok(Ensured::Existing(desired))
        }
        Err(e) => Err(e.into()),
    }
}

/// Pod spec fields the builder leaves out when the cluster does not set them.
const CLEARABLE_POD_FIELDS: &[&str] = &[
    "imagePullSecrets",
    "serviceAccountName",
    "hostAliases",
    "restartPolicy",
    "nodeSelector",
    "tolerations",
    "volumes",
];

/// Merge patch carrying the desired labels, annotations and spec only.
///
/// Omitted keys are left untouched by a merge patch, so every clearable pod
/// field missing from `desired` is sent as an explicit `null`.
pub fn stateful_set_patch(desired: &StatefulSet) -> serde_json::Value {
    let mut patch = serde_json::json!({
        "metadata": {
            "labels": desired.metadata.labels,
            "annotations": desired.metadata.annotations,
        },
        "spec": desired.spec,
    });
    if let Some(pod_spec) = patch
        .pointer_mut("/spec/template/spec")
        .and_then(serde_json::Value::as_object_mut)
    {
        for field in CLEARABLE_POD_FIELDS {
            pod_spec
                .entry(field.to_string())
                .or_insert(serde_json::Value::Null);
        }
    }
    patch
}

pub async fn patch_stateful_set(
    store: &dyn KubeStoreTrait,
    desired: &StatefulSet,
) -> Result<StatefulSet, ControllerError> {
    let (namespace, name) = object_key(&desired.metadata)?;
    let patched = store
        .patch_stateful_set(&namespace, &name, &stateful_set_patch(desired))
        .await?;
    info!("Patched StatefulSet {}/{}", namespace, name);
    Ok(patched)
}

/// Writes the status subresource, falling back to a full-object update.
pub async fn write_status(
    store: &dyn KubeStoreTrait,
    cluster: &EtcdCluster,
    status: &EtcdClusterStatus,
) -> Result<EtcdCluster, ControllerError> {
    let (namespace, name) = object_key(&cluster.metadata)?;
    match store.patch_cluster_status(&namespace, &name, status).await {
        Ok(updated) => Ok(updated),
        Err(e) => {
            warn!("Status patch for {}/{} failed ({}), falling back to update", namespace, name, e);
            let mut full = cluster.clone();
            full.status = Some(status.clone());
            Ok(store.update_cluster(&full).await?)
        }
    }
}
