//! Export services
//!
//! One NodePort service per member, named `<cluster>-export-<i>`. The set is
//! grown and pruned to exactly `members` on every pass.

use crate::builder::{PORT_CLIENT_NAME, ResourceBuilder};
use crate::convergence::ensure_service;
use crate::error::ControllerError;
use crate::labels::{LABEL_CR_NAME, LABEL_SEQ_ID, Labels, Ordinal, export_service_labels, export_service_name};
use crds::EtcdCluster;
use k8s_openapi::api::core::v1::Service;
use kube_store::KubeStoreTrait;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Creates missing export services and deletes the ones beyond `members`.
pub async fn sync_export_services(
    store: &dyn KubeStoreTrait,
    owner: &EtcdCluster,
    builder: &ResourceBuilder<'_>,
) -> Result<(), ControllerError> {
    let id = builder.identity();
    let desired: BTreeSet<String> = (0..builder.members())
        .map(|i| export_service_name(builder.name(), i))
        .collect();

    for i in 0..builder.members() {
        let service = builder.export_service(
            &export_service_name(builder.name(), i),
            export_service_labels(id, Ordinal::Member(i)),
            i,
        );
        ensure_service(store, owner, service).await?;
    }

    let existing = store
        .list_services(builder.namespace(), &export_service_labels(id, Ordinal::All))
        .await?;
    for service in existing {
        let Some(name) = service.metadata.name.as_deref() else {
            continue;
        };
        if desired.contains(name) {
            continue;
        }
        info!("Pruning export service {}/{}", builder.namespace(), name);
        store.delete_service(builder.namespace(), name).await?;
    }
    Ok(())
}

/// Node ports of the named port across the selected services, in member order.
pub async fn list_node_ports(
    store: &dyn KubeStoreTrait,
    namespace: &str,
    labels: &Labels,
) -> Result<Vec<i32>, ControllerError> {
    let mut services = store.list_services(namespace, labels).await?;
    services.sort_by_key(|svc| (seq_id(svc), svc.metadata.name.clone()));

    let ports: Vec<i32> = services
        .iter()
        .filter_map(|svc| svc.spec.as_ref()?.ports.as_ref())
        .flatten()
        .filter(|port| port.name.as_deref() == Some(PORT_CLIENT_NAME))
        .filter_map(|port| port.node_port)
        .collect();

    if ports.is_empty() {
        return Err(ControllerError::MissingPorts(format!(
            "{}/{}",
            namespace,
            labels.get(LABEL_CR_NAME).map(String::as_str).unwrap_or_default()
        )));
    }
    debug!("nodePorts: {:?}", ports);
    Ok(ports)
}

fn seq_id(service: &Service) -> u32 {
    service
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(LABEL_SEQ_ID))
        .and_then(|v| v.parse().ok())
        .unwrap_or(u32::MAX)
}
