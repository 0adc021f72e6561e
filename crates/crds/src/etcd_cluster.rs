//! EtcdCluster CRD
//!
//! Declares the desired shape of one etcd cluster: member count, resource
//! quotas, image, and pod-level overrides. The operator converges a
//! StatefulSet, a headless Service, one NodePort Service per member and
//! (optionally) PersistentVolumeClaims from it.

use k8s_openapi::api::core::v1::{
    Affinity, EnvVar, HostAlias, LocalObjectReference, PodSecurityContext, Toleration,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "etcd.microscaler.io",
    version = "v1alpha1",
    kind = "EtcdCluster",
    shortname = "etcd",
    namespaced,
    status = "EtcdClusterStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"ConnectAddr","type":"string","jsonPath":".status.connectAddr"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EtcdClusterSpec {
    /// Number of etcd members. Immutable after creation.
    #[serde(default)]
    pub members: u32,

    /// Host rendered into `status.connectAddr` together with each member's node port
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub external_host: String,

    /// CPU quota (limits and requests), e.g. "500m". Empty means unbounded.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu: String,

    /// Memory quota (limits and requests), e.g. "1Gi". Empty means unbounded.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memory: String,

    /// Storage quota per member. Empty selects an ephemeral emptyDir volume.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage: String,

    /// Storage class for the per-member claims
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage_class_name: String,

    /// Container image
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// Image pull policy ("Always", "IfNotPresent", "Never")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Instance environment. Only allow-listed keys reach the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Pod-level overrides copied onto the member pod template
    #[serde(default)]
    pub pod_spec: PodOverrides,
}

/// Subset of the core/v1 PodSpec that users may override.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodOverrides {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_aliases: Vec<HostAlias>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,

    /// When set, replaces the default soft anti-affinity between members
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdClusterStatus {
    /// Aggregated readiness of the members
    pub status: ClusterState,

    /// Comma-separated `host:nodePort` list, one entry per member
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connect_addr: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ClusterCondition>,
}

/// Cluster readiness
///
/// Serializes as PascalCase ("Ready", "PartialReady", ...) to match the
/// printer column and what users grep for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ClusterState {
    /// Every declared replica is ready
    Ready,

    /// Some, but not all, replicas are ready
    PartialReady,

    /// No replica is ready
    Failed,

    /// Readiness could not be determined
    #[default]
    Unknown,
}

impl ClusterState {
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterState::Ready => "Ready",
            ClusterState::PartialReady => "PartialReady",
            ClusterState::Failed => "Failed",
            ClusterState::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status condition, shaped like metav1.Condition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    #[serde(rename = "type")]
    pub type_: String,

    /// "True", "False" or "Unknown"
    pub status: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
}
