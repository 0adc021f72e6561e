//! Desired child objects for one EtcdCluster
//!
//! Everything here is pure: the same cluster and configuration always produce
//! the same objects. Owner references are attached later, on create.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::fingerprint::{SPEC_HASH_ANNOTATION, fingerprint};
use crate::labels::{ClusterIdentity, Labels, Ordinal, base_labels, member_labels, pod_name};
use crds::EtcdCluster;
use crds::env::{DEBUG, EMPTY, get_env, merge_env, plain};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, ObjectFieldSelector,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodAffinityTerm, PodAntiAffinity,
    PodSecurityContext, PodSpec, PodTemplateSpec, Probe, ResourceRequirements, Service,
    ServicePort, ServiceSpec, TCPSocketAction, Volume, VolumeMount, VolumeResourceRequirements,
    WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;
use tracing::debug;

pub const CONTAINER_NAME: &str = "etcd";
pub const PORT_CLIENT_NAME: &str = "client";
pub const PORT_PEER_NAME: &str = "peer";
pub const PORT_CLIENT: i32 = 2379;
pub const PORT_PEER: i32 = 2380;

pub const DATA_VOLUME: &str = "data";
pub const DATA_MOUNT_PATH: &str = "/var/run/etcd";
const RUN_AS_USER: i64 = 1000;
const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";
const ANTI_AFFINITY_WEIGHT: i32 = 50;

/// Instance env keys that are passed through to the container
const PASS_THROUGH_ENV: &[&str] = &[DEBUG];

/// Bootstrap script; `{service}` is the headless service, `{peers}` the
/// initial cluster membership.
const ETCD_COMMAND: &str = r#"
SERVICE={service}
PEERS="{peers}"
exec etcd --name ${HOSTNAME} \
--listen-client-urls http://0.0.0.0:2379 \
--listen-peer-urls http://0.0.0.0:2380 \
--advertise-client-urls http://${HOSTNAME}.${SERVICE}:2379 \
--initial-advertise-peer-urls http://${HOSTNAME}.${SERVICE}:2380 \
--initial-cluster-token ${SERVICE} \
--initial-cluster ${PEERS} \
--initial-cluster-state new \
--data-dir /var/run/etcd/default.etcd
"#;

/// Probe timing, in seconds
#[derive(Debug, Clone, Copy)]
struct ProbeTiming {
    initial_delay: i32,
    timeout: i32,
    period: i32,
    failure_threshold: i32,
}

const READINESS: ProbeTiming = ProbeTiming {
    initial_delay: 0,
    timeout: 10,
    period: 10,
    failure_threshold: 3,
};

const LIVENESS: ProbeTiming = ProbeTiming {
    initial_delay: 180,
    timeout: 10,
    period: 30,
    failure_threshold: 10,
};

/// Builds the desired child objects of one cluster.
#[derive(Debug, Clone, Copy)]
pub struct ResourceBuilder<'a> {
    cluster: &'a EtcdCluster,
    config: &'a OperatorConfig,
    name: &'a str,
    namespace: &'a str,
    uid: &'a str,
}

impl<'a> ResourceBuilder<'a> {
    /// Fails if the cluster has no name, namespace or uid yet.
    pub fn new(cluster: &'a EtcdCluster, config: &'a OperatorConfig) -> Result<Self, ControllerError> {
        let meta = &cluster.metadata;
        let missing = |field: &str| ControllerError::InvalidSpec(format!("EtcdCluster has no metadata.{}", field));
        Ok(Self {
            cluster,
            config,
            name: meta.name.as_deref().ok_or_else(|| missing("name"))?,
            namespace: meta.namespace.as_deref().ok_or_else(|| missing("namespace"))?,
            uid: meta.uid.as_deref().ok_or_else(|| missing("uid"))?,
        })
    }

    pub fn identity(&self) -> ClusterIdentity<'a> {
        ClusterIdentity {
            name: self.name,
            uid: self.uid,
        }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn namespace(&self) -> &'a str {
        self.namespace
    }

    pub fn members(&self) -> u32 {
        self.cluster.spec.members
    }

    pub fn image(&self) -> &'a str {
        non_empty_or(&self.cluster.spec.image, &self.config.image)
    }

    pub fn storage_class_name(&self) -> &'a str {
        non_empty_or(&self.cluster.spec.storage_class_name, &self.config.storage_class_name)
    }

    pub fn external_host(&self) -> &'a str {
        non_empty_or(&self.cluster.spec.external_host, &self.config.external_domain)
    }

    fn meta(&self, name: &str, labels: Labels) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        }
    }

    /// The member StatefulSet, annotated with its spec fingerprint
    pub fn stateful_set(&self) -> Result<StatefulSet, ControllerError> {
        let spec = &self.cluster.spec;
        let overrides = &spec.pod_spec;
        let labels = member_labels(self.identity(), Ordinal::All);
        let replicas = i32::try_from(spec.members)
            .map_err(|_| ControllerError::InvalidSpec(format!("members {} out of range", spec.members)))?;

        let container = Container {
            name: CONTAINER_NAME.to_string(),
            image: Some(self.image().to_string()),
            image_pull_policy: spec.image_pull_policy.clone(),
            command: Some(self.command()),
            env: Some(self.env()),
            resources: Some(ResourceRequirements {
                limits: self.resource_quota(),
                requests: self.resource_quota(),
                ..Default::default()
            }),
            volume_mounts: Some(vec![VolumeMount {
                name: DATA_VOLUME.to_string(),
                mount_path: DATA_MOUNT_PATH.to_string(),
                ..Default::default()
            }]),
            readiness_probe: Some(tcp_probe(PORT_CLIENT, READINESS)),
            liveness_probe: Some(tcp_probe(PORT_CLIENT, LIVENESS)),
            ..Default::default()
        };

        let (volumes, claim_templates) = match self.cluster.spec.storage.as_str() {
            "" => (
                Some(vec![Volume {
                    name: DATA_VOLUME.to_string(),
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Default::default()
                }]),
                None,
            ),
            storage => (None, Some(vec![self.pvc(DATA_VOLUME, storage)])),
        };

        let pod_spec = PodSpec {
            containers: vec![container],
            security_context: Some(overrides.security_context.clone().unwrap_or_else(|| {
                PodSecurityContext {
                    run_as_user: Some(RUN_AS_USER),
                    ..Default::default()
                }
            })),
            image_pull_secrets: non_empty(spec.image_pull_secrets.clone()),
            service_account_name: spec.service_account_name.clone(),
            host_aliases: non_empty(overrides.host_aliases.clone()),
            restart_policy: overrides.restart_policy.clone(),
            node_selector: (!overrides.node_selector.is_empty()).then(|| overrides.node_selector.clone()),
            affinity: Some(self.affinity()),
            tolerations: non_empty(overrides.tolerations.clone()),
            volumes,
            ..Default::default()
        };

        let sts_spec = StatefulSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            service_name: self.name.to_string().into(),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            volume_claim_templates: claim_templates,
            ..Default::default()
        };

        let mut meta = self.meta(self.name, labels);
        meta.annotations = Some(BTreeMap::from([(
            SPEC_HASH_ANNOTATION.to_string(),
            fingerprint(&sts_spec)?,
        )]));

        Ok(StatefulSet {
            metadata: meta,
            spec: Some(sts_spec),
            status: None,
        })
    }

    /// Headless service giving every member a stable DNS name
    pub fn headless_service(&self) -> Service {
        let labels = member_labels(self.identity(), Ordinal::All);
        Service {
            metadata: self.meta(self.name, labels.clone()),
            spec: Some(ServiceSpec {
                cluster_ip: Some("None".to_string()),
                ports: Some(vec![
                    service_port(PORT_CLIENT_NAME, PORT_CLIENT),
                    service_port(PORT_PEER_NAME, PORT_PEER),
                ]),
                selector: Some(labels),
                ..Default::default()
            }),
            status: None,
        }
    }

    /// NodePort service exposing the client port of exactly one member
    pub fn export_service(&self, name: &str, labels: Labels, ordinal: u32) -> Service {
        Service {
            metadata: self.meta(name, labels),
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                ports: Some(vec![service_port(PORT_CLIENT_NAME, PORT_CLIENT)]),
                selector: Some(member_labels(self.identity(), Ordinal::Member(ordinal))),
                ..Default::default()
            }),
            status: None,
        }
    }

    /// Claim template for the member data volume
    pub fn pvc(&self, name: &str, storage: &str) -> PersistentVolumeClaim {
        let storage_class = self.storage_class_name();
        if !storage_class.is_empty() {
            debug!("PVC storageClassName: {}", storage_class);
        }
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(base_labels(self.identity())),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: (!storage_class.is_empty()).then(|| storage_class.to_string()),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(storage.to_string()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: None,
        }
    }

    /// Fixed entries followed by the allow-listed instance env.
    ///
    /// Instance env is the spec env with the operator defaults merged under
    /// it. Blank and `EMPTY` values are dropped.
    pub fn env(&self) -> Vec<EnvVar> {
        let mut env = vec![EnvVar {
            name: "POD_NAME".to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.name".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }];

        let instance = merge_env(&self.cluster.spec.env, &self.config.instance_env);
        for key in PASS_THROUGH_ENV {
            let value = get_env(&instance, key);
            if value.is_empty() || value == EMPTY {
                continue;
            }
            env.push(plain(key, value));
        }
        env
    }

    pub fn command(&self) -> Vec<String> {
        let script = ETCD_COMMAND
            .replacen("{service}", self.name, 1)
            .replacen("{peers}", &self.initial_cluster(), 1);
        vec!["sh".to_string(), "-c".to_string(), script]
    }

    /// `<pod>=http://<pod>.<service>:2380` for every member, ordinal ascending
    pub fn initial_cluster(&self) -> String {
        (0..self.members())
            .map(|i| {
                let pod = pod_name(self.name, i);
                format!("{pod}=http://{pod}.{svc}:{port}", svc = self.name, port = PORT_PEER)
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Identical limits and requests; `None` when neither quota is set
    pub fn resource_quota(&self) -> Option<BTreeMap<String, Quantity>> {
        let spec = &self.cluster.spec;
        let mut quota = BTreeMap::new();
        if !spec.cpu.is_empty() {
            quota.insert("cpu".to_string(), Quantity(spec.cpu.clone()));
        }
        if !spec.memory.is_empty() {
            quota.insert("memory".to_string(), Quantity(spec.memory.clone()));
        }
        (!quota.is_empty()).then_some(quota)
    }

    /// The user's affinity, or a soft preference to spread members over hosts
    pub fn affinity(&self) -> Affinity {
        if let Some(affinity) = &self.cluster.spec.pod_spec.affinity {
            return affinity.clone();
        }
        Affinity {
            pod_anti_affinity: Some(PodAntiAffinity {
                preferred_during_scheduling_ignored_during_execution: Some(vec![
                    WeightedPodAffinityTerm {
                        weight: ANTI_AFFINITY_WEIGHT,
                        pod_affinity_term: PodAffinityTerm {
                            label_selector: Some(LabelSelector {
                                match_labels: Some(member_labels(self.identity(), Ordinal::All)),
                                ..Default::default()
                            }),
                            topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                            ..Default::default()
                        },
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn non_empty_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() { default } else { value }
}

fn non_empty<T>(v: Vec<T>) -> Option<Vec<T>> {
    (!v.is_empty()).then_some(v)
}

fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn tcp_probe(port: i32, timing: ProbeTiming) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(timing.initial_delay),
        timeout_seconds: Some(timing.timeout),
        period_seconds: Some(timing.period),
        failure_threshold: Some(timing.failure_threshold),
        ..Default::default()
    }
}
