//! Unit tests for the resource builder

#[cfg(test)]
mod tests {
    use crate::builder::*;
    use crate::config::OperatorConfig;
    use crate::fingerprint::SPEC_HASH_ANNOTATION;
    use crate::labels::{LABEL_POD_NAME, LABEL_ROLE};
    use crate::test_utils::*;
    use crds::env::{DEBUG, EMPTY, plain};
    use k8s_openapi::api::apps::v1::StatefulSet;
    use k8s_openapi::api::core::v1::{Affinity, Container, NodeAffinity};
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    fn container(sts: &StatefulSet) -> &Container {
        &sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
    }

    fn spec_hash(sts: &StatefulSet) -> String {
        sts.metadata.annotations.as_ref().unwrap()[SPEC_HASH_ANNOTATION].clone()
    }

    #[test]
    fn test_builder_requires_uid() {
        let mut cluster = create_test_cluster("demo", 3);
        cluster.metadata.uid = None;
        let config = test_config();
        assert!(ResourceBuilder::new(&cluster, &config).is_err());
    }

    #[test]
    fn test_stateful_set_shape() {
        let cluster = create_test_cluster("demo", 3);
        let config = test_config();
        let sts = ResourceBuilder::new(&cluster, &config).unwrap().stateful_set().unwrap();

        let spec = sts.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(3));
        let selector = spec.selector.match_labels.as_ref().unwrap();
        assert_eq!(selector.get(LABEL_ROLE).map(String::as_str), Some("etcd"));
        assert!(!selector.contains_key(LABEL_POD_NAME));

        let c = container(&sts);
        assert_eq!(c.name, CONTAINER_NAME);
        assert_eq!(c.image.as_deref(), Some("bitnami/etcd:3"));
        assert_eq!(c.volume_mounts.as_ref().unwrap()[0].mount_path, DATA_MOUNT_PATH);

        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.security_context.as_ref().unwrap().run_as_user, Some(1000));
        assert!(!spec_hash(&sts).is_empty());
    }

    #[test]
    fn test_probes() {
        let cluster = create_test_cluster("demo", 3);
        let config = test_config();
        let sts = ResourceBuilder::new(&cluster, &config).unwrap().stateful_set().unwrap();
        let c = container(&sts);

        let readiness = c.readiness_probe.as_ref().unwrap();
        assert_eq!(readiness.tcp_socket.as_ref().unwrap().port, IntOrString::Int(PORT_CLIENT));
        assert_eq!(readiness.initial_delay_seconds, Some(0));
        assert_eq!(readiness.timeout_seconds, Some(10));
        assert_eq!(readiness.period_seconds, Some(10));
        assert_eq!(readiness.failure_threshold, Some(3));

        let liveness = c.liveness_probe.as_ref().unwrap();
        assert_eq!(liveness.initial_delay_seconds, Some(180));
        assert_eq!(liveness.timeout_seconds, Some(10));
        assert_eq!(liveness.period_seconds, Some(30));
        assert_eq!(liveness.failure_threshold, Some(10));
    }

    #[test]
    fn test_initial_cluster_is_ordered_without_trailing_comma() {
        let cluster = create_test_cluster("demo", 3);
        let config = test_config();
        let builder = ResourceBuilder::new(&cluster, &config).unwrap();
        assert_eq!(
            builder.initial_cluster(),
            "demo-0=http://demo-0.demo:2380,demo-1=http://demo-1.demo:2380,demo-2=http://demo-2.demo:2380"
        );

        let command = builder.command();
        assert_eq!(command[..2], ["sh".to_string(), "-c".to_string()]);
        assert!(command[2].contains("SERVICE=demo\n"));
        assert!(command[2].contains("PEERS=\"demo-0=http://demo-0.demo:2380,"));
        assert!(command[2].contains("--initial-cluster-state new"));
    }

    #[test]
    fn test_storage_selects_claim_template() {
        let mut cluster = create_test_cluster("demo", 3);
        cluster.spec.storage = "1Gi".to_string();
        let config = OperatorConfig {
            storage_class_name: "fast".to_string(),
            ..test_config()
        };
        let sts = ResourceBuilder::new(&cluster, &config).unwrap().stateful_set().unwrap();
        let spec = sts.spec.as_ref().unwrap();

        assert!(spec.template.spec.as_ref().unwrap().volumes.is_none());
        let claims = spec.volume_claim_templates.as_ref().unwrap();
        assert_eq!(claims.len(), 1);
        let claim = claims[0].spec.as_ref().unwrap();
        assert_eq!(claim.access_modes.as_deref(), Some(&["ReadWriteOnce".to_string()][..]));
        assert_eq!(claim.storage_class_name.as_deref(), Some("fast"));
        let requests = claim.resources.as_ref().unwrap().requests.as_ref().unwrap();
        assert_eq!(requests["storage"].0, "1Gi");
    }

    #[test]
    fn test_no_storage_selects_empty_dir() {
        let cluster = create_test_cluster("demo", 3);
        let config = test_config();
        let sts = ResourceBuilder::new(&cluster, &config).unwrap().stateful_set().unwrap();
        let spec = sts.spec.as_ref().unwrap();

        assert!(spec.volume_claim_templates.is_none());
        let volumes = spec.template.spec.as_ref().unwrap().volumes.as_ref().unwrap();
        assert_eq!(volumes[0].name, DATA_VOLUME);
        assert!(volumes[0].empty_dir.is_some());
    }

    #[test]
    fn test_resource_quota_only_when_set() {
        let mut cluster = create_test_cluster("demo", 3);
        let config = test_config();
        assert!(ResourceBuilder::new(&cluster, &config).unwrap().resource_quota().is_none());

        cluster.spec.cpu = "500m".to_string();
        let sts = ResourceBuilder::new(&cluster, &config).unwrap().stateful_set().unwrap();
        let resources = container(&sts).resources.as_ref().unwrap();
        assert_eq!(resources.limits, resources.requests);
        let limits = resources.limits.as_ref().unwrap();
        assert_eq!(limits["cpu"].0, "500m");
        assert!(!limits.contains_key("memory"));
    }

    #[test]
    fn test_env_allow_list_and_defaults() {
        let mut cluster = create_test_cluster("demo", 3);
        cluster.spec.env = vec![plain("UNLISTED", "x")];
        let config = OperatorConfig {
            instance_env: vec![plain(DEBUG, "true")],
            ..test_config()
        };
        let env = ResourceBuilder::new(&cluster, &config).unwrap().env();

        assert_eq!(env[0].name, "POD_NAME");
        let field_ref = env[0].value_from.as_ref().unwrap().field_ref.as_ref().unwrap();
        assert_eq!(field_ref.field_path, "metadata.name");
        assert_eq!(env[1..], [plain(DEBUG, "true")]);
    }

    #[test]
    fn test_env_drops_blank_and_placeholder_values() {
        let config = OperatorConfig {
            instance_env: vec![plain(DEBUG, "true")],
            ..test_config()
        };
        for value in ["", EMPTY] {
            let mut cluster = create_test_cluster("demo", 3);
            cluster.spec.env = vec![plain(DEBUG, value)];
            let env = ResourceBuilder::new(&cluster, &config).unwrap().env();
            assert_eq!(env.len(), 1, "value {:?} should be dropped", value);
        }
    }

    #[test]
    fn test_default_anti_affinity() {
        let cluster = create_test_cluster("demo", 3);
        let config = test_config();
        let affinity = ResourceBuilder::new(&cluster, &config).unwrap().affinity();
        let terms = affinity
            .pod_anti_affinity
            .unwrap()
            .preferred_during_scheduling_ignored_during_execution
            .unwrap();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].weight, 50);
        assert_eq!(terms[0].pod_affinity_term.topology_key, "kubernetes.io/hostname");
    }

    #[test]
    fn test_affinity_override_replaces_default() {
        let mut cluster = create_test_cluster("demo", 3);
        let custom = Affinity {
            node_affinity: Some(NodeAffinity::default()),
            ..Default::default()
        };
        cluster.spec.pod_spec.affinity = Some(custom.clone());
        let config = test_config();
        assert_eq!(ResourceBuilder::new(&cluster, &config).unwrap().affinity(), custom);
    }

    #[test]
    fn test_services() {
        let cluster = create_test_cluster("demo", 3);
        let config = test_config();
        let builder = ResourceBuilder::new(&cluster, &config).unwrap();

        let headless = builder.headless_service();
        let spec = headless.spec.as_ref().unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        let ports: Vec<i32> = spec.ports.as_ref().unwrap().iter().map(|p| p.port).collect();
        assert_eq!(ports, vec![PORT_CLIENT, PORT_PEER]);
        assert!(!spec.selector.as_ref().unwrap().contains_key(LABEL_POD_NAME));

        let export = builder.export_service("demo-export-1", Default::default(), 1);
        let spec = export.spec.as_ref().unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(spec.ports.as_ref().unwrap().len(), 1);
        assert_eq!(spec.ports.as_ref().unwrap()[0].name.as_deref(), Some(PORT_CLIENT_NAME));
        assert_eq!(
            spec.selector.as_ref().unwrap().get(LABEL_POD_NAME).map(String::as_str),
            Some("demo-1")
        );
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let cluster = create_test_cluster("demo", 3);
        let config = test_config();
        let a = ResourceBuilder::new(&cluster, &config).unwrap().stateful_set().unwrap();
        let b = ResourceBuilder::new(&cluster, &config).unwrap().stateful_set().unwrap();
        assert_eq!(spec_hash(&a), spec_hash(&b));

        let mut changed = cluster.clone();
        changed.spec.memory = "1Gi".to_string();
        let c = ResourceBuilder::new(&changed, &config).unwrap().stateful_set().unwrap();
        assert_ne!(spec_hash(&a), spec_hash(&c));
    }

    #[test]
    fn test_config_fills_empty_fields() {
        let mut cluster = create_test_cluster("demo", 3);
        cluster.spec.external_host = String::new();
        let config = OperatorConfig {
            image: "quay.io/coreos/etcd:v3.5.9".to_string(),
            ..test_config()
        };
        let builder = ResourceBuilder::new(&cluster, &config).unwrap();
        assert_eq!(builder.image(), "quay.io/coreos/etcd:v3.5.9");
        assert_eq!(builder.external_host(), "gogo.io");

        cluster.spec.image = "bitnami/etcd:3.5".to_string();
        let builder = ResourceBuilder::new(&cluster, &config).unwrap();
        assert_eq!(builder.image(), "bitnami/etcd:3.5");
    }
}
