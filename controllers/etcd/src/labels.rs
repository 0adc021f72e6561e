//! Label and naming scheme for EtcdCluster children
//!
//! Every child carries the base identity labels (`cr-name`, `cr-uid`,
//! `role=etcd`). Pods are addressed individually through the StatefulSet
//! pod-name label; export services carry `svc=export` and a `seq-id`.

use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

pub type Labels = BTreeMap<String, String>;

pub const LABEL_CR_NAME: &str = "cr-name";
pub const LABEL_CR_UID: &str = "cr-uid";
pub const LABEL_ROLE: &str = "role";
pub const LABEL_SVC: &str = "svc";
pub const LABEL_SEQ_ID: &str = "seq-id";
pub const LABEL_POD_NAME: &str = "statefulset.kubernetes.io/pod-name";

pub const ROLE_ETCD: &str = "etcd";
pub const EXPORT: &str = "export";

/// Member ordinal, or every member of the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordinal {
    All,
    Member(u32),
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ordinal::All => f.write_str("all"),
            Ordinal::Member(i) => write!(f, "{}", i),
        }
    }
}

/// Identity of one EtcdCluster, as far as labels are concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterIdentity<'a> {
    pub name: &'a str,
    pub uid: &'a str,
}

fn single(key: &str, value: impl Into<String>) -> Labels {
    Labels::from([(key.to_string(), value.into())])
}

/// Labels every child of the cluster carries
pub fn base_labels(id: ClusterIdentity<'_>) -> Labels {
    Labels::from([
        (LABEL_CR_NAME.to_string(), id.name.to_string()),
        (LABEL_CR_UID.to_string(), id.uid.to_string()),
        (LABEL_ROLE.to_string(), ROLE_ETCD.to_string()),
    ])
}

pub fn export_label() -> Labels {
    single(LABEL_SVC, EXPORT)
}

/// `seq-id=<i>`, or nothing for [`Ordinal::All`]
pub fn seq_label(ordinal: Ordinal) -> Labels {
    match ordinal {
        Ordinal::All => Labels::new(),
        Ordinal::Member(i) => single(LABEL_SEQ_ID, i.to_string()),
    }
}

/// StatefulSet pod-name label, or nothing for [`Ordinal::All`]
pub fn pod_selector(stateful_set: &str, ordinal: Ordinal) -> Labels {
    match ordinal {
        Ordinal::All => Labels::new(),
        Ordinal::Member(i) => single(LABEL_POD_NAME, pod_name(stateful_set, i)),
    }
}

/// Selects one member pod, or all of them
pub fn member_labels(id: ClusterIdentity<'_>, ordinal: Ordinal) -> Labels {
    merge_labels([base_labels(id), pod_selector(id.name, ordinal)])
}

/// Labels of the export service for one member, or the selector for all of them
pub fn export_service_labels(id: ClusterIdentity<'_>, ordinal: Ordinal) -> Labels {
    merge_labels([base_labels(id), export_label(), seq_label(ordinal)])
}

/// Merges label maps left to right; later maps win on key collision.
pub fn merge_labels<I>(maps: I) -> Labels
where
    I: IntoIterator<Item = Labels>,
{
    let mut merged = Labels::new();
    for map in maps {
        for (k, v) in map {
            if merged.contains_key(&k) {
                debug!("Overriding label key {}", k);
            }
            merged.insert(k, v);
        }
    }
    merged
}

pub fn pod_name(stateful_set: &str, ordinal: u32) -> String {
    format!("{}-{}", stateful_set, ordinal)
}

/// Joins `suffixes` onto `base` with `-`.
pub fn add_suffix<S: AsRef<str>>(base: &str, suffixes: &[S]) -> String {
    suffixes.iter().fold(base.to_string(), |mut acc, s| {
        acc.push('-');
        acc.push_str(s.as_ref());
        acc
    })
}

/// `<cluster>-export-<i>`
pub fn export_service_name(cluster: &str, ordinal: u32) -> String {
    add_suffix(cluster, &[EXPORT.to_string(), ordinal.to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    const ID: ClusterIdentity<'static> = ClusterIdentity {
        name: "demo",
        uid: "0b6c6a3e",
    };

    #[test]
    fn test_base_labels() {
        let labels = base_labels(ID);
        assert_eq!(labels.get(LABEL_CR_NAME).map(String::as_str), Some("demo"));
        assert_eq!(labels.get(LABEL_CR_UID).map(String::as_str), Some("0b6c6a3e"));
        assert_eq!(labels.get(LABEL_ROLE).map(String::as_str), Some("etcd"));
        assert_eq!(labels.len(), 3);
    }

    #[test]
    fn test_member_labels_all_omits_pod_selector() {
        assert_eq!(member_labels(ID, Ordinal::All), base_labels(ID));

        let one = member_labels(ID, Ordinal::Member(2));
        assert_eq!(one.get(LABEL_POD_NAME).map(String::as_str), Some("demo-2"));
    }

    #[test]
    fn test_export_service_labels() {
        let all = export_service_labels(ID, Ordinal::All);
        assert_eq!(all.get(LABEL_SVC).map(String::as_str), Some("export"));
        assert!(!all.contains_key(LABEL_SEQ_ID));

        let one = export_service_labels(ID, Ordinal::Member(1));
        assert_eq!(one.get(LABEL_SEQ_ID).map(String::as_str), Some("1"));
    }

    #[test]
    fn test_per_member_and_export_keys_never_collide() {
        let export_keys: BTreeSet<String> = export_label().into_keys().collect();
        for ordinal in [Ordinal::All, Ordinal::Member(0), Ordinal::Member(1), Ordinal::Member(7)] {
            let member_keys: BTreeSet<String> = pod_selector(ID.name, ordinal)
                .into_keys()
                .chain(seq_label(ordinal).into_keys())
                .collect();
            assert!(
                member_keys.is_disjoint(&export_keys),
                "collision for ordinal {}",
                ordinal
            );
        }
    }

    #[test]
    fn test_merge_labels_last_writer_wins() {
        let merged = merge_labels([single("a", "1"), single("a", "2"), single("b", "3")]);
        assert_eq!(merged.get("a").map(String::as_str), Some("2"));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_names() {
        assert_eq!(pod_name("demo", 0), "demo-0");
        assert_eq!(export_service_name("demo", 3), "demo-export-3");
        assert_eq!(add_suffix::<&str>("demo", &[]), "demo");
    }
}
