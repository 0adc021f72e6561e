//! Label selector rendering

use std::collections::BTreeMap;

/// Renders an equality-based selector (`k1=v1,k2=v2`).
///
/// `BTreeMap` ordering keeps the string stable across calls.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// True when every selector entry is present on `labels` with the same value.
pub fn matches(selector: &BTreeMap<String, String>, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector.iter().all(|(k, v)| {
        labels
            .and_then(|l| l.get(k))
            .is_some_and(|actual| actual == v)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_label_selector_is_sorted() {
        let sel = map(&[("role", "etcd"), ("cr-name", "demo")]);
        assert_eq!(label_selector(&sel), "cr-name=demo,role=etcd");
    }

    #[test]
    fn test_matches_subset() {
        let sel = map(&[("role", "etcd")]);
        let labels = map(&[("role", "etcd"), ("cr-name", "demo")]);
        assert!(matches(&sel, Some(&labels)));
        assert!(!matches(&map(&[("role", "zk")]), Some(&labels)));
        assert!(!matches(&sel, None));
        assert!(matches(&BTreeMap::new(), None));
    }
}
