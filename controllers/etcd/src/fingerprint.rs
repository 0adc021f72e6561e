//! Spec fingerprint
//!
//! A short content hash of the desired StatefulSet spec, stored on the live
//! object under [`SPEC_HASH_ANNOTATION`]. The live object is patched only when
//! the freshly computed fingerprint differs from the stored one.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const SPEC_HASH_ANNOTATION: &str = "etcd-operator/spec-hash";

/// Alphabet without vowels and look-alike characters
const SAFE_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

/// Hashes `value` after canonical serialization.
///
/// Serializing through `serde_json::Value` sorts object keys, so two values
/// with the same content and different field order hash identically.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(&serde_json::to_value(value)?)?;
    let digest = Sha256::digest(&canonical);
    let short = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    Ok(safe_encode(&short.to_string()))
}

/// Fingerprint stored on an object, if any
pub fn stored_fingerprint(meta: &ObjectMeta) -> Option<&str> {
    meta.annotations
        .as_ref()?
        .get(SPEC_HASH_ANNOTATION)
        .map(String::as_str)
}

/// Maps every byte of `s` onto [`SAFE_ALPHABET`].
pub fn safe_encode(s: &str) -> String {
    s.bytes()
        .map(|b| char::from(SAFE_ALPHABET[usize::from(b) % SAFE_ALPHABET.len()]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stored_fingerprint() {
        let mut meta = ObjectMeta::default();
        assert_eq!(stored_fingerprint(&meta), None);
        meta.annotations = Some([(SPEC_HASH_ANNOTATION.to_string(), "bcd".to_string())].into());
        assert_eq!(stored_fingerprint(&meta), Some("bcd"));
    }

    #[test]
    fn test_identical_content_hashes_identically() {
        let a = json!({"replicas": 3, "serviceName": "demo", "template": {"b": 1, "a": 2}});
        let b = json!({"template": {"a": 2, "b": 1}, "serviceName": "demo", "replicas": 3});
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_content_change_changes_hash() {
        let base = json!({"replicas": 3, "image": "bitnami/etcd:3", "env": [{"name": "DEBUG", "value": "true"}]});
        let variants = [
            json!({"replicas": 5, "image": "bitnami/etcd:3", "env": [{"name": "DEBUG", "value": "true"}]}),
            json!({"replicas": 3, "image": "bitnami/etcd:3.5", "env": [{"name": "DEBUG", "value": "true"}]}),
            json!({"replicas": 3, "image": "bitnami/etcd:3", "env": []}),
        ];
        let base_hash = fingerprint(&base).unwrap();
        for variant in variants {
            assert_ne!(fingerprint(&variant).unwrap(), base_hash, "{}", variant);
        }
    }

    #[test]
    fn test_fingerprint_uses_safe_alphabet() {
        let hash = fingerprint(&json!({"replicas": 3})).unwrap();
        assert!(!hash.is_empty());
        assert!(hash.bytes().all(|b| SAFE_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_safe_encode_digits() {
        // '0' is 48, 48 % 27 = 21 -> '4'; '9' is 57, 57 % 27 = 3 -> 'f'
        assert_eq!(safe_encode("09"), "4f");
    }
}
