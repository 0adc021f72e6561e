//! Instance environment helpers
//!
//! The CRD schema fills blank env values on round-trip, so a key that is
//! deliberately blank is stored as the `EMPTY` placeholder instead.

use k8s_openapi::api::core::v1::EnvVar;

/// Enables verbose etcd logging when set on the instance
pub const DEBUG: &str = "DEBUG";

/// Placeholder for a key that is present but intentionally blank
pub const EMPTY: &str = "EMPTY";

/// Returns the value for `key`, or `None` when the key is absent.
pub fn lookup_env<'a>(env: &'a [EnvVar], key: &str) -> Option<&'a str> {
    env.iter()
        .find(|e| e.name == key)
        .map(|e| e.value.as_deref().unwrap_or_default())
}

/// Returns the value for `key`, or "" when absent.
pub fn get_env<'a>(env: &'a [EnvVar], key: &str) -> &'a str {
    lookup_env(env, key).unwrap_or_default()
}

/// Sets `key` to `value`, replacing the first existing entry or appending.
pub fn set_env(env: &mut Vec<EnvVar>, key: &str, value: &str) {
    match env.iter_mut().find(|e| e.name == key) {
        Some(existing) => existing.value = Some(value.to_string()),
        None => env.push(plain(key, value)),
    }
}

/// Sets `key` to `default` only if it is missing.
///
/// A present-but-blank value is rewritten to [`EMPTY`]; a missing key with a
/// blank default is also stored as [`EMPTY`].
pub fn set_env_if_unset(env: &mut Vec<EnvVar>, key: &str, default: &str) {
    match lookup_env(env, key) {
        Some("") => set_env(env, key, EMPTY),
        Some(_) => {}
        None if default.is_empty() => set_env(env, key, EMPTY),
        None => set_env(env, key, default),
    }
}

/// Merges `defaults` under `src`.
///
/// Entries of `src` keep their order; a key repeated in `src` keeps only its
/// first occurrence. Default keys that `src` does not mention are appended.
/// A key present in `src`, even with a blank value, wins over the default.
pub fn merge_env(src: &[EnvVar], defaults: &[EnvVar]) -> Vec<EnvVar> {
    let mut merged: Vec<EnvVar> = Vec::with_capacity(src.len() + defaults.len());
    for e in src {
        if !merged.iter().any(|m| m.name == e.name) {
            merged.push(e.clone());
        }
    }
    for d in defaults {
        if !merged.iter().any(|m| m.name == d.name) {
            merged.push(d.clone());
        }
    }
    merged
}

/// Builds a literal `name=value` env entry.
pub fn plain(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_env_missing_and_present() {
        let env = vec![plain("A", "1"), plain("B", "")];
        assert_eq!(lookup_env(&env, "A"), Some("1"));
        assert_eq!(lookup_env(&env, "B"), Some(""));
        assert_eq!(lookup_env(&env, "C"), None);
        assert_eq!(get_env(&env, "C"), "");
    }

    #[test]
    fn test_set_env_replaces_or_appends() {
        let mut env = vec![plain("A", "1")];
        set_env(&mut env, "A", "2");
        set_env(&mut env, "B", "3");
        assert_eq!(env, vec![plain("A", "2"), plain("B", "3")]);
    }

    #[test]
    fn test_set_env_if_unset() {
        let mut env = vec![plain("KEEP", "x"), plain("BLANK", "")];
        set_env_if_unset(&mut env, "KEEP", "default");
        set_env_if_unset(&mut env, "BLANK", "default");
        set_env_if_unset(&mut env, "NEW", "default");
        set_env_if_unset(&mut env, "NEW_BLANK", "");

        assert_eq!(get_env(&env, "KEEP"), "x");
        assert_eq!(get_env(&env, "BLANK"), EMPTY);
        assert_eq!(get_env(&env, "NEW"), "default");
        assert_eq!(get_env(&env, "NEW_BLANK"), EMPTY);
    }

    #[test]
    fn test_merge_env_injects_missing_default() {
        let src = vec![plain("A", "1")];
        let defaults = vec![plain(DEBUG, "true")];
        let merged = merge_env(&src, &defaults);
        assert_eq!(merged, vec![plain("A", "1"), plain(DEBUG, "true")]);
    }

    #[test]
    fn test_merge_env_keeps_present_key_even_if_blank() {
        let src = vec![plain(DEBUG, "")];
        let defaults = vec![plain(DEBUG, "true")];
        let merged = merge_env(&src, &defaults);
        assert_eq!(merged, vec![plain(DEBUG, "")]);
    }

    #[test]
    fn test_merge_env_drops_repeated_src_keys() {
        let src = vec![plain("A", "1"), plain("B", "2"), plain("A", "3")];
        let defaults = vec![plain("A", "default"), plain("C", "4")];
        let merged = merge_env(&src, &defaults);
        assert_eq!(merged, vec![plain("A", "1"), plain("B", "2"), plain("C", "4")]);
    }
}
