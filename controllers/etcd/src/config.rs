//! Operator configuration
//!
//! Read once from the process environment at startup and passed by reference
//! to everything that needs a default (image, storage class, external host,
//! instance env).

use crate::error::ControllerError;
use crds::env::plain;
use k8s_openapi::api::core::v1::EnvVar;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_IMAGE: &str = "bitnami/etcd:3";
pub const DEFAULT_EXTERNAL_DOMAIN: &str = "gogo.io";
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 10;

/// Process-wide defaults for every EtcdCluster
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Image used when the spec leaves `image` empty
    pub image: String,
    /// Storage class used when the spec leaves it empty
    pub storage_class_name: String,
    /// External host used when the spec leaves `externalHost` empty
    pub external_domain: String,
    /// Defaults merged under each instance's env
    pub instance_env: Vec<EnvVar>,
    /// Namespace to watch; `None` watches all namespaces
    pub watch_namespace: Option<String>,
    pub metrics_bind_address: SocketAddr,
    pub store_timeout: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            storage_class_name: String::new(),
            external_domain: DEFAULT_EXTERNAL_DOMAIN.to_string(),
            instance_env: Vec::new(),
            watch_namespace: None,
            metrics_bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            store_timeout: Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECS),
        }
    }
}

impl OperatorConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which returns `None` for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let instance_env = parse_instance_env(&get("INSTANCE_ENV", ""))?;

        let bind = get("METRICS_BIND_ADDRESS", DEFAULT_METRICS_BIND_ADDRESS);
        let metrics_bind_address = bind.parse::<SocketAddr>().map_err(|e| {
            ControllerError::InvalidConfig(format!("METRICS_BIND_ADDRESS {:?}: {}", bind, e))
        })?;

        let timeout = get("STORE_TIMEOUT_SECS", &DEFAULT_STORE_TIMEOUT_SECS.to_string());
        let store_timeout = match timeout.parse::<u64>() {
            Ok(0) | Err(_) => {
                return Err(ControllerError::InvalidConfig(format!(
                    "STORE_TIMEOUT_SECS must be a positive integer, got {:?}",
                    timeout
                )));
            }
            Ok(secs) => Duration::from_secs(secs),
        };

        Ok(Self {
            image: get("IMAGE", DEFAULT_IMAGE),
            storage_class_name: get("STORAGE_CLASS_NAME", ""),
            external_domain: get("EXTERNAL_DOMAIN", DEFAULT_EXTERNAL_DOMAIN),
            instance_env,
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            metrics_bind_address,
            store_timeout,
        })
    }
}

/// Parses `KEY=VALUE;KEY2=VALUE2`. Empty segments are skipped; a segment with
/// no `=` or an empty value is rejected.
pub fn parse_instance_env(raw: &str) -> Result<Vec<EnvVar>, ControllerError> {
    raw.split(';')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((key, value)) if !key.is_empty() && !value.is_empty() => Ok(plain(key, value)),
            _ => Err(ControllerError::InvalidConfig(format!(
                "INSTANCE_ENV: invalid entry {:?}",
                segment
            ))),
        })
        .collect()
}
