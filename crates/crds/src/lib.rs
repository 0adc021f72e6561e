//! EtcdCluster CRD Definitions
//!
//! Kubernetes Custom Resource Definition for the etcd operator, plus the
//! helpers used to read and default the per-instance environment.

pub mod etcd_cluster;
pub mod env;

pub use etcd_cluster::*;
