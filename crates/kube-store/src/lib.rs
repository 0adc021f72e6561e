//! Kubernetes object-store client for the etcd operator
//!
//! Every call is a bounded round-trip to the API server: there is no
//! client-side cache, and each request races a fixed timeout.
//!
//! # Example
//!
//! ```no_run
//! use kube_store::{KubeStore, KubeStoreTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = KubeStore::new(client);
//!
//! if let Some(cluster) = store.get_cluster("default", "etcd-sample").await? {
//!     println!("members: {}", cluster.spec.members);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod selector;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeStore;
pub use error::StoreError;
pub use selector::label_selector;
pub use store_trait::KubeStoreTrait;
#[cfg(feature = "test-util")]
pub use mock::{FailureKind, MockKubeStore, StoreCall, StoreOp};
