//! Multi-cluster Kubernetes resource watch and cache engine.
//!
//! fleet-watcher maintains a live, indexed, in-memory mirror of one
//! custom-resource kind per watcher, fed by long-lived watch
//! subscriptions against any number of clusters, and brokers
//! identity-impersonated write access back to those clusters. Clusters
//! fail independently: a kind that cannot be watched in one cluster
//! leaves the others delivering.
//!
//! # Example
//!
//! ```no_run
//! use fleet_watcher::{
//!     ClusterConfigMap, ClusterConnection, DynamicObject, GroupVersionKind, Manager,
//!     ResourceScheme, WatchConfig,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut scheme = ResourceScheme::new();
//! scheme.register::<DynamicObject>(GroupVersionKind::gvk("kafka.fleetwatch.io", "v1", "Topic"));
//!
//! let mut clusters = ClusterConfigMap::new();
//! clusters.insert("dev".into(), ClusterConnection::KubeconfigContext("dev".into()));
//! clusters.insert("prod".into(), ClusterConnection::KubeconfigContext("prod".into()));
//!
//! let manager = Manager::connect(scheme, clusters).await?;
//! let topics = manager.watch(WatchConfig::<DynamicObject>::new());
//!
//! let stop = tokio_util::sync::CancellationToken::new();
//! topics.start(&stop);
//! topics.wait_for_ready(std::time::Duration::from_secs(30)).await;
//!
//! for topic in topics.get_by_namespace("team-a", &[]) {
//!     println!("{} in {}", topic.name(), topic.cluster());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod datastore;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod object;
pub mod scheme;
pub mod watcher;

mod binding;
mod cluster;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

#[cfg(test)]
mod test_utils;

mod datastore_test;

pub use binding::Converter;
pub use client::{Actor, DynamicApi, ImpersonationOptions};
pub use config::{ClusterConfigMap, ClusterConnection};
pub use datastore::DataStore;
pub use error::{NotFoundError, WatcherError};
pub use manager::Manager;
pub use object::{EnvironmentWrapper, Filter, WatchedObject, has_labels, in_clusters, objects};
pub use scheme::ResourceScheme;
pub use watcher::{WatchConfig, Watcher, WatcherHook};

// Commonly needed kube types, re-exported so downstream crates do not
// have to track the kube version themselves.
pub use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
