//! Platform CRD models
//!
//! Typed models of the custom resources fleet-watcher mirrors from the
//! workload clusters, with the converters and scheme registrations the
//! engine consumes.

pub mod managed_service;
pub mod topic;

mod watch_test;

pub use managed_service::*;
pub use topic::*;

use fleet_watcher::{GroupVersionKind, ResourceScheme};

/// Registers every platform kind with the resource scheme.
pub fn register_all(scheme: &mut ResourceScheme) {
    scheme.register::<Topic>(GroupVersionKind::gvk("kafka.fleetwatch.io", "v1", "Topic"));
    scheme.register::<SearchCluster>(GroupVersionKind::gvk(
        "services.fleetwatch.io",
        "v1alpha1",
        "ManagedService",
    ));
}
