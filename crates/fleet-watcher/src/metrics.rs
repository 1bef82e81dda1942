//! Prometheus instrumentation for the watch cache.
//!
//! Exposition is owned by the embedding process; this module only
//! defines the collectors and a registration helper.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

lazy_static! {
    /// Watch events applied to the cache, by resource kind and action.
    pub static ref WATCH_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("fleet_watcher_events", "Watch events applied to the resource cache"),
        &["kind", "action"]
    )
    .expect("metric can not be created");

    /// Objects currently mirrored, by resource kind and cluster.
    pub static ref MIRRORED_OBJECTS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("fleet_watcher_objects", "Objects currently mirrored from the clusters"),
        &["kind", "cluster"]
    )
    .expect("metric can not be created");
}

/// Registers the watcher collectors with a registry.
pub fn register(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(WATCH_EVENTS.clone()))?;
    registry.register(Box::new(MIRRORED_OBJECTS.clone()))?;
    Ok(())
}
