//! Watcher error types.
//!
//! This module defines error types specific to the watch-cache engine
//! that are not covered by upstream library errors.

use thiserror::Error;

/// Lookup miss for a (cluster, namespace, name) key.
///
/// Kept as its own comparable type so callers can match the not-found
/// condition structurally, without caring which layer produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("resource {namespace}/{name} not found in cluster {cluster}")]
pub struct NotFoundError {
    /// Cluster the lookup targeted.
    pub cluster: String,
    /// Namespace of the missed lookup.
    pub namespace: String,
    /// Object name of the missed lookup.
    pub name: String,
}

/// Errors that can occur in the watch-cache engine.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// Point lookup on an absent key
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// Kubernetes API error, propagated verbatim
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Operation referenced a cluster the manager is not connected to
    #[error("no cluster named {0} is configured")]
    UnknownCluster(String),

    /// The watched type could not be resolved to an API resource
    #[error("no API resource registered for type {0}")]
    UnresolvedKind(String),

    /// A remote client could not be constructed for a cluster
    #[error("building client for cluster {cluster}: {source}")]
    ClientConstruction {
        /// Cluster the client was meant for.
        cluster: String,
        /// Underlying configuration or transport error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The cluster does not serve the requested resource
    #[error("cluster {cluster} does not serve resource {resource}")]
    UnsupportedResource {
        /// Cluster the subscription was requested in.
        cluster: String,
        /// Plural resource name that failed to register.
        resource: String,
    },

    /// A fake-backend fixture could not be loaded
    #[error("loading fixture {path}: {reason}")]
    Fixture {
        /// Path of the offending file or directory.
        path: String,
        /// What went wrong while reading or parsing it.
        reason: String,
    },
}

impl WatcherError {
    /// True when the error is the typed not-found condition.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, WatcherError::NotFound(_))
    }
}
