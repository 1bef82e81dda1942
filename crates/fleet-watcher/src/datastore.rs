//! Concurrency-safe, dual-indexed in-memory store of watched objects.
//!
//! One store backs one watcher. Every object admitted from any cluster
//! lands here, indexed both by cluster and by namespace; the two views
//! are mutated together under a single lock and stay consistent with
//! each other. Reads clone the requested slice under a short-lived
//! read lock and never hand out references into the store.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{NotFoundError, WatcherError};
use crate::object::{EnvironmentWrapper, Filter, WatchedObject};

type Bucket<T> = Vec<EnvironmentWrapper<T>>;

#[derive(Debug)]
struct Indices<T> {
    by_cluster: BTreeMap<String, Bucket<T>>,
    by_namespace: BTreeMap<String, Bucket<T>>,
}

/// Dual-indexed mirror of one resource kind across all clusters.
///
/// Duplicate adds and updates for unknown keys are accepted silently:
/// the watch subscription emits at most one creation per object
/// existence, and an update implies a prior add. Tightening either
/// would change behavior under subscription replay.
#[derive(Debug)]
pub struct DataStore<T> {
    inner: RwLock<Indices<T>>,
}

fn cluster_order<T: WatchedObject>(a: &EnvironmentWrapper<T>, b: &EnvironmentWrapper<T>) -> Ordering {
    a.cluster()
        .cmp(b.cluster())
        .then_with(|| a.namespace().cmp(b.namespace()))
        .then_with(|| a.name().cmp(b.name()))
}

fn namespace_order<T: WatchedObject>(a: &EnvironmentWrapper<T>, b: &EnvironmentWrapper<T>) -> Ordering {
    a.cluster()
        .cmp(b.cluster())
        .then_with(|| a.name().cmp(b.name()))
}

impl<T: WatchedObject> DataStore<T> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Indices {
                by_cluster: BTreeMap::new(),
                by_namespace: BTreeMap::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Indices<T>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices<T>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts an object under both indices, keeping the sort
    /// invariants: (cluster, namespace, name) in the cluster index,
    /// (cluster, name) in the namespace index.
    pub fn add(&self, cluster: &str, obj: T) {
        let entry = EnvironmentWrapper::new(cluster, obj);
        let mut idx = self.write();

        let bucket = idx.by_cluster.entry(cluster.to_string()).or_default();
        bucket.push(entry.clone());
        bucket.sort_by(cluster_order);

        let bucket = idx.by_namespace.entry(entry.namespace().to_string()).or_default();
        bucket.push(entry);
        bucket.sort_by(namespace_order);
    }

    /// Replaces the payload of the matching entry in place, in both
    /// indices; the storage slot keeps its sort position. An update for
    /// a key that was never added is dropped.
    pub fn update(&self, cluster: &str, obj: T) {
        let mut idx = self.write();

        if let Some(bucket) = idx.by_cluster.get_mut(cluster) {
            for entry in bucket
                .iter_mut()
                .filter(|e| e.name() == obj.name() && e.namespace() == obj.namespace())
            {
                entry.set_obj(obj.clone());
            }
        }

        if let Some(bucket) = idx.by_namespace.get_mut(obj.namespace()) {
            for entry in bucket
                .iter_mut()
                .filter(|e| e.cluster() == cluster && e.name() == obj.name())
            {
                entry.set_obj(obj.clone());
            }
        }
    }

    /// Excises the matching entry from both indices. Removing an
    /// object that is not present is a no-op; the return value reports
    /// whether anything was actually excised.
    pub fn remove(&self, cluster: &str, obj: &T) -> bool {
        self.remove_key(cluster, obj.namespace(), obj.name())
    }

    pub(crate) fn remove_key(&self, cluster: &str, namespace: &str, name: &str) -> bool {
        let mut idx = self.write();
        let mut removed = false;

        let emptied = if let Some(bucket) = idx.by_cluster.get_mut(cluster) {
            if let Some(pos) = bucket
                .iter()
                .position(|e| e.name() == name && e.namespace() == namespace)
            {
                bucket.remove(pos);
                removed = true;
            }
            bucket.is_empty()
        } else {
            false
        };
        // Drop emptied buckets so map keys do not accumulate forever.
        if emptied {
            idx.by_cluster.remove(cluster);
        }

        let emptied = if let Some(bucket) = idx.by_namespace.get_mut(namespace) {
            if let Some(pos) = bucket
                .iter()
                .position(|e| e.cluster() == cluster && e.name() == name)
            {
                bucket.remove(pos);
            }
            bucket.is_empty()
        } else {
            false
        };
        if emptied {
            idx.by_namespace.remove(namespace);
        }

        removed
    }

    /// Point lookup; returns a clone of the stored object or the typed
    /// not-found condition.
    pub fn get(&self, cluster: &str, namespace: &str, name: &str) -> Result<T, WatcherError> {
        {
            let idx = self.read();
            if let Some(bucket) = idx.by_cluster.get(cluster) {
                if let Some(entry) = bucket
                    .iter()
                    .find(|e| e.name() == name && e.namespace() == namespace)
                {
                    return Ok(entry.obj().clone());
                }
            }
        }

        Err(NotFoundError {
            cluster: cluster.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
        .into())
    }

    /// Cloned snapshot of one namespace across all clusters, ordered by
    /// (cluster, name). All filters must pass for an entry to be kept.
    #[must_use]
    pub fn get_by_namespace(&self, namespace: &str, filters: &[Filter<T>]) -> Vec<EnvironmentWrapper<T>> {
        let snapshot = {
            let idx = self.read();
            idx.by_namespace.get(namespace).cloned().unwrap_or_default()
        };
        apply_filters(snapshot, filters)
    }

    /// Cloned snapshot of one cluster across all namespaces, ordered by
    /// (cluster, namespace, name).
    #[must_use]
    pub fn get_by_cluster(&self, cluster: &str, filters: &[Filter<T>]) -> Vec<EnvironmentWrapper<T>> {
        let snapshot = {
            let idx = self.read();
            idx.by_cluster.get(cluster).cloned().unwrap_or_default()
        };
        apply_filters(snapshot, filters)
    }

    /// Every stored entry; clusters in name order, entries within a
    /// cluster following the cluster-index sort invariant.
    #[must_use]
    pub fn all(&self) -> Vec<EnvironmentWrapper<T>> {
        let idx = self.read();
        idx.by_cluster.values().flatten().cloned().collect()
    }
}

impl<T: WatchedObject> Default for DataStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_filters<T: WatchedObject>(entries: Bucket<T>, filters: &[Filter<T>]) -> Bucket<T> {
    if filters.is_empty() {
        return entries;
    }
    entries
        .into_iter()
        .filter(|e| filters.iter().all(|f| f(e.obj(), e.cluster())))
        .collect()
}
