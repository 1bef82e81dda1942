//! Core object contracts shared by every watcher component.
//!
//! Anything the engine mirrors must satisfy [`WatchedObject`]; the
//! generic store, watcher and bindings are all parameterized over it.

use std::collections::BTreeMap;

use kube::api::DynamicObject;

/// Capability set every watched resource model must satisfy.
///
/// `Clone` doubles as the copy-on-read capability: the cache clones
/// objects on every read, so callers never alias its internal state.
pub trait WatchedObject: Clone + Send + Sync + 'static {
    /// Stable object name within its namespace.
    fn name(&self) -> &str;

    /// Namespace the object lives in.
    fn namespace(&self) -> &str;

    /// Label set attached to the object.
    fn labels(&self) -> BTreeMap<String, String>;
}

/// Raw payloads can be mirrored as-is, without a typed model.
impl WatchedObject for DynamicObject {
    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    fn labels(&self) -> BTreeMap<String, String> {
        self.metadata.labels.clone().unwrap_or_default()
    }
}

/// An object as observed in one cluster.
///
/// The storage identity of an entry is (cluster, namespace, name).
#[derive(Debug, Clone)]
pub struct EnvironmentWrapper<T> {
    cluster: String,
    obj: T,
}

impl<T: WatchedObject> EnvironmentWrapper<T> {
    pub(crate) fn new(cluster: impl Into<String>, obj: T) -> Self {
        Self {
            cluster: cluster.into(),
            obj,
        }
    }

    /// Cluster the object was observed in.
    #[must_use]
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Name of the wrapped object.
    #[must_use]
    pub fn name(&self) -> &str {
        self.obj.name()
    }

    /// Namespace of the wrapped object.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.obj.namespace()
    }

    /// The wrapped object.
    #[must_use]
    pub fn obj(&self) -> &T {
        &self.obj
    }

    /// Unwraps into the bare object, dropping the cluster tag.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.obj
    }

    pub(crate) fn set_obj(&mut self, obj: T) {
        self.obj = obj;
    }
}

/// Read-side predicate over (object, cluster).
///
/// Every filter passed to a query must hold for an entry to be
/// returned.
pub type Filter<T> = Box<dyn Fn(&T, &str) -> bool + Send + Sync>;

/// Filter matching objects carrying all of the given labels.
pub fn has_labels<T: WatchedObject>(labels: BTreeMap<String, String>) -> Filter<T> {
    Box::new(move |obj, _| {
        let have = obj.labels();
        labels.iter().all(|(k, v)| have.get(k) == Some(v))
    })
}

/// Filter matching objects observed in one of the given clusters.
pub fn in_clusters<T>(clusters: Vec<String>) -> Filter<T> {
    Box::new(move |_, cluster| clusters.iter().any(|c| c == cluster))
}

/// Unwraps a list of environment-wrapped objects into the bare models.
#[must_use]
pub fn objects<T: WatchedObject>(list: Vec<EnvironmentWrapper<T>>) -> Vec<T> {
    list.into_iter().map(EnvironmentWrapper::into_inner).collect()
}
