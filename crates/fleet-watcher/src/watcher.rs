//! The watcher aggregate: one mirrored resource kind across all
//! configured clusters.
//!
//! A watcher owns a single [`DataStore`] fed by one
//! cluster-watch-binding per cluster. Reads are served from the store;
//! write and delete access goes through per-cluster clients straight to
//! the backing cluster, never through the cache.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use kube::api::{ApiResource, DynamicObject};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::binding::{ClusterBinding, Converter};
use crate::client::{Actor, DynamicApi, ImpersonationOptions};
use crate::datastore::DataStore;
use crate::error::WatcherError;
use crate::metrics;
use crate::object::{EnvironmentWrapper, Filter, WatchedObject};

/// Callback invoked with (cluster, object) when the cache mutates.
pub type WatcherHook<T> = Box<dyn Fn(&str, &T) + Send + Sync>;

struct Hooks<T> {
    on_add: Option<WatcherHook<T>>,
    on_update: Option<WatcherHook<T>>,
    on_remove: Option<WatcherHook<T>>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self {
            on_add: None,
            on_update: None,
            on_remove: None,
        }
    }
}

/// State shared between the aggregate and its per-cluster bindings.
pub(crate) struct Shared<T: WatchedObject> {
    store: DataStore<T>,
    kind: String,
    hooks: RwLock<Hooks<T>>,
}

impl<T: WatchedObject> Shared<T> {
    pub(crate) fn new(kind: String) -> Self {
        Self {
            store: DataStore::new(),
            kind,
            hooks: RwLock::new(Hooks::default()),
        }
    }

    pub(crate) fn store(&self) -> &DataStore<T> {
        &self.store
    }

    pub(crate) fn add(&self, cluster: &str, obj: T) {
        debug!("adding {} {}/{} from cluster {}", self.kind, obj.namespace(), obj.name(), cluster);
        if let Some(hook) = &self.hooks.read().unwrap_or_else(PoisonError::into_inner).on_add {
            hook(cluster, &obj);
        }
        metrics::WATCH_EVENTS.with_label_values(&[&self.kind, "add"]).inc();
        metrics::MIRRORED_OBJECTS.with_label_values(&[&self.kind, cluster]).inc();
        self.store.add(cluster, obj);
    }

    pub(crate) fn update(&self, cluster: &str, obj: T) {
        debug!("updating {} {}/{} from cluster {}", self.kind, obj.namespace(), obj.name(), cluster);
        if let Some(hook) = &self.hooks.read().unwrap_or_else(PoisonError::into_inner).on_update {
            hook(cluster, &obj);
        }
        metrics::WATCH_EVENTS.with_label_values(&[&self.kind, "update"]).inc();
        self.store.update(cluster, obj);
    }

    pub(crate) fn remove(&self, cluster: &str, obj: &T) {
        debug!("removing {} {}/{} from cluster {}", self.kind, obj.namespace(), obj.name(), cluster);
        // The removal may already have been synthesized (fake-mode
        // delete); only count and notify when an entry actually left.
        if !self.store.remove(cluster, obj) {
            return;
        }
        if let Some(hook) = &self.hooks.read().unwrap_or_else(PoisonError::into_inner).on_remove {
            hook(cluster, obj);
        }
        metrics::WATCH_EVENTS.with_label_values(&[&self.kind, "remove"]).inc();
        metrics::MIRRORED_OBJECTS.with_label_values(&[&self.kind, cluster]).dec();
    }

    pub(crate) fn remove_key(&self, cluster: &str, namespace: &str, name: &str) {
        if let Ok(obj) = self.store.get(cluster, namespace, name) {
            self.remove(cluster, &obj);
        }
    }

    fn set_hook(&self, slot: fn(&mut Hooks<T>) -> &mut Option<WatcherHook<T>>, hook: WatcherHook<T>) {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        *slot(&mut hooks) = Some(hook);
    }
}

/// Per-watcher construction options.
///
/// The converter turns raw payloads into the typed model; the default
/// (for deserializable types) is a structural serde conversion.
/// Everything else is optional: an explicit API resource overriding
/// scheme resolution, a label selector narrowing the subscription, and
/// namespaces dropped before conversion.
pub struct WatchConfig<T: WatchedObject> {
    pub(crate) resource: Option<ApiResource>,
    pub(crate) converter: Converter<T>,
    pub(crate) label_selector: Option<String>,
    pub(crate) skip_namespaces: Vec<String>,
}

impl<T: WatchedObject + DeserializeOwned> WatchConfig<T> {
    /// Config converting payloads structurally into `T`.
    #[must_use]
    pub fn new() -> Self {
        Self::converted(default_convert::<T>)
    }
}

impl<T: WatchedObject + DeserializeOwned> Default for WatchConfig<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: WatchedObject> WatchConfig<T> {
    /// Config with an explicit converter; `None` rejects the payload.
    pub fn converted(converter: impl Fn(&DynamicObject, &str) -> Option<T> + Send + Sync + 'static) -> Self {
        Self {
            resource: None,
            converter: Arc::new(converter),
            label_selector: None,
            skip_namespaces: Vec::new(),
        }
    }

    /// Replaces the converter.
    #[must_use]
    pub fn with_converter(mut self, converter: impl Fn(&DynamicObject, &str) -> Option<T> + Send + Sync + 'static) -> Self {
        self.converter = Arc::new(converter);
        self
    }

    /// Watches an explicit API resource instead of resolving `T`
    /// through the scheme.
    #[must_use]
    pub fn with_resource(mut self, resource: ApiResource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Narrows the subscription with a label selector.
    #[must_use]
    pub fn with_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    /// Drops payloads from the given namespace before conversion.
    #[must_use]
    pub fn skip_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.skip_namespaces.push(namespace.into());
        self
    }
}

fn default_convert<T: DeserializeOwned>(raw: &DynamicObject, cluster: &str) -> Option<T> {
    match serde_json::to_value(raw).and_then(serde_json::from_value) {
        Ok(obj) => Some(obj),
        Err(err) => {
            error!(
                "converting object {}/{} from cluster {}: {}",
                raw.metadata.namespace.as_deref().unwrap_or_default(),
                raw.metadata.name.as_deref().unwrap_or_default(),
                cluster,
                err
            );
            None
        }
    }
}

/// Live, indexed mirror of one resource kind across all configured
/// clusters.
pub struct Watcher<T: WatchedObject> {
    shared: Arc<Shared<T>>,
    bindings: Vec<ClusterBinding<T>>,
}

impl<T: WatchedObject> Watcher<T> {
    pub(crate) fn assembled(shared: Arc<Shared<T>>, bindings: Vec<ClusterBinding<T>>) -> Self {
        Self { shared, bindings }
    }

    pub(crate) fn disabled(kind: String) -> Self {
        Self {
            shared: Arc::new(Shared::new(kind)),
            bindings: Vec::new(),
        }
    }

    /// Starts every per-cluster subscription. Events flow until `stop`
    /// is cancelled or the manager shuts down.
    pub fn start(&self, stop: &CancellationToken) {
        for binding in &self.bindings {
            binding.start(stop);
        }
    }

    /// Waits until every registered cluster has applied its initial
    /// listing; false on timeout. Clusters whose binding failed to
    /// register are skipped.
    pub async fn wait_for_ready(&self, timeout: Duration) -> bool {
        let all_synced = async {
            for binding in self.bindings.iter().filter(|b| b.registered()) {
                let mut synced = binding.synced();
                if synced.wait_for(|ready| *ready).await.is_err() {
                    return false;
                }
            }
            true
        };
        tokio::time::timeout(timeout, all_synced).await.unwrap_or(false)
    }

    /// True when at least one cluster serves the watched resource.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.bindings.iter().any(ClusterBinding::registered)
    }

    /// Point lookup; a clone of the mirrored object or the typed
    /// not-found condition.
    pub fn get(&self, cluster: &str, namespace: &str, name: &str) -> Result<T, WatcherError> {
        self.shared.store().get(cluster, namespace, name)
    }

    /// Objects in one namespace across all clusters, ordered by
    /// (cluster, name).
    #[must_use]
    pub fn get_by_namespace(&self, namespace: &str, filters: &[Filter<T>]) -> Vec<EnvironmentWrapper<T>> {
        self.shared.store().get_by_namespace(namespace, filters)
    }

    /// Objects in one cluster across all namespaces, ordered by
    /// (cluster, namespace, name).
    #[must_use]
    pub fn get_by_cluster(&self, cluster: &str, filters: &[Filter<T>]) -> Vec<EnvironmentWrapper<T>> {
        self.shared.store().get_by_cluster(cluster, filters)
    }

    /// Every mirrored object.
    #[must_use]
    pub fn all(&self) -> Vec<EnvironmentWrapper<T>> {
        self.shared.store().all()
    }

    /// Deletes the backing resource in the given cluster as the caller.
    pub async fn delete(&self, actor: &Actor, cluster: &str, namespace: &str, name: &str) -> Result<(), WatcherError> {
        self.binding(cluster)?.delete(actor, namespace, name).await
    }

    /// Cluster-scoped client performing requests as the caller.
    pub fn impersonated_client(
        &self,
        actor: &Actor,
        cluster: &str,
        options: ImpersonationOptions,
    ) -> Result<Arc<dyn DynamicApi>, WatcherError> {
        self.binding(cluster)?.impersonated_client(actor, options)
    }

    /// Cluster-scoped client under the service identity.
    pub fn system_client(&self, cluster: &str) -> Result<Arc<dyn DynamicApi>, WatcherError> {
        Ok(self.binding(cluster)?.client())
    }

    /// Installs a hook invoked after every cache add.
    pub fn on_add(&self, hook: WatcherHook<T>) {
        self.shared.set_hook(|hooks| &mut hooks.on_add, hook);
    }

    /// Installs a hook invoked after every cache update.
    pub fn on_update(&self, hook: WatcherHook<T>) {
        self.shared.set_hook(|hooks| &mut hooks.on_update, hook);
    }

    /// Installs a hook invoked after every cache removal.
    pub fn on_remove(&self, hook: WatcherHook<T>) {
        self.shared.set_hook(|hooks| &mut hooks.on_remove, hook);
    }

    fn binding(&self, cluster: &str) -> Result<&ClusterBinding<T>, WatcherError> {
        self.bindings
            .iter()
            .find(|b| b.cluster() == cluster)
            .ok_or_else(|| WatcherError::UnknownCluster(cluster.to_string()))
    }
}

impl<T: WatchedObject> std::fmt::Debug for Watcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("kind", &self.shared.kind)
            .field(
                "clusters",
                &self.bindings.iter().map(ClusterBinding::cluster).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl<T: WatchedObject> std::fmt::Debug for WatchConfig<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchConfig")
            .field("resource", &self.resource.as_ref().map(|r| r.plural.clone()))
            .field("label_selector", &self.label_selector)
            .field("skip_namespaces", &self.skip_namespaces)
            .finish_non_exhaustive()
    }
}
