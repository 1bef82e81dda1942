//! In-memory cluster backend for tests.
//!
//! Mirrors the slice of cluster behavior the engine depends on: seeded
//! objects, an initial listing replayed to new watch streams, live
//! add/update/delete events in mutation order, and failure injection
//! for kinds a cluster does not serve. Enabled through the `test-util`
//! feature so dependent crates can drive the engine end-to-end without
//! a cluster.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube_runtime::watcher;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::client::DynamicApi;
use crate::cluster::{GvrKey, RawEvent, RawEventStream};
use crate::error::{NotFoundError, WatcherError};
use crate::object::WatchedObject;

/// Named set of in-memory clusters.
#[derive(Debug, Default)]
pub struct FakeClusters {
    clusters: BTreeMap<String, Arc<FakeCluster>>,
}

impl FakeClusters {
    /// Creates empty clusters with the given names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let clusters = names
            .into_iter()
            .map(Into::into)
            .map(|name| {
                let cluster = Arc::new(FakeCluster::named(&name));
                (name, cluster)
            })
            .collect();
        Self { clusters }
    }

    /// Loads fixtures from `<root>/<cluster>/<namespace>/*.yaml`.
    ///
    /// Every directory below `root` becomes a cluster; each file may
    /// hold multiple `---`-separated manifests, created in the
    /// namespace named by the parent directory unless the manifest
    /// sets one itself.
    pub fn load_dir(root: impl AsRef<Path>) -> Result<Self, WatcherError> {
        let root = root.as_ref();
        let mut clusters = Self::default();

        for cluster_entry in read_dir(root)? {
            if !cluster_entry.is_dir() {
                continue;
            }
            let cluster_name = dir_name(&cluster_entry);
            let cluster = clusters.cluster(&cluster_name);

            for namespace_entry in read_dir(&cluster_entry)? {
                if !namespace_entry.is_dir() {
                    continue;
                }
                let namespace = dir_name(&namespace_entry);

                for file in read_dir(&namespace_entry)? {
                    let is_manifest =
                        matches!(file.extension().and_then(|ext| ext.to_str()), Some("yaml" | "yml"));
                    if !is_manifest {
                        continue;
                    }
                    cluster.load_manifests(&file, &namespace)?;
                }
            }
        }

        Ok(clusters)
    }

    /// The named cluster, created when absent.
    pub fn cluster(&mut self, name: &str) -> Arc<FakeCluster> {
        Arc::clone(
            self.clusters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(FakeCluster::named(name))),
        )
    }

    pub(crate) fn into_parts(self) -> impl Iterator<Item = (String, Arc<FakeCluster>)> {
        self.clusters.into_iter()
    }
}

#[derive(Debug, Default)]
struct FakeState {
    kinds: HashMap<GvrKey, KindState>,
    unsupported: HashSet<GvrKey>,
}

#[derive(Debug, Default)]
struct KindState {
    objects: BTreeMap<(String, String), DynamicObject>,
    watchers: Vec<mpsc::UnboundedSender<RawEvent>>,
}

impl KindState {
    fn broadcast(&mut self, event: RawEvent) {
        self.watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// One in-memory cluster.
#[derive(Debug)]
pub struct FakeCluster {
    name: String,
    state: Mutex<FakeState>,
}

impl FakeCluster {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(FakeState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks a resource kind as not served; subscriptions for it fail
    /// while the rest of the cluster keeps working.
    pub fn fail_resource(&self, resource: &ApiResource) {
        self.lock().unsupported.insert(GvrKey::new(resource));
    }

    pub(crate) fn supports(&self, resource: &ApiResource) -> bool {
        !self.lock().unsupported.contains(&GvrKey::new(resource))
    }

    /// Creates or replaces an object, notifying live watch streams.
    pub fn add_object(&self, resource: &ApiResource, obj: DynamicObject) {
        self.apply(GvrKey::new(resource), obj);
    }

    /// Deletes an object, notifying live watch streams. Unknown
    /// objects are ignored.
    pub fn remove_object(&self, resource: &ApiResource, namespace: &str, name: &str) {
        let mut state = self.lock();
        if let Some(kind) = state.kinds.get_mut(&GvrKey::new(resource)) {
            if let Some(obj) = kind.objects.remove(&(namespace.to_string(), name.to_string())) {
                kind.broadcast(watcher::Event::Delete(obj));
            }
        }
    }

    fn apply(&self, key: GvrKey, obj: DynamicObject) {
        let mut state = self.lock();
        let kind = state.kinds.entry(key).or_default();
        let id = (obj.namespace().to_string(), obj.name().to_string());
        kind.objects.insert(id, obj.clone());
        kind.broadcast(watcher::Event::Apply(obj));
    }

    /// Live watch stream: replays the current objects as an initial
    /// listing, then delivers mutations in order.
    pub(crate) fn watch(&self, resource: &ApiResource) -> RawEventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let kind = state.kinds.entry(GvrKey::new(resource)).or_default();

        let mut initial = vec![watcher::Event::Init];
        initial.extend(kind.objects.values().cloned().map(watcher::Event::InitApply));
        initial.push(watcher::Event::InitDone);
        kind.watchers.push(tx);

        stream::iter(initial)
            .chain(UnboundedReceiverStream::new(rx))
            .map(Ok::<RawEvent, watcher::Error>)
            .boxed()
    }

    /// Client handle for one resource kind; the same handle is returned
    /// to impersonated callers since the fake performs no authorization.
    #[must_use]
    pub fn api(self: &Arc<Self>, resource: &ApiResource) -> FakeApi {
        FakeApi {
            cluster: Arc::clone(self),
            key: GvrKey::new(resource),
        }
    }

    fn load_manifests(&self, path: &Path, namespace: &str) -> Result<(), WatcherError> {
        let text = std::fs::read_to_string(path).map_err(|err| fixture_err(path, &err))?;

        for doc in serde_yaml::Deserializer::from_str(&text) {
            let value = serde_yaml::Value::deserialize(doc).map_err(|err| fixture_err(path, &err))?;
            if value.is_null() {
                continue;
            }
            let json = serde_json::to_value(&value).map_err(|err| fixture_err(path, &err))?;
            let mut obj: DynamicObject =
                serde_json::from_value(json).map_err(|err| fixture_err(path, &err))?;

            let Some(types) = obj.types.clone() else {
                return Err(fixture_err(path, &"manifest missing apiVersion/kind"));
            };
            if obj.metadata.namespace.is_none() {
                obj.metadata.namespace = Some(namespace.to_string());
            }

            let (group, version) = match types.api_version.split_once('/') {
                Some((group, version)) => (group, version),
                None => ("", types.api_version.as_str()),
            };
            let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, &types.kind));
            self.apply(GvrKey::new(&resource), obj);
        }

        Ok(())
    }

    fn not_found(&self, namespace: &str, name: &str) -> WatcherError {
        NotFoundError {
            cluster: self.name.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
        .into()
    }
}

/// In-memory [`DynamicApi`] twin.
#[derive(Debug, Clone)]
pub struct FakeApi {
    cluster: Arc<FakeCluster>,
    key: GvrKey,
}

#[async_trait]
impl DynamicApi for FakeApi {
    async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject, WatcherError> {
        let state = self.cluster.lock();
        state
            .kinds
            .get(&self.key)
            .and_then(|kind| kind.objects.get(&(namespace.to_string(), name.to_string())))
            .cloned()
            .ok_or_else(|| self.cluster.not_found(namespace, name))
    }

    async fn create(&self, namespace: &str, obj: &DynamicObject) -> Result<DynamicObject, WatcherError> {
        let mut obj = obj.clone();
        if obj.metadata.namespace.is_none() {
            obj.metadata.namespace = Some(namespace.to_string());
        }
        self.cluster.apply(self.key.clone(), obj.clone());
        Ok(obj)
    }

    async fn update(&self, namespace: &str, obj: &DynamicObject) -> Result<DynamicObject, WatcherError> {
        self.create(namespace, obj).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), WatcherError> {
        let mut state = self.cluster.lock();
        let Some(kind) = state.kinds.get_mut(&self.key) else {
            return Err(self.cluster.not_found(namespace, name));
        };
        match kind.objects.remove(&(namespace.to_string(), name.to_string())) {
            Some(obj) => {
                kind.broadcast(watcher::Event::Delete(obj));
                Ok(())
            }
            None => Err(self.cluster.not_found(namespace, name)),
        }
    }
}

fn read_dir(path: &Path) -> Result<Vec<std::path::PathBuf>, WatcherError> {
    let entries = std::fs::read_dir(path).map_err(|err| fixture_err(path, &err))?;
    let mut paths = Vec::new();
    for entry in entries {
        paths.push(entry.map_err(|err| fixture_err(path, &err))?.path());
    }
    paths.sort();
    Ok(paths)
}

fn dir_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn fixture_err(path: &Path, err: &dyn std::fmt::Display) -> WatcherError {
    WatcherError::Fixture {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}
