//! Per-cluster connections and shared watch subscriptions.
//!
//! A [`ClusterConnector`] owns one backend connection and lazily
//! creates one long-lived watch subscription per resource kind.
//! Repeated requests for the same kind reuse the cached subscription,
//! so watchers sharing a cluster share the underlying stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use futures::stream::BoxStream;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::{Client, Config};
use kube_runtime::WatchStreamExt;
use kube_runtime::watcher;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::WatcherError;

#[cfg(any(test, feature = "test-util"))]
use crate::fake::FakeCluster;

/// Queue depth of each binding's event channel. A full queue
/// backpressures the subscription driver instead of dropping events,
/// preserving per-object ordering.
const EVENT_QUEUE_DEPTH: usize = 256;

pub(crate) type RawEvent = watcher::Event<DynamicObject>;
pub(crate) type RawEventStream = BoxStream<'static, Result<RawEvent, watcher::Error>>;

/// Identifies a resource kind on the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct GvrKey {
    group: String,
    version: String,
    plural: String,
}

impl GvrKey {
    pub(crate) fn new(resource: &ApiResource) -> Self {
        Self {
            group: resource.group.clone(),
            version: resource.version.clone(),
            plural: resource.plural.clone(),
        }
    }
}

/// Connection to one cluster.
#[derive(Clone)]
pub(crate) enum Backend {
    /// A live cluster reached through a `kube::Client`.
    Remote {
        client: Client,
        config: Box<Config>,
    },
    /// In-memory cluster used by tests.
    #[cfg(any(test, feature = "test-util"))]
    Fake(Arc<FakeCluster>),
}

impl Backend {
    /// Explicit test-mode capability flag, checked instead of
    /// inspecting concrete client types.
    pub(crate) fn is_fake(&self) -> bool {
        match self {
            Backend::Remote { .. } => false,
            #[cfg(any(test, feature = "test-util"))]
            Backend::Fake(_) => true,
        }
    }

    fn supports(&self, resource: &ApiResource) -> bool {
        match self {
            Backend::Remote { .. } => true,
            #[cfg(any(test, feature = "test-util"))]
            Backend::Fake(cluster) => cluster.supports(resource),
        }
    }

    fn watch(&self, resource: &ApiResource, selector: Option<&str>) -> RawEventStream {
        match self {
            Backend::Remote { client, .. } => {
                let api: Api<DynamicObject> = Api::all_with(client.clone(), resource);
                let mut config = watcher::Config::default();
                if let Some(selector) = selector {
                    config = config.labels(selector);
                }
                watcher::watcher(api, config).default_backoff().boxed()
            }
            #[cfg(any(test, feature = "test-util"))]
            Backend::Fake(cluster) => cluster.watch(resource),
        }
    }
}

/// One cluster's backend plus its cache of long-lived subscriptions.
pub(crate) struct ClusterConnector {
    cluster: String,
    backend: Backend,
    shutdown: CancellationToken,
    subscriptions: Mutex<HashMap<(GvrKey, Option<String>), Arc<Subscription>>>,
}

impl ClusterConnector {
    pub(crate) fn new(cluster: String, backend: Backend, shutdown: CancellationToken) -> Self {
        Self {
            cluster,
            backend,
            shutdown,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn cluster(&self) -> &str {
        &self.cluster
    }

    pub(crate) fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Returns the shared subscription for a resource kind, creating it
    /// on first request. Label-filtered subscriptions are cached
    /// separately from unfiltered ones.
    pub(crate) fn subscription(
        &self,
        resource: &ApiResource,
        selector: Option<&str>,
    ) -> Result<Arc<Subscription>, WatcherError> {
        if !self.backend.supports(resource) {
            return Err(WatcherError::UnsupportedResource {
                cluster: self.cluster.clone(),
                resource: resource.plural.clone(),
            });
        }

        let key = (GvrKey::new(resource), selector.map(str::to_string));
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
        let subscription = subscriptions.entry(key).or_insert_with(|| {
            Arc::new(Subscription::new(
                self.cluster.clone(),
                self.backend.clone(),
                resource.clone(),
                selector.map(str::to_string),
                self.shutdown.clone(),
            ))
        });
        Ok(Arc::clone(subscription))
    }
}

/// One long-lived watch stream for a (cluster, resource kind) pair,
/// fanned out to any number of binding queues by a single driver task.
pub(crate) struct Subscription {
    cluster: String,
    resource: ApiResource,
    selector: Option<String>,
    backend: Backend,
    handlers: Mutex<Vec<mpsc::Sender<RawEvent>>>,
    started: AtomicBool,
    shutdown: CancellationToken,
}

impl Subscription {
    fn new(
        cluster: String,
        backend: Backend,
        resource: ApiResource,
        selector: Option<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cluster,
            resource,
            selector,
            backend,
            handlers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Registers a consumer queue. Must be called before the driver
    /// starts for the consumer to observe the initial listing.
    pub(crate) fn attach(&self) -> mpsc::Receiver<RawEvent> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Spawns the driver task on first call; later calls are no-ops.
    pub(crate) fn ensure_started(self: &Arc<Self>, stop: &CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let subscription = Arc::clone(self);
        let stop = stop.clone();
        tokio::spawn(async move { subscription.run(stop).await });
    }

    async fn run(self: Arc<Self>, stop: CancellationToken) {
        debug!("starting {} subscription for cluster {}", self.resource.plural, self.cluster);
        let mut stream = self.backend.watch(&self.resource, self.selector.as_deref());
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                () = self.shutdown.cancelled() => break,
                item = stream.next() => match item {
                    None => break,
                    Some(Ok(event)) => self.dispatch(event).await,
                    Some(Err(err)) => {
                        warn!(
                            "{} watch stream for cluster {} failed: {}",
                            self.resource.plural, self.cluster, err
                        );
                    }
                },
            }
        }
        debug!("{} subscription for cluster {} stopped", self.resource.plural, self.cluster);
    }

    async fn dispatch(&self, event: RawEvent) {
        let targets: Vec<mpsc::Sender<RawEvent>> = {
            let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            handlers.retain(|tx| !tx.is_closed());
            handlers.clone()
        };
        for tx in targets {
            let _ = tx.send(event.clone()).await;
        }
    }
}
