//! Binding of one resource kind's watch stream, in one cluster, to the
//! shared data store.
//!
//! A binding adapts the raw subscription to the typed watcher
//! contract: payload conversion, cache application, readiness, and
//! client minting for mutations. A binding whose subscription cannot
//! be created stays disabled without affecting the other clusters.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use kube::api::{ApiResource, DynamicObject};
use kube_runtime::watcher::Event;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::error;
#[cfg(any(test, feature = "test-util"))]
use tracing::warn;

use crate::client::{Actor, DynamicApi, ImpersonationOptions, RemoteApi, impersonated};
use crate::cluster::{Backend, ClusterConnector, RawEvent, Subscription};
use crate::error::WatcherError;
use crate::object::WatchedObject;
use crate::watcher::Shared;

/// Converts one raw payload into the typed model; `None` rejects the
/// payload and the event is dropped.
pub type Converter<T> = Arc<dyn Fn(&DynamicObject, &str) -> Option<T> + Send + Sync>;

/// State handed to the event loop when the binding starts.
struct PendingLoop {
    events: mpsc::Receiver<RawEvent>,
    synced: watch::Sender<bool>,
}

pub(crate) struct ClusterBinding<T: WatchedObject> {
    cluster: String,
    backend: Backend,
    resource: ApiResource,
    converter: Converter<T>,
    skip_namespaces: Arc<[String]>,
    shared: Arc<Shared<T>>,
    registered: bool,
    subscription: Option<Arc<Subscription>>,
    pending: Mutex<Option<PendingLoop>>,
    synced: watch::Receiver<bool>,
}

impl<T: WatchedObject> ClusterBinding<T> {
    pub(crate) fn new(
        connector: &ClusterConnector,
        resource: ApiResource,
        selector: Option<&str>,
        converter: Converter<T>,
        skip_namespaces: Arc<[String]>,
        shared: Arc<Shared<T>>,
    ) -> Self {
        let cluster = connector.cluster().to_string();
        let (synced_tx, synced_rx) = watch::channel(false);

        let (registered, subscription, pending) = match connector.subscription(&resource, selector) {
            Ok(subscription) => {
                let events = subscription.attach();
                let pending = PendingLoop {
                    events,
                    synced: synced_tx,
                };
                (true, Some(subscription), Some(pending))
            }
            Err(err) => {
                // Deliberate partial degradation: this cluster stays
                // dark while the others keep delivering.
                error!("creating {} subscription for cluster {}: {}", resource.plural, cluster, err);
                (false, None, None)
            }
        };

        Self {
            cluster,
            backend: connector.backend().clone(),
            resource,
            converter,
            skip_namespaces,
            shared,
            registered,
            subscription,
            pending: Mutex::new(pending),
            synced: synced_rx,
        }
    }

    pub(crate) fn cluster(&self) -> &str {
        &self.cluster
    }

    pub(crate) fn registered(&self) -> bool {
        self.registered
    }

    /// Signal flipping to true once the initial listing is applied.
    pub(crate) fn synced(&self) -> watch::Receiver<bool> {
        self.synced.clone()
    }

    /// Starts the subscription driver and this binding's event loop.
    /// Calling start twice is a no-op.
    pub(crate) fn start(&self, stop: &CancellationToken) {
        let Some(subscription) = &self.subscription else {
            return;
        };
        let Some(pending) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        subscription.ensure_started(stop);

        let events = EventLoop {
            cluster: self.cluster.clone(),
            converter: Arc::clone(&self.converter),
            skip_namespaces: Arc::clone(&self.skip_namespaces),
            shared: Arc::clone(&self.shared),
        };
        let stop = stop.clone();
        tokio::spawn(async move { events.run(pending.events, pending.synced, stop).await });
    }

    /// Cluster-scoped client performing requests as the caller.
    pub(crate) fn impersonated_client(
        &self,
        actor: &Actor,
        options: ImpersonationOptions,
    ) -> Result<Arc<dyn DynamicApi>, WatcherError> {
        let resource = options.resource.unwrap_or_else(|| self.resource.clone());
        match &self.backend {
            Backend::Remote { config, .. } => {
                let api = impersonated(config, actor, resource)?;
                Ok(Arc::new(api))
            }
            #[cfg(any(test, feature = "test-util"))]
            Backend::Fake(cluster) => {
                warn!(
                    "impersonation is not supported in fake mode, would impersonate {} with groups {:?}",
                    actor.identity, actor.groups
                );
                Ok(Arc::new(cluster.api(&resource)))
            }
        }
    }

    /// Cluster-scoped client under the service identity.
    pub(crate) fn client(&self) -> Arc<dyn DynamicApi> {
        match &self.backend {
            Backend::Remote { client, .. } => {
                Arc::new(RemoteApi::new(client.clone(), self.resource.clone()))
            }
            #[cfg(any(test, feature = "test-util"))]
            Backend::Fake(cluster) => Arc::new(cluster.api(&self.resource)),
        }
    }

    /// Deletes the backing resource as the caller.
    pub(crate) async fn delete(&self, actor: &Actor, namespace: &str, name: &str) -> Result<(), WatcherError> {
        let api = self.impersonated_client(actor, ImpersonationOptions::default())?;

        if self.backend.is_fake() {
            // The fake backend's event plumbing is not trusted to
            // deliver the deletion, so the cache entry is removed here
            // as well; the loop-delivered removal is then a no-op.
            if let Ok(raw) = api.get(namespace, name).await {
                if let Some(obj) = (self.converter)(&raw, &self.cluster) {
                    self.shared.remove(&self.cluster, &obj);
                }
            }
        }

        api.delete(namespace, name).await
    }
}

/// Single-writer event loop applying one cluster's stream to the
/// shared store.
struct EventLoop<T: WatchedObject> {
    cluster: String,
    converter: Converter<T>,
    skip_namespaces: Arc<[String]>,
    shared: Arc<Shared<T>>,
}

impl<T: WatchedObject> EventLoop<T> {
    async fn run(
        self,
        mut events: mpsc::Receiver<RawEvent>,
        synced: watch::Sender<bool>,
        stop: CancellationToken,
    ) {
        // Keys admitted into the store, used to map the stream's
        // upserts onto distinct add/update operations.
        let mut known: HashSet<(String, String)> = HashSet::new();
        // Keys seen during an in-flight re-list; objects missing from
        // the new listing are removed when it completes.
        let mut relist: Option<HashSet<(String, String)>> = None;

        loop {
            let event = tokio::select! {
                () = stop.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                Event::Init => relist = Some(HashSet::new()),
                Event::InitApply(raw) => {
                    if let Some(key) = self.upsert(&raw, &mut known) {
                        if let Some(seen) = relist.as_mut() {
                            seen.insert(key);
                        }
                    }
                }
                Event::InitDone => {
                    if let Some(seen) = relist.take() {
                        let stale: Vec<_> = known.difference(&seen).cloned().collect();
                        for (namespace, name) in stale {
                            known.remove(&(namespace.clone(), name.clone()));
                            self.shared.remove_key(&self.cluster, &namespace, &name);
                        }
                    }
                    let _ = synced.send(true);
                }
                Event::Apply(raw) => {
                    self.upsert(&raw, &mut known);
                }
                Event::Delete(raw) => self.delete(&raw, &mut known),
            }
        }
    }

    /// Converts and admits one payload; conversion has no error
    /// channel back to the stream, so rejects are logged and dropped.
    fn admit(&self, raw: &DynamicObject) -> Option<T> {
        let namespace = raw.metadata.namespace.as_deref().unwrap_or_default();
        if self.skip_namespaces.iter().any(|skip| skip == namespace) {
            return None;
        }
        (self.converter)(raw, &self.cluster)
    }

    fn upsert(&self, raw: &DynamicObject, known: &mut HashSet<(String, String)>) -> Option<(String, String)> {
        let obj = self.admit(raw)?;
        let key = (obj.namespace().to_string(), obj.name().to_string());
        if known.contains(&key) {
            self.shared.update(&self.cluster, obj);
        } else {
            known.insert(key.clone());
            self.shared.add(&self.cluster, obj);
        }
        Some(key)
    }

    fn delete(&self, raw: &DynamicObject, known: &mut HashSet<(String, String)>) {
        let Some(obj) = self.admit(raw) else {
            return;
        };
        known.remove(&(obj.namespace().to_string(), obj.name().to_string()));
        self.shared.remove(&self.cluster, &obj);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::{mpsc, watch};
    use tokio_util::sync::CancellationToken;

    use super::EventLoop;
    use crate::cluster::RawEvent;
    use crate::test_utils::{TestApp, app, convert_app};
    use crate::watcher::Shared;
    use kube_runtime::watcher::Event;

    fn event_loop(shared: &Arc<Shared<TestApp>>) -> EventLoop<TestApp> {
        EventLoop {
            cluster: "dev".to_string(),
            converter: Arc::new(convert_app),
            skip_namespaces: Arc::from(Vec::<String>::new()),
            shared: Arc::clone(shared),
        }
    }

    /// Feeds the events through a fresh loop and waits until every one
    /// of them has been applied; returns the final sync state.
    async fn drive(shared: Arc<Shared<TestApp>>, events: Vec<RawEvent>) -> bool {
        let (tx, rx) = mpsc::channel(16);
        let (synced_tx, synced_rx) = watch::channel(false);
        let stop = CancellationToken::new();

        let run = event_loop(&shared);
        let handle = tokio::spawn(run.run(rx, synced_tx, stop));
        for event in events {
            tx.send(event).await.unwrap();
        }
        // Closing the channel ends the loop once the queue is drained.
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        *synced_rx.borrow()
    }

    #[tokio::test]
    async fn initial_listing_populates_store_and_syncs() {
        let shared = Arc::new(Shared::new("apps".to_string()));
        let synced = drive(
            Arc::clone(&shared),
            vec![
                Event::Init,
                Event::InitApply(app("one", "team-a")),
                Event::InitApply(app("two", "team-a")),
                Event::InitDone,
            ],
        )
        .await;

        assert!(synced);
        assert_eq!(shared.store().all().len(), 2);
        assert!(shared.store().get("dev", "team-a", "one").is_ok());
    }

    #[tokio::test]
    async fn relist_removes_vanished_objects() {
        let shared = Arc::new(Shared::new("apps".to_string()));
        let _ = drive(
            Arc::clone(&shared),
            vec![
                Event::Init,
                Event::InitApply(app("one", "team-a")),
                Event::InitApply(app("two", "team-a")),
                Event::InitDone,
                // Re-list after a stream restart: "two" is gone.
                Event::Init,
                Event::InitApply(app("one", "team-a")),
                Event::InitDone,
            ],
        )
        .await;

        assert!(shared.store().get("dev", "team-a", "one").is_ok());
        assert!(
            shared
                .store()
                .get("dev", "team-a", "two")
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn apply_of_known_key_updates_in_place() {
        let shared = Arc::new(Shared::new("apps".to_string()));
        let mut updated = app("one", "team-a");
        updated.data = serde_json::json!({"spec": {"image": "v2"}});

        let _ = drive(
            Arc::clone(&shared),
            vec![
                Event::Init,
                Event::InitApply(app("one", "team-a")),
                Event::InitDone,
                Event::Apply(updated),
            ],
        )
        .await;

        let current = shared.store().get("dev", "team-a", "one").unwrap();
        assert_eq!(current.spec.image, "v2");
        assert_eq!(shared.store().all().len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_and_forgets_key() {
        let shared = Arc::new(Shared::new("apps".to_string()));
        let _ = drive(
            Arc::clone(&shared),
            vec![
                Event::Init,
                Event::InitApply(app("one", "team-a")),
                Event::InitDone,
                Event::Delete(app("one", "team-a")),
            ],
        )
        .await;

        assert!(shared.store().all().is_empty());
    }

    #[tokio::test]
    async fn skip_namespace_rejects_before_conversion() {
        let shared = Arc::new(Shared::new("apps".to_string()));
        let mut events = event_loop(&shared);
        events.skip_namespaces = Arc::from(vec!["kube-system".to_string()]);

        let mut known = std::collections::HashSet::new();
        assert!(events.upsert(&app("one", "kube-system"), &mut known).is_none());
        assert!(events.upsert(&app("one", "team-a"), &mut known).is_some());
        assert_eq!(shared.store().all().len(), 1);
    }
}
