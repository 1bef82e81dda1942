//! Process-wide factory for watchers across all configured clusters.
//!
//! The manager owns one cluster connector per configured cluster and
//! hands out watchers on demand; watchers for different resource kinds
//! share the connectors and their subscription caches.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::Client;
use kube::api::ApiResource;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::binding::ClusterBinding;
use crate::cluster::{Backend, ClusterConnector};
use crate::config::ClusterConfigMap;
use crate::error::WatcherError;
use crate::object::WatchedObject;
use crate::scheme::ResourceScheme;
use crate::watcher::{Shared, WatchConfig, Watcher};

/// Factory producing one [`Watcher`] per resource kind over a shared
/// set of cluster connections.
pub struct Manager {
    scheme: ResourceScheme,
    connectors: BTreeMap<String, Arc<ClusterConnector>>,
    shutdown: CancellationToken,
}

impl Manager {
    /// Connects to every configured cluster, failing fast if any
    /// client cannot be constructed.
    pub async fn connect(scheme: ResourceScheme, clusters: ClusterConfigMap) -> Result<Self, WatcherError> {
        let shutdown = CancellationToken::new();
        let mut connectors = BTreeMap::new();

        for (cluster, connection) in clusters {
            let config = connection.load().await.map_err(|source| WatcherError::ClientConstruction {
                cluster: cluster.clone(),
                source,
            })?;
            let client = Client::try_from(config.clone()).map_err(|err| WatcherError::ClientConstruction {
                cluster: cluster.clone(),
                source: Box::new(err),
            })?;
            info!("connected to cluster {}", cluster);

            let backend = Backend::Remote {
                client,
                config: Box::new(config),
            };
            connectors.insert(
                cluster.clone(),
                Arc::new(ClusterConnector::new(cluster, backend, shutdown.child_token())),
            );
        }

        Ok(Self {
            scheme,
            connectors,
            shutdown,
        })
    }

    /// Builds a manager over in-memory clusters.
    #[cfg(any(test, feature = "test-util"))]
    pub fn fake(scheme: ResourceScheme, clusters: crate::fake::FakeClusters) -> Self {
        let shutdown = CancellationToken::new();
        let connectors = clusters
            .into_parts()
            .map(|(name, cluster)| {
                let connector = ClusterConnector::new(name.clone(), Backend::Fake(cluster), shutdown.child_token());
                (name, Arc::new(connector))
            })
            .collect();
        Self {
            scheme,
            connectors,
            shutdown,
        }
    }

    /// Names of the configured clusters.
    pub fn clusters(&self) -> impl Iterator<Item = &str> {
        self.connectors.keys().map(String::as_str)
    }

    /// Assembles a watcher for `T`: one binding per configured cluster
    /// over a single shared store.
    ///
    /// A type that cannot be resolved to an API resource yields a
    /// disabled watcher instead of an error, so the remaining kinds
    /// keep working; a cluster that does not serve the resource is
    /// skipped the same way.
    pub fn watch<T: WatchedObject>(&self, config: WatchConfig<T>) -> Watcher<T> {
        let resource = match config.resource.clone().map_or_else(|| self.scheme.resolve::<T>(), Ok) {
            Ok(resource) => resource,
            Err(err) => {
                error!("resolving watched type: {}", err);
                return Watcher::disabled(std::any::type_name::<T>().to_string());
            }
        };

        info!("creating {} watcher", gvr_label(&resource));
        let shared = Arc::new(Shared::new(gvr_label(&resource)));
        let skip_namespaces: Arc<[String]> = config.skip_namespaces.clone().into();

        let bindings = self
            .connectors
            .values()
            .map(|connector| {
                ClusterBinding::new(
                    connector,
                    resource.clone(),
                    config.label_selector.as_deref(),
                    Arc::clone(&config.converter),
                    Arc::clone(&skip_namespaces),
                    Arc::clone(&shared),
                )
            })
            .collect();

        Watcher::assembled(shared, bindings)
    }

    /// Tears down every cluster's subscriptions; used at process
    /// shutdown.
    pub fn stop(&self) {
        info!("stopping watch subscriptions");
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("clusters", &self.connectors.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn gvr_label(resource: &ApiResource) -> String {
    if resource.group.is_empty() {
        format!("{}/{}", resource.version, resource.plural)
    } else {
        format!("{}/{}/{}", resource.group, resource.version, resource.plural)
    }
}
