//! Dynamic clients for mutating watched resources.
//!
//! Reads go through the cache; writes go straight to the cluster.
//! [`DynamicApi`] is the seam between the two backends: real clusters
//! get a thin wrapper over `kube::Api<DynamicObject>`, the fake backend
//! implements the same trait in memory.

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, PostParams};
use kube::{Client, Config};

use crate::error::WatcherError;

/// Identity a mutating call is performed as.
///
/// Mutating paths must be authorized as the end user rather than as the
/// service identity, so the caller identity and its group memberships
/// are carried explicitly.
#[derive(Debug, Clone)]
pub struct Actor {
    /// Principal name, typically an email address.
    pub identity: String,
    /// Group memberships propagated to the cluster for authorization.
    pub groups: Vec<String>,
}

impl Actor {
    /// Creates an actor without group memberships.
    #[must_use]
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            groups: Vec::new(),
        }
    }
}

/// Options for impersonated client construction.
#[derive(Debug, Clone, Default)]
pub struct ImpersonationOptions {
    pub(crate) resource: Option<ApiResource>,
}

impl ImpersonationOptions {
    /// Scopes the client to a different resource than the watched one.
    #[must_use]
    pub fn with_resource(mut self, resource: ApiResource) -> Self {
        self.resource = Some(resource);
        self
    }
}

/// Namespaced dynamic-resource operations against one cluster.
///
/// Errors from the remote API are propagated verbatim; retry policy, if
/// any, belongs to the caller.
#[async_trait]
pub trait DynamicApi: Send + Sync {
    /// Fetches one object.
    async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject, WatcherError>;

    /// Creates an object in the given namespace.
    async fn create(&self, namespace: &str, obj: &DynamicObject) -> Result<DynamicObject, WatcherError>;

    /// Replaces an existing object.
    async fn update(&self, namespace: &str, obj: &DynamicObject) -> Result<DynamicObject, WatcherError>;

    /// Deletes one object.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), WatcherError>;
}

/// [`DynamicApi`] over a live cluster connection.
pub(crate) struct RemoteApi {
    client: Client,
    resource: ApiResource,
}

impl RemoteApi {
    pub(crate) fn new(client: Client, resource: ApiResource) -> Self {
        Self { client, resource }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }
}

#[async_trait]
impl DynamicApi for RemoteApi {
    async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject, WatcherError> {
        Ok(self.api(namespace).get(name).await?)
    }

    async fn create(&self, namespace: &str, obj: &DynamicObject) -> Result<DynamicObject, WatcherError> {
        Ok(self.api(namespace).create(&PostParams::default(), obj).await?)
    }

    async fn update(&self, namespace: &str, obj: &DynamicObject) -> Result<DynamicObject, WatcherError> {
        let name = obj.metadata.name.as_deref().unwrap_or_default();
        Ok(self.api(namespace).replace(name, &PostParams::default(), obj).await?)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), WatcherError> {
        self.api(namespace).delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

/// Builds a client performing every request as `actor` against the
/// given cluster configuration.
pub(crate) fn impersonated(config: &Config, actor: &Actor, resource: ApiResource) -> Result<RemoteApi, WatcherError> {
    let mut config = config.clone();
    config.auth_info.impersonate = Some(actor.identity.clone());
    config.auth_info.impersonate_groups = if actor.groups.is_empty() {
        None
    } else {
        Some(actor.groups.clone())
    };

    let client = Client::try_from(config)?;
    Ok(RemoteApi::new(client, resource))
}
