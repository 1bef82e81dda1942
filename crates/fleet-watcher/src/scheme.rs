//! Mapping from watched Rust types to Kubernetes API resources.

use std::any::{TypeId, type_name};
use std::collections::HashMap;

use kube::api::{ApiResource, GroupVersionKind};

use crate::error::WatcherError;

/// Explicit registry resolving a watched type to the API resource that
/// backs it on the remote clusters.
///
/// Built once at startup and handed to the [`Manager`](crate::Manager);
/// there is no global, load-time registration. Resolution guesses the
/// plural resource name from the kind; use
/// [`WatchConfig::with_resource`](crate::WatchConfig::with_resource)
/// when the guess is wrong, or when the type is built from a different
/// resource entirely.
#[derive(Debug, Default)]
pub struct ResourceScheme {
    kinds: HashMap<TypeId, GroupVersionKind>,
}

impl ResourceScheme {
    /// Creates an empty scheme.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the resource kind backing `T`. A later registration
    /// for the same type replaces the earlier one.
    pub fn register<T: 'static>(&mut self, gvk: GroupVersionKind) {
        self.kinds.insert(TypeId::of::<T>(), gvk);
    }

    pub(crate) fn resolve<T: 'static>(&self) -> Result<ApiResource, WatcherError> {
        self.kinds
            .get(&TypeId::of::<T>())
            .map(ApiResource::from_gvk)
            .ok_or_else(|| WatcherError::UnresolvedKind(type_name::<T>().to_string()))
    }
}
