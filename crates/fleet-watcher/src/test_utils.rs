//! Test utilities for the watcher engine.
//!
//! Log setup, manifest builders and a small typed model shared across
//! the test suites.

use std::collections::BTreeMap;

use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde::Deserialize;

use crate::object::WatchedObject;

/// Installs the test log subscriber once; repeat calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("fleet_watcher=debug")
        .with_test_writer()
        .try_init();
}

/// API resource backing the test application kind.
pub fn app_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("apps.fleetwatch.io", "v1", "Application"))
}

/// Typed model deserialized from application manifests.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TestApp {
    pub metadata: TestMeta,
    #[serde(default)]
    pub spec: TestAppSpec,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TestMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TestAppSpec {
    #[serde(default)]
    pub image: String,
}

impl WatchedObject for TestApp {
    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    fn labels(&self) -> BTreeMap<String, String> {
        self.metadata.labels.clone()
    }
}

/// Application manifest with the default image.
pub fn app(name: &str, namespace: &str) -> DynamicObject {
    app_with_image(name, namespace, "v1")
}

/// Application manifest with an explicit image.
pub fn app_with_image(name: &str, namespace: &str, image: &str) -> DynamicObject {
    let mut obj = DynamicObject::new(name, &app_resource()).within(namespace);
    obj.data = serde_json::json!({"spec": {"image": image}});
    obj
}

/// Structural conversion used where tests pass an explicit converter.
pub fn convert_app(raw: &DynamicObject, _cluster: &str) -> Option<TestApp> {
    serde_json::to_value(raw)
        .ok()
        .and_then(|value| serde_json::from_value(value).ok())
}

/// Bare typed model for store-level tests.
pub fn typed_app(name: &str, namespace: &str) -> TestApp {
    typed_app_image(name, namespace, "v1")
}

pub fn typed_app_image(name: &str, namespace: &str, image: &str) -> TestApp {
    TestApp {
        metadata: TestMeta {
            name: name.to_string(),
            namespace: namespace.to_string(),
            labels: BTreeMap::new(),
        },
        spec: TestAppSpec {
            image: image.to_string(),
        },
    }
}

pub fn typed_app_labeled(name: &str, namespace: &str, labels: &[(&str, &str)]) -> TestApp {
    let mut app = typed_app(name, namespace);
    app.metadata.labels = labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    app
}
