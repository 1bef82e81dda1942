//! Managed service instances mirrored from the workload clusters.
//!
//! All managed services share one resource kind; the service type
//! field discriminates what an instance actually is. Only search
//! clusters are mirrored here.

use std::collections::BTreeMap;

use fleet_watcher::{DynamicObject, WatchedObject};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "services.fleetwatch.io",
    version = "v1alpha1",
    kind = "ManagedService",
    namespaced,
    status = "ManagedServiceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServiceSpec {
    /// What the instance is, e.g. `opensearch` or `valkey`.
    pub service_type: String,

    /// Provider plan the instance runs on.
    pub plan: String,

    /// Requested engine version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServiceStatus {
    /// Provisioning state reported by the operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Domain model for one OpenSearch instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCluster {
    /// Instance name.
    pub name: String,
    /// Team namespace the instance belongs to.
    pub namespace: String,
    /// Labels carried over from the backing resource.
    pub labels: BTreeMap<String, String>,
    /// Provider plan the instance runs on.
    pub plan: String,
    /// Requested engine version.
    pub version: Option<String>,
    /// Provisioning state, if reported yet.
    pub state: Option<String>,
}

impl WatchedObject for SearchCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn labels(&self) -> BTreeMap<String, String> {
        self.labels.clone()
    }
}

/// Builds the search-cluster model from a raw managed-service payload.
///
/// Instances of any other service type are rejected before conversion
/// completes; they belong to other mirrors.
pub fn search_cluster_from_dynamic(raw: &DynamicObject, cluster: &str) -> Option<SearchCluster> {
    let service: ManagedService = match serde_json::to_value(raw).and_then(serde_json::from_value) {
        Ok(service) => service,
        Err(err) => {
            error!(
                "converting managed service {} from cluster {}: {}",
                raw.metadata.name.as_deref().unwrap_or_default(),
                cluster,
                err
            );
            return None;
        }
    };

    if service.spec.service_type != "opensearch" {
        return None;
    }

    Some(SearchCluster {
        name: service.metadata.name.clone().unwrap_or_default(),
        namespace: service.metadata.namespace.clone().unwrap_or_default(),
        labels: service.metadata.labels.clone().unwrap_or_default(),
        plan: service.spec.plan,
        version: service.spec.version,
        state: service.status.and_then(|status| status.state),
    })
}

#[cfg(test)]
mod tests {
    use fleet_watcher::{ApiResource, GroupVersionKind};

    use super::*;

    fn manifest(service_type: &str) -> DynamicObject {
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(
            "services.fleetwatch.io",
            "v1alpha1",
            "ManagedService",
        ));
        let mut obj = DynamicObject::new("search-main", &resource).within("team-a");
        obj.data = serde_json::json!({
            "spec": {"serviceType": service_type, "plan": "startup-4", "version": "2.11"},
            "status": {"state": "RUNNING"},
        });
        obj
    }

    #[test]
    fn converts_opensearch_instances() {
        let search = search_cluster_from_dynamic(&manifest("opensearch"), "dev").unwrap();
        assert_eq!(search.name, "search-main");
        assert_eq!(search.namespace, "team-a");
        assert_eq!(search.plan, "startup-4");
        assert_eq!(search.version.as_deref(), Some("2.11"));
        assert_eq!(search.state.as_deref(), Some("RUNNING"));
    }

    #[test]
    fn rejects_other_service_types() {
        assert!(search_cluster_from_dynamic(&manifest("valkey"), "dev").is_none());
    }
}
