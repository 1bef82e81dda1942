//! Kafka topic resources mirrored from the workload clusters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fleet_watcher::{DynamicObject, WatchedObject};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kafka.fleetwatch.io",
    version = "v1",
    kind = "Topic",
    namespaced,
    status = "TopicStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TopicSpec {
    /// Kafka pool the topic lives in. Assigned by the operator; topics
    /// without a pool have not been picked up yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,

    /// Broker-side configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<TopicConfig>,

    /// Access control entries granted on the topic.
    #[serde(default)]
    pub acl: Vec<TopicAcl>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopicConfig {
    /// Partition count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<i32>,

    /// Replication factor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication: Option<i32>,

    /// Message retention in hours; -1 keeps messages forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_hours: Option<i32>,
}

/// One access grant on a topic.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopicAcl {
    /// Access level, e.g. `read`, `write` or `readwrite`.
    pub access: String,
    /// Team the grant applies to.
    pub team: String,
    /// Application the grant applies to.
    pub application: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopicStatus {
    /// Synchronization state reported by the operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronization_state: Option<String>,

    /// Errors from the last synchronization attempt.
    #[serde(default)]
    pub errors: Vec<String>,

    /// When the topic was last synchronized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronization_time: Option<DateTime<Utc>>,
}

impl WatchedObject for Topic {
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

/// Builds the topic model from a raw watch payload.
///
/// Topics the operator has not assigned to a pool yet are not admitted
/// into the mirror.
pub fn topic_from_dynamic(raw: &DynamicObject, cluster: &str) -> Option<Topic> {
    let topic: Topic = match serde_json::to_value(raw).and_then(serde_json::from_value) {
        Ok(topic) => topic,
        Err(err) => {
            error!(
                "converting topic {} from cluster {}: {}",
                raw.metadata.name.as_deref().unwrap_or_default(),
                cluster,
                err
            );
            return None;
        }
    };
    topic.spec.pool.is_some().then_some(topic)
}
