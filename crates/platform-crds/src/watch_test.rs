//! End-to-end tests driving the platform kinds through the watcher.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fleet_watcher::fake::FakeClusters;
    use fleet_watcher::{
        ApiResource, DynamicObject, GroupVersionKind, Manager, ResourceScheme, WatchConfig,
        WatchedObject,
    };
    use tokio_util::sync::CancellationToken;

    use crate::topic::topic_from_dynamic;
    use crate::managed_service::search_cluster_from_dynamic;
    use crate::{SearchCluster, Topic, register_all};

    fn scheme() -> ResourceScheme {
        let mut scheme = ResourceScheme::new();
        register_all(&mut scheme);
        scheme
    }

    fn topic_resource() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk("kafka.fleetwatch.io", "v1", "Topic"))
    }

    fn service_resource() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(
            "services.fleetwatch.io",
            "v1alpha1",
            "ManagedService",
        ))
    }

    fn topic_manifest(name: &str, namespace: &str, pool: Option<&str>) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &topic_resource()).within(namespace);
        obj.data = match pool {
            Some(pool) => serde_json::json!({"spec": {"pool": pool, "config": {"partitions": 3}}}),
            None => serde_json::json!({"spec": {}}),
        };
        obj
    }

    fn service_manifest(name: &str, namespace: &str, service_type: &str) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &service_resource()).within(namespace);
        obj.data = serde_json::json!({"spec": {"serviceType": service_type, "plan": "startup-4"}});
        obj
    }

    #[tokio::test]
    async fn topics_mirror_across_clusters_with_pool_filtering() {
        let mut clusters = FakeClusters::new(["dev", "prod"]);
        let dev = clusters.cluster("dev");
        let prod = clusters.cluster("prod");
        dev.add_object(&topic_resource(), topic_manifest("orders", "team-a", Some("pool-a")));
        dev.add_object(&topic_resource(), topic_manifest("pending", "team-a", None));
        prod.add_object(&topic_resource(), topic_manifest("orders", "team-a", Some("pool-a")));

        let manager = Manager::fake(scheme(), clusters);
        let topics = manager.watch(WatchConfig::<Topic>::new().with_converter(topic_from_dynamic));
        let stop = CancellationToken::new();
        topics.start(&stop);
        assert!(topics.wait_for_ready(Duration::from_secs(2)).await);

        // The unpooled topic is rejected by the converter.
        assert_eq!(topics.all().len(), 2);
        let orders = topics.get("dev", "team-a", "orders").unwrap();
        assert_eq!(orders.spec.pool.as_deref(), Some("pool-a"));
        assert!(topics.get("dev", "team-a", "pending").unwrap_err().is_not_found());

        let by_namespace = topics.get_by_namespace("team-a", &[]);
        let observed: Vec<_> = by_namespace.iter().map(|e| (e.cluster(), e.name())).collect();
        assert_eq!(observed, [("dev", "orders"), ("prod", "orders")]);
        manager.stop();
    }

    #[tokio::test]
    async fn search_clusters_admit_only_opensearch_instances() {
        let mut clusters = FakeClusters::new(["dev"]);
        let dev = clusters.cluster("dev");
        dev.add_object(&service_resource(), service_manifest("search-main", "team-a", "opensearch"));
        dev.add_object(&service_resource(), service_manifest("cache-main", "team-a", "valkey"));

        let manager = Manager::fake(scheme(), clusters);
        let search = manager.watch(WatchConfig::converted(search_cluster_from_dynamic));
        let stop = CancellationToken::new();
        search.start(&stop);
        assert!(search.wait_for_ready(Duration::from_secs(2)).await);

        let mirrored: Vec<SearchCluster> = fleet_watcher::objects(search.get_by_namespace("team-a", &[]));
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].name(), "search-main");
        assert_eq!(mirrored[0].plan, "startup-4");
        manager.stop();
    }
}
