//! Unit tests for the dual-indexed data store.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use crate::datastore::DataStore;
    use crate::error::{NotFoundError, WatcherError};
    use crate::object::{EnvironmentWrapper, Filter, WatchedObject, has_labels, in_clusters, objects};
    use crate::test_utils::{TestApp, typed_app, typed_app_image, typed_app_labeled};

    fn key_of(entry: EnvironmentWrapper<TestApp>) -> (String, String, String) {
        (
            entry.cluster().to_string(),
            entry.namespace().to_string(),
            entry.name().to_string(),
        )
    }

    #[test]
    fn round_trip_returns_field_equal_value() {
        let store = DataStore::new();
        store.add("dev", typed_app("topic-1", "team-a"));

        let got = store.get("dev", "team-a", "topic-1").unwrap();
        assert_eq!(got, typed_app("topic-1", "team-a"));
    }

    #[test]
    fn reads_are_copies() {
        let store = DataStore::new();
        store.add("dev", typed_app("topic-1", "team-a"));

        let mut first = store.get("dev", "team-a", "topic-1").unwrap();
        first.spec.image = "mutated".to_string();

        let second = store.get("dev", "team-a", "topic-1").unwrap();
        assert_eq!(second.spec.image, "v1");
    }

    #[test]
    fn get_missing_is_the_typed_not_found() {
        let store: DataStore<TestApp> = DataStore::new();
        let err = store.get("dev", "team-a", "gone").unwrap_err();
        assert!(err.is_not_found());
        match err {
            WatcherError::NotFound(not_found) => assert_eq!(
                not_found,
                NotFoundError {
                    cluster: "dev".to_string(),
                    namespace: "team-a".to_string(),
                    name: "gone".to_string(),
                }
            ),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn remove_then_get_is_not_found() {
        let store = DataStore::new();
        let app = typed_app("topic-1", "team-a");
        store.add("dev", app.clone());

        assert!(store.remove("dev", &app));
        assert!(store.get("dev", "team-a", "topic-1").unwrap_err().is_not_found());
        assert!(store.all().is_empty());

        // Removing again is a no-op.
        assert!(!store.remove("dev", &app));
        assert!(store.all().is_empty());
    }

    #[test]
    fn update_replaces_payload_in_place() {
        let store = DataStore::new();
        store.add("dev", typed_app("a", "team-a"));
        store.add("dev", typed_app("b", "team-a"));

        store.update("dev", typed_app_image("a", "team-a", "v2"));

        let entries = store.get_by_cluster("dev", &[]);
        let names: Vec<_> = entries.iter().map(EnvironmentWrapper::name).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(store.get("dev", "team-a", "a").unwrap().spec.image, "v2");
        // Both views observe the new payload.
        assert_eq!(store.get_by_namespace("team-a", &[])[0].obj().spec.image, "v2");
    }

    #[test]
    fn update_of_unknown_key_is_dropped() {
        let store = DataStore::new();
        store.update("dev", typed_app("ghost", "team-a"));
        assert!(store.all().is_empty());
    }

    #[test]
    fn duplicate_add_keeps_both_entries() {
        let store = DataStore::new();
        store.add("dev", typed_app("dup", "team-a"));
        store.add("dev", typed_app("dup", "team-a"));
        assert_eq!(store.all().len(), 2);
    }

    #[test]
    fn indices_stay_consistent_across_mutations() {
        let store = DataStore::new();
        store.add("dev", typed_app("a", "team-a"));
        store.add("dev", typed_app("b", "team-b"));
        store.add("prod", typed_app("a", "team-a"));
        store.update("dev", typed_app_image("a", "team-a", "v2"));
        store.remove("dev", &typed_app("b", "team-b"));

        let mut from_clusters: Vec<_> = ["dev", "prod"]
            .iter()
            .flat_map(|c| store.get_by_cluster(c, &[]))
            .map(key_of)
            .collect();
        let mut from_namespaces: Vec<_> = ["team-a", "team-b"]
            .iter()
            .flat_map(|ns| store.get_by_namespace(ns, &[]))
            .map(key_of)
            .collect();
        from_clusters.sort();
        from_namespaces.sort();
        assert_eq!(from_clusters, from_namespaces);
        assert_eq!(from_clusters.len(), 2);
    }

    #[test]
    fn query_ordering_follows_sort_invariants() {
        let store = DataStore::new();
        store.add("prod", typed_app("b", "team-a"));
        store.add("dev", typed_app("z", "team-a"));
        store.add("dev", typed_app("a", "team-b"));
        store.add("dev", typed_app("a", "team-a"));

        let entries = store.get_by_namespace("team-a", &[]);
        let by_namespace: Vec<_> = entries.iter().map(|e| (e.cluster(), e.name())).collect();
        assert_eq!(by_namespace, [("dev", "a"), ("dev", "z"), ("prod", "b")]);

        let entries = store.get_by_cluster("dev", &[]);
        let by_cluster: Vec<_> = entries.iter().map(|e| (e.namespace(), e.name())).collect();
        assert_eq!(by_cluster, [("team-a", "a"), ("team-a", "z"), ("team-b", "a")]);
    }

    #[test]
    fn namespace_listing_orders_by_name_within_cluster() {
        let store = DataStore::new();
        store.add("dev", typed_app("topic-1", "team-a"));
        store.add("dev", typed_app("topic-2", "team-a"));

        let entries = store.get_by_namespace("team-a", &[]);
        let names: Vec<_> = entries.iter().map(EnvironmentWrapper::name).collect();
        assert_eq!(names, ["topic-1", "topic-2"]);
    }

    #[test]
    fn filters_compose_with_and_semantics() {
        let store = DataStore::new();
        store.add("dev", typed_app_labeled("a", "team-a", &[("tier", "backend")]));
        store.add("dev", typed_app_labeled("b", "team-a", &[("tier", "backend"), ("exposed", "true")]));
        store.add("prod", typed_app_labeled("c", "team-a", &[("exposed", "true")]));

        let tier: Filter<TestApp> = has_labels(BTreeMap::from([(
            "tier".to_string(),
            "backend".to_string(),
        )]));
        let exposed: Filter<TestApp> = Box::new(|app, _| app.metadata.labels.contains_key("exposed"));

        let both = store.get_by_namespace("team-a", &[tier, exposed]);
        let names: Vec<_> = objects(both).iter().map(|a| a.name().to_string()).collect();
        assert_eq!(names, ["b"]);

        let dev_only: Filter<TestApp> = in_clusters(vec!["dev".to_string()]);
        assert_eq!(store.get_by_namespace("team-a", &[dev_only]).len(), 2);
    }

    #[test]
    fn parallel_adds_and_gets_lose_nothing() {
        let store = Arc::new(DataStore::new());

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store.add("dev", typed_app(&format!("topic-{i}"), "team-a"));
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store.get("dev", "team-a", &format!("topic-{i}")).unwrap()
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.all().len(), 32);
    }
}
