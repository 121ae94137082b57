mod common;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tempfile::TempDir;

use watchkeeper::models::{AuditEvent, EventType};
use watchkeeper::store::keys;
use watchkeeper::store::{QueryOptions, Store};
use watchkeeper::transform::transform_watch_event;

fn open_store(retention_days: i64) -> (Store, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path(), retention_days).unwrap();
    (store, dir)
}

fn base_time() -> DateTime<Utc> {
    let two_hours_ago = Utc::now() - Duration::hours(2);
    DateTime::from_timestamp(two_hours_ago.timestamp(), 0).unwrap()
}

fn event_at(object: &Value, event_type: EventType, ts: DateTime<Utc>) -> AuditEvent {
    let mut event = transform_watch_event(object, event_type, None).unwrap();
    event.timestamp = ts;
    event
}

// ── Index consistency ───────────────────────────────────────────

#[test]
fn event_kind_is_visible_through_all_three_indexes() {
    let (store, _dir) = open_store(14);
    let ts = base_time();

    let object = common::cluster_event("default", "p1.evt1", "Pod", "default", "p1");
    let event = event_at(&object, EventType::Added, ts);
    store.store_event(&event, &object).unwrap();

    let by_time = store.query_events(&QueryOptions::default()).unwrap();
    let by_object = store
        .get_object_history("default", "events", "p1.evt1")
        .unwrap();
    let by_reference = store.get_related_events("default", "Pod", "p1").unwrap();

    assert_eq!(by_time.len(), 1);
    assert_eq!(by_object.len(), 1);
    assert_eq!(by_reference.len(), 1);

    // All three indexes hold the identical serialized record.
    let expected = serde_json::to_value(&event).unwrap();
    assert_eq!(serde_json::to_value(&by_time[0]).unwrap(), expected);
    assert_eq!(serde_json::to_value(&by_object[0]).unwrap(), expected);
    assert_eq!(serde_json::to_value(&by_reference[0]).unwrap(), expected);
}

#[test]
fn non_event_records_have_no_reference_entry() {
    let (store, _dir) = open_store(14);

    let object = common::pod("default", "p1");
    let event = event_at(&object, EventType::Added, base_time());
    store.store_event(&event, &object).unwrap();

    assert_eq!(store.get_related_events("default", "Pod", "p1").unwrap().len(), 0);
}

#[test]
fn event_without_involved_kind_gets_no_reference_entry() {
    let (store, _dir) = open_store(14);

    let mut object = common::cluster_event("default", "p1.evt1", "Pod", "default", "p1");
    object["involvedObject"]
        .as_object_mut()
        .unwrap()
        .remove("kind");
    let event = event_at(&object, EventType::Added, base_time());
    store.store_event(&event, &object).unwrap();

    assert_eq!(store.get_related_events("default", "Pod", "p1").unwrap().len(), 0);
    // The time and object indexes are still written.
    assert_eq!(store.query_events(&QueryOptions::default()).unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_writers_leave_every_index_complete() {
    let (store, _dir) = open_store(14);
    let store = Arc::new(store);
    let base = base_time();

    let mut handles = Vec::new();
    for task in 0..4 {
        let store = store.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            for i in 0..10 {
                let name = format!("p{task}-{i}");
                let object = common::pod("default", &name);
                let mut event =
                    transform_watch_event(&object, EventType::Added, None).unwrap();
                event.timestamp = base + Duration::seconds(task * 10 + i);
                store.store_event(&event, &object).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let all = store.query_events(&QueryOptions::default()).unwrap();
    assert_eq!(all.len(), 40);
    for event in &all {
        let history = store
            .get_object_history(&event.namespace, &event.resource_type, &event.resource_name)
            .unwrap();
        assert_eq!(history.len(), 1, "missing object entry for {}", event.resource_name);
    }
}

// ── Time-range queries ──────────────────────────────────────────

#[test]
fn query_respects_window_bounds_and_order() {
    let (store, _dir) = open_store(14);
    let base = base_time();

    let pod = common::pod("default", "p1");
    for i in 0..20 {
        let event = event_at(&pod, EventType::Modified, base + Duration::seconds(i));
        store.store_event(&event, &pod).unwrap();
    }

    let opts = QueryOptions {
        start: Some(base + Duration::seconds(5)),
        end: Some(base + Duration::seconds(10)),
        ..QueryOptions::default()
    };
    let events = store.query_events(&opts).unwrap();

    assert_eq!(events.len(), 6);
    for pair in events.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
    assert!(events.iter().all(|e| {
        e.timestamp >= base + Duration::seconds(5) && e.timestamp <= base + Duration::seconds(10)
    }));
}

#[test]
fn query_applies_coarse_and_fine_filters() {
    let (store, _dir) = open_store(14);
    let base = base_time();

    let pod_a = common::pod("default", "a");
    let pod_b = common::pod("kube-system", "b");
    let node = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": { "name": "n1", "uid": "node-1" }
    });

    store
        .store_event(&event_at(&pod_a, EventType::Added, base), &pod_a)
        .unwrap();
    store
        .store_event(
            &event_at(&pod_a, EventType::Deleted, base + Duration::seconds(1)),
            &pod_a,
        )
        .unwrap();
    store
        .store_event(
            &event_at(&pod_b, EventType::Added, base + Duration::seconds(2)),
            &pod_b,
        )
        .unwrap();
    store
        .store_event(
            &event_at(&node, EventType::Added, base + Duration::seconds(3)),
            &node,
        )
        .unwrap();

    let namespaced = store
        .query_events(&QueryOptions {
            namespace: Some("default".to_string()),
            ..QueryOptions::default()
        })
        .unwrap();
    assert_eq!(namespaced.len(), 2);

    let nodes = store
        .query_events(&QueryOptions {
            resource_type: Some("nodes".to_string()),
            ..QueryOptions::default()
        })
        .unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].namespace, "");

    let deletes = store
        .query_events(&QueryOptions {
            verb: Some("delete".to_string()),
            ..QueryOptions::default()
        })
        .unwrap();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].resource_name, "a");

    let nobody = store
        .query_events(&QueryOptions {
            user: Some("someone-else".to_string()),
            ..QueryOptions::default()
        })
        .unwrap();
    assert!(nobody.is_empty());
}

#[test]
fn query_stops_at_limit() {
    let (store, _dir) = open_store(14);
    let base = base_time();

    let pod = common::pod("default", "p1");
    for i in 0..10 {
        let event = event_at(&pod, EventType::Modified, base + Duration::seconds(i));
        store.store_event(&event, &pod).unwrap();
    }

    let events = store
        .query_events(&QueryOptions {
            limit: 4,
            ..QueryOptions::default()
        })
        .unwrap();
    assert_eq!(events.len(), 4);
    assert_eq!(events[0].timestamp, base);
    assert_eq!(events[3].timestamp, base + Duration::seconds(3));
}

// ── Object history ──────────────────────────────────────────────

#[test]
fn history_returns_exactly_the_objects_records_in_order() {
    let (store, _dir) = open_store(14);
    let base = base_time();

    let p1 = common::pod("default", "p1");
    let p2 = common::pod("default", "p2");
    for i in 0..3 {
        let event = event_at(&p1, EventType::Modified, base + Duration::seconds(i * 2));
        store.store_event(&event, &p1).unwrap();
        let event = event_at(&p2, EventType::Modified, base + Duration::seconds(i * 2 + 1));
        store.store_event(&event, &p2).unwrap();
    }

    let history = store.get_object_history("default", "pods", "p1").unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|e| e.resource_name == "p1"));
    for pair in history.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

// ── Retention ───────────────────────────────────────────────────

#[test]
fn expired_entries_are_invisible_and_reclaimable() {
    let (store, _dir) = open_store(0);

    let object = common::cluster_event("default", "p1.evt1", "Pod", "default", "p1");
    let event = event_at(&object, EventType::Added, base_time());
    store.store_event(&event, &object).unwrap();

    // Zero retention expires entries at write time.
    assert!(store.query_events(&QueryOptions::default()).unwrap().is_empty());
    assert!(store
        .get_object_history("default", "events", "p1.evt1")
        .unwrap()
        .is_empty());
    assert!(store.get_related_events("default", "Pod", "p1").unwrap().is_empty());

    // The sweep reclaims all three index entries, then has nothing to do.
    assert_eq!(store.remove_expired().unwrap(), 3);
    assert_eq!(store.remove_expired().unwrap(), 0);
}

#[test]
fn live_entries_survive_the_sweep() {
    let (store, _dir) = open_store(14);

    let object = common::pod("default", "p1");
    let event = event_at(&object, EventType::Added, base_time());
    store.store_event(&event, &object).unwrap();

    assert_eq!(store.remove_expired().unwrap(), 0);
    assert_eq!(store.query_events(&QueryOptions::default()).unwrap().len(), 1);
}

// ── Key schema ──────────────────────────────────────────────────

#[test]
fn time_keys_parse_back_into_their_segments() {
    let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let key = keys::time_key(ts, "default", "pods", "p1", "uid-1");
    assert_eq!(key, "events/2023-11-14T22:13:20Z/default/pods/p1/uid-1");

    let parts = keys::parse_time_key(&key).unwrap();
    assert_eq!(parts.timestamp, ts);
    assert_eq!(parts.namespace, "default");
    assert_eq!(parts.resource_type, "pods");
    assert_eq!(parts.resource_name, "p1");
    assert_eq!(parts.uid, "uid-1");

    // Cluster-scoped: empty namespace segment survives the round trip.
    let key = keys::time_key(ts, "", "nodes", "n1", "uid-2");
    let parts = keys::parse_time_key(&key).unwrap();
    assert_eq!(parts.namespace, "");
    assert_eq!(parts.resource_type, "nodes");

    assert!(keys::parse_time_key("events/not-a-timestamp/a/b/c").is_none());
    assert!(keys::parse_time_key("objects/default/pods/p1").is_none());
}

#[test]
fn key_order_matches_chronological_order() {
    let earlier = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let later = DateTime::from_timestamp(1_700_003_600, 0).unwrap();
    let a = keys::time_key(earlier, "default", "pods", "p1", "u");
    let b = keys::time_key(later, "default", "pods", "p1", "u");
    assert!(a < b);
}
