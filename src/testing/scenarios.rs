//! End-to-end scenarios against the in-process store.

use crate::config::StoreConfig;
use crate::db::PushDatabase;
use crate::kv::{Key, MemoryStore};
use crate::metrics::StoreMetrics;
use crate::partitioning::partition_name_for;
use crate::testing::FaultAction;
use crate::types::{ChannelSet, MessageWrite, RegisterOutcome, UserRecord};
use chrono::NaiveDate;
use std::sync::Arc;

struct Harness {
    db: PushDatabase,
    kv: Arc<MemoryStore>,
    metrics: Arc<StoreMetrics>,
}

fn harness() -> Harness {
    let kv = Arc::new(MemoryStore::new());
    let metrics = Arc::new(StoreMetrics::new());
    let today = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
    let db = PushDatabase::for_date(StoreConfig::default(), kv.clone(), metrics.clone(), today)
        .unwrap();
    Harness { db, kv, metrics }
}

fn claim(node_id: &str, connected_at: u64) -> UserRecord {
    UserRecord::new("u1").with_node(node_id, connected_at)
}

#[tokio::test]
async fn test_node_claims_ordered_by_connected_at() {
    let h = harness();
    let router = h.db.router();

    assert!(router.register_user(&claim("n1", 0)).await.unwrap().is_registered());
    assert_eq!(
        router.register_user(&claim("n2", 0)).await.unwrap(),
        RegisterOutcome::Rejected
    );
    assert!(router.register_user(&claim("n2", 5)).await.unwrap().is_registered());

    let user = router.get_user("u1").await.unwrap();
    assert_eq!(user.node_id.as_deref(), Some("n2"));
    assert_eq!(user.connected_at, Some(5));
}

#[tokio::test]
async fn test_stale_claims_never_mutate_the_record() {
    let h = harness();
    let router = h.db.router();
    router
        .register_user(&claim("owner", 100).with_router_type("webpush"))
        .await
        .unwrap();
    let before = router.get_user("u1").await.unwrap();

    for connected_at in [0, 1, 50, 99, 100] {
        let outcome = router
            .register_user(&claim("intruder", connected_at).with_router_type("webpush"))
            .await
            .unwrap();
        assert!(!outcome.is_registered());
    }
    assert_eq!(router.get_user("u1").await.unwrap(), before);

    for connected_at in [101, 200, 201] {
        assert!(router
            .register_user(&claim("owner", connected_at))
            .await
            .unwrap()
            .is_registered());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_newest_wins() {
    let h = harness();

    let mut handles = Vec::new();
    for connected_at in 1..=32u64 {
        let db = h.db.clone();
        handles.push(tokio::spawn(async move {
            db.router()
                .register_user(&claim(&format!("n{}", connected_at), connected_at))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let user = h.db.router().get_user("u1").await.unwrap();
    assert_eq!(user.connected_at, Some(32));
    assert_eq!(user.node_id.as_deref(), Some("n32"));
}

#[tokio::test]
async fn test_release_after_takeover_keeps_new_owner() {
    let h = harness();
    let router = h.db.router();
    router.register_user(&claim("n1", 10)).await.unwrap();
    let snapshot = router.get_user("u1").await.unwrap();

    router.register_user(&claim("n2", 11)).await.unwrap();
    assert!(!router.release_node(&snapshot).await.unwrap());
    assert_eq!(
        router.get_user("u1").await.unwrap().node_id.as_deref(),
        Some("n2")
    );

    let current = router.get_user("u1").await.unwrap();
    assert!(router.release_node(&current).await.unwrap());
    assert_eq!(router.get_user("u1").await.unwrap().node_id, None);

    assert!(router.register_user(&claim("n3", 1)).await.unwrap().is_registered());
}

#[tokio::test]
async fn test_legacy_notification_lifecycle() {
    let h = harness();
    let storage = h.db.storage();

    assert!(storage.save("u1", "c1", 1).await.unwrap());
    let notifs = storage.fetch("u1").await.unwrap();
    assert_eq!(notifs.len(), 1);
    assert_eq!(notifs[0].version, 1);

    assert!(storage.delete("u1", "c1", Some(1)).await.unwrap());
    assert!(storage.fetch("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_legacy_versions_are_monotonic() {
    let h = harness();
    let storage = h.db.storage();

    for version in [1, 3, 3, 7, 7, 12] {
        storage.save("u1", "c1", version).await.unwrap();
    }
    assert!(!storage.save("u1", "c1", 4).await.unwrap());
    assert_eq!(storage.fetch("u1").await.unwrap()[0].version, 12);
}

#[tokio::test]
async fn test_message_update_lifecycle() {
    let h = harness();
    let message = h.db.message();
    let write = MessageWrite::new("c1", "m1", 60);

    assert!(!message.update_message("u1", &write).await.unwrap());
    assert!(message.fetch_messages("u1", 10).await.unwrap().is_empty());

    let first = message.store_message("u1", &write).await.unwrap();
    let update = MessageWrite::new("c1", "m1", 90)
        .with_data("body", Default::default())
        .with_timestamp(42);
    assert!(message.update_message("u1", &update).await.unwrap());

    let fetched = message.fetch_messages("u1", 10).await.unwrap();
    let stored = &fetched[0];
    assert_ne!(stored.updateid, first);
    assert_eq!(stored.ttl, 90);
    assert_eq!(stored.timestamp, 42);
    assert_eq!(stored.data.as_deref(), Some("body"));

    assert!(!message
        .delete_message("u1", "c1", "m1", Some(&first))
        .await
        .unwrap());
    let latest = stored.updateid.clone();
    assert!(message
        .delete_message("u1", "c1", "m1", Some(&latest))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_channel_registry_and_cleanup() {
    let h = harness();
    let message = h.db.message();

    message.register_channel("u1", "c1").await.unwrap();
    message.register_channel("u1", "c1").await.unwrap();
    message.register_channel("u1", "c2").await.unwrap();
    let (_, chids) = message.all_channels("u1").await.unwrap();
    assert_eq!(chids.iter().filter(|c| *c == "c1").count(), 1);

    for (chid, mid) in [("c1", "a"), ("c1", "b"), ("c2", "a")] {
        message
            .store_message("u1", &MessageWrite::new(chid, mid, 60))
            .await
            .unwrap();
    }

    assert!(message.delete_messages_for_channel("u1", "c1").await.unwrap());
    let left = message.fetch_messages("u1", 10).await.unwrap();
    assert!(left.iter().all(|m| !m.ordering_key().starts_with("c1:")));
    assert_eq!(left.len(), 1);

    message.delete_user("u1").await.unwrap();
    assert_eq!(
        message.all_channels("u1").await.unwrap(),
        (false, ChannelSet::new())
    );
}

#[test]
fn test_partition_names_follow_calendar_month() {
    for day in 1..=31 {
        let today = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        assert_eq!(partition_name_for("message", today, 0).unwrap(), "message_2024_1");
        assert_eq!(partition_name_for("message", today, -1).unwrap(), "message_2023_12");
        assert_eq!(partition_name_for("message", today, 1).unwrap(), "message_2024_2");
    }
}

#[tokio::test]
async fn test_corrupt_router_row_reads_as_missing() {
    let h = harness();
    h.db.router().register_user(&claim("n1", 1)).await.unwrap();
    assert!(h.kv.corrupt_row("router", &Key::hash("uaid", "u1")));

    assert!(h.db.router().get_user("u1").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_throttles_counted_per_operation() {
    let h = harness();
    h.kv.faults().enable("get_item", FaultAction::Throttle);
    h.kv.faults().enable("put_item", FaultAction::Throttle);

    assert!(h.db.router().get_user("u1").await.unwrap_err().is_throttled());
    assert!(h.db.router().get_user("u1").await.unwrap_err().is_throttled());
    assert!(h.db.message().all_channels("u1").await.unwrap_err().is_throttled());
    assert!(h
        .db
        .message()
        .store_message("u1", &MessageWrite::new("c1", "m1", 60))
        .await
        .unwrap_err()
        .is_throttled());

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.get("error.provisioned.get_user"), 2);
    assert_eq!(snapshot.get("error.provisioned.all_channels"), 1);
    assert_eq!(snapshot.get("error.provisioned.store_message"), 1);
    assert_eq!(snapshot.total, 4);

    let text = h.metrics.to_prometheus();
    assert!(text.contains("error_provisioned_get_user 2"));
}

#[tokio::test]
async fn test_throttle_clears_without_retry() {
    let h = harness();
    h.kv.faults().enable_once("update_item", FaultAction::Throttle);

    let message = h.db.message();
    assert!(message.register_channel("u1", "c1").await.is_err());
    message.register_channel("u1", "c1").await.unwrap();

    assert_eq!(h.kv.faults().hits("update_item"), 2);
    assert_eq!(h.metrics.get("error.provisioned.register_channel"), 1);
}
