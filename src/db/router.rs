//! Per-user node ownership.
//!
//! A user's live connection is owned by exactly one node at a time. Claims
//! are ordered by `connected_at`: a node may take over a user only with a
//! strictly newer connection time, and may only let go of a user it still
//! owns. Both rules are enforced by the store's conditional writes, so two
//! nodes racing for the same user cannot both win.

use super::throttle::ThrottleTracker;
use crate::error::{Error, Result, StoreError};
use crate::kv::{Condition, Key, KeyValueStore, ReturnValues, Update};
use crate::types::{RegisterOutcome, UserRecord};
use std::sync::Arc;
use tracing::debug;

/// Router table access.
#[derive(Debug, Clone)]
pub struct RouterStore {
    kv: Arc<dyn KeyValueStore>,
    table: String,
    throttle: ThrottleTracker,
}

impl RouterStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, table: impl Into<String>, throttle: ThrottleTracker) -> Self {
        Self {
            kv,
            table: table.into(),
            throttle,
        }
    }

    /// Name of the backing table.
    pub fn table(&self) -> &str {
        &self.table
    }

    fn key(uaid: &str) -> Key {
        Key::hash(UserRecord::UAID, uaid)
    }

    /// Read a user's record with strong consistency.
    ///
    /// Fails with `NotFound` when there is no record. Some backends answer a
    /// read on an empty table with a malformed response instead; that is
    /// reported as `NotFound` too.
    pub async fn get_user(&self, uaid: &str) -> Result<UserRecord> {
        let result = self
            .throttle
            .track("get_user", self.kv.get_item(&self.table, &Self::key(uaid), true))
            .await;

        match result {
            Ok(item) => UserRecord::from_item(&item),
            Err(e) if e.is_transport_anomaly() => {
                debug!(uaid, error = %e, "malformed router read treated as missing user");
                Err(StoreError::NotFound.into())
            }
            Err(e) => Err(e),
        }
    }

    /// Claim a user for `record.node_id` as of `record.connected_at`.
    ///
    /// Writes every field set on `record`. The write only happens when the
    /// stored router type is absent or equal to the new one, and no node
    /// holds the user or the stored `connected_at` is strictly older.
    /// Losing that race is reported as [`RegisterOutcome::Rejected`].
    pub async fn register_user(&self, record: &UserRecord) -> Result<RegisterOutcome> {
        let connected_at = record.connected_at.ok_or_else(|| {
            Error::InvalidRecord("register_user requires connected_at".to_string())
        })?;

        let update = record
            .attributes()
            .into_iter()
            .fold(Update::new(), |update, (name, value)| update.set(name, value));

        let node_guard = Condition::not_exists(UserRecord::NODE_ID)
            .or(Condition::less_than(UserRecord::CONNECTED_AT, connected_at));
        let condition = match &record.router_type {
            Some(router_type) => Condition::not_exists(UserRecord::ROUTER_TYPE)
                .or(Condition::equals(UserRecord::ROUTER_TYPE, router_type.clone()))
                .and(node_guard),
            None => node_guard,
        };

        let result = self
            .throttle
            .track(
                "register_user",
                self.kv.update_item(
                    &self.table,
                    &Self::key(&record.uaid),
                    &update,
                    Some(&condition),
                    ReturnValues::AllOld,
                ),
            )
            .await;

        match result {
            Ok(previous) => Ok(RegisterOutcome::Registered(previous.unwrap_or_default())),
            Err(e) if e.is_condition_failed() => {
                debug!(uaid = %record.uaid, connected_at, "node claim rejected");
                Ok(RegisterOutcome::Rejected)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a user's record. Returns whether a record was deleted.
    pub async fn unregister_user(&self, uaid: &str) -> Result<bool> {
        let condition = Condition::equals(UserRecord::UAID, uaid);
        let result = self
            .throttle
            .track(
                "unregister_user",
                self.kv.delete_item(&self.table, &Self::key(uaid), Some(&condition)),
            )
            .await;

        match result {
            Ok(()) => Ok(true),
            Err(e) if e.is_condition_failed() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Record which message partition is current for a user.
    pub async fn set_active_partition(&self, uaid: &str, partition: &str) -> Result<()> {
        let update = Update::new().set(UserRecord::CURRENT_MONTH, partition);
        self.throttle
            .track(
                "set_active_partition",
                self.kv.update_item(
                    &self.table,
                    &Self::key(uaid),
                    &update,
                    None,
                    ReturnValues::None,
                ),
            )
            .await?;
        Ok(())
    }

    /// Clear `node_id` if the stored claim is still the one in `snapshot`.
    ///
    /// Returns `false` when another node has claimed the user since the
    /// snapshot was read; that claim is left untouched.
    pub async fn release_node(&self, snapshot: &UserRecord) -> Result<bool> {
        let node_id = snapshot
            .node_id
            .as_ref()
            .ok_or_else(|| Error::InvalidRecord("release_node requires node_id".to_string()))?;
        let connected_at = snapshot.connected_at.ok_or_else(|| {
            Error::InvalidRecord("release_node requires connected_at".to_string())
        })?;

        let condition = Condition::equals(UserRecord::NODE_ID, node_id.clone())
            .and(Condition::equals(UserRecord::CONNECTED_AT, connected_at));
        let update = Update::new().remove(UserRecord::NODE_ID);

        let result = self
            .throttle
            .track(
                "release_node",
                self.kv.update_item(
                    &self.table,
                    &Self::key(&snapshot.uaid),
                    &update,
                    Some(&condition),
                    ReturnValues::None,
                ),
            )
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if e.is_condition_failed() => {
                debug!(uaid = %snapshot.uaid, node_id = %node_id, "node already reclaimed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::metrics::StoreMetrics;
    use crate::testing::FaultAction;

    fn router() -> (RouterStore, Arc<MemoryStore>, Arc<StoreMetrics>) {
        let kv = Arc::new(MemoryStore::new());
        let metrics = Arc::new(StoreMetrics::new());
        let store = RouterStore::new(kv.clone(), "router", ThrottleTracker::new(metrics.clone()));
        (store, kv, metrics)
    }

    #[tokio::test]
    async fn test_no_user_found() {
        let (router, _, _) = router();
        let err = router.get_user("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_malformed_read_is_not_found() {
        let (router, kv, _) = router();
        kv.faults().enable_once("get_item", FaultAction::Malformed);

        let err = router.get_user("u1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let (router, _, _) = router();
        let outcome = router
            .register_user(&UserRecord::new("u1").with_node("me", 1234))
            .await
            .unwrap();
        assert!(outcome.is_registered());
        assert!(outcome.previous().unwrap().is_empty());

        let user = router.get_user("u1").await.unwrap();
        assert_eq!(user.node_id.as_deref(), Some("me"));
        assert_eq!(user.connected_at, Some(1234));
    }

    #[tokio::test]
    async fn test_register_returns_previous_attributes() {
        let (router, _, _) = router();
        router
            .register_user(&UserRecord::new("u1").with_node("n1", 1))
            .await
            .unwrap();

        let outcome = router
            .register_user(&UserRecord::new("u1").with_node("n2", 2))
            .await
            .unwrap();
        let previous = outcome.previous().unwrap();
        assert_eq!(previous.get_str("node_id"), Some("n1"));
        assert_eq!(previous.get_u64("connected_at"), Some(1));
    }

    #[tokio::test]
    async fn test_register_rejects_stale_claim() {
        let (router, _, _) = router();
        router
            .register_user(&UserRecord::new("u1").with_node("n1", 10))
            .await
            .unwrap();

        for connected_at in [5, 10] {
            let outcome = router
                .register_user(&UserRecord::new("u1").with_node("n2", connected_at))
                .await
                .unwrap();
            assert_eq!(outcome, RegisterOutcome::Rejected);
        }

        let user = router.get_user("u1").await.unwrap();
        assert_eq!(user.node_id.as_deref(), Some("n1"));
        assert_eq!(user.connected_at, Some(10));
    }

    #[tokio::test]
    async fn test_register_rejects_router_type_change() {
        let (router, _, _) = router();
        router
            .register_user(&UserRecord::new("u1").with_node("n1", 1).with_router_type("webpush"))
            .await
            .unwrap();

        let outcome = router
            .register_user(
                &UserRecord::new("u1")
                    .with_node("n1", 2)
                    .with_router_type("simplepush"),
            )
            .await
            .unwrap();
        assert!(!outcome.is_registered());

        let outcome = router
            .register_user(&UserRecord::new("u1").with_node("n1", 2).with_router_type("webpush"))
            .await
            .unwrap();
        assert!(outcome.is_registered());
    }

    #[tokio::test]
    async fn test_register_requires_connected_at() {
        let (router, _, _) = router();
        let err = router.register_user(&UserRecord::new("u1")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn test_register_throttled() {
        let (router, kv, metrics) = router();
        kv.faults().enable("update_item", FaultAction::Throttle);

        let err = router
            .register_user(&UserRecord::new("u1").with_node("me", 1234))
            .await
            .unwrap_err();
        assert!(err.is_throttled());
        assert_eq!(metrics.get("error.provisioned.register_user"), 1);
    }

    #[tokio::test]
    async fn test_get_user_throttled() {
        let (router, kv, metrics) = router();
        kv.faults().enable("get_item", FaultAction::Throttle);

        assert!(router.get_user("u1").await.unwrap_err().is_throttled());
        assert_eq!(metrics.get("error.provisioned.get_user"), 1);
    }

    #[tokio::test]
    async fn test_release_node() {
        let (router, _, _) = router();
        router
            .register_user(&UserRecord::new("u1").with_node("n1", 1234).with_router_type("webpush"))
            .await
            .unwrap();

        let user = router.get_user("u1").await.unwrap();
        assert!(router.release_node(&user).await.unwrap());

        let user = router.get_user("u1").await.unwrap();
        assert_eq!(user.node_id, None);
        assert_eq!(user.connected_at, Some(1234));
        assert_eq!(user.router_type.as_deref(), Some("webpush"));
    }

    #[tokio::test]
    async fn test_release_node_after_takeover_fails() {
        let (router, _, _) = router();
        router
            .register_user(&UserRecord::new("u1").with_node("n1", 1))
            .await
            .unwrap();
        let snapshot = router.get_user("u1").await.unwrap();

        router
            .register_user(&UserRecord::new("u1").with_node("n2", 2))
            .await
            .unwrap();

        assert!(!router.release_node(&snapshot).await.unwrap());
        let user = router.get_user("u1").await.unwrap();
        assert_eq!(user.node_id.as_deref(), Some("n2"));
    }

    #[tokio::test]
    async fn test_release_node_for_missing_user() {
        let (router, _, _) = router();
        let snapshot = UserRecord::new("ghost").with_node("n1", 1);
        assert!(!router.release_node(&snapshot).await.unwrap());
        assert!(router.get_user("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_release_node_throttled() {
        let (router, kv, metrics) = router();
        kv.faults().enable("update_item", FaultAction::Throttle);

        let snapshot = UserRecord::new("u1").with_node("n1", 1234);
        assert!(router.release_node(&snapshot).await.unwrap_err().is_throttled());
        assert_eq!(metrics.get("error.provisioned.release_node"), 1);
    }

    #[tokio::test]
    async fn test_unregister_user() {
        let (router, _, _) = router();
        router
            .register_user(&UserRecord::new("u1").with_node("n1", 1))
            .await
            .unwrap();

        assert!(router.unregister_user("u1").await.unwrap());
        assert!(!router.unregister_user("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_active_partition() {
        let (router, _, _) = router();
        router
            .register_user(&UserRecord::new("u1").with_node("n1", 1))
            .await
            .unwrap();
        router.set_active_partition("u1", "message_2024_3").await.unwrap();

        let user = router.get_user("u1").await.unwrap();
        assert_eq!(user.current_month.as_deref(), Some("message_2024_3"));
        assert_eq!(user.node_id.as_deref(), Some("n1"));
    }
}
