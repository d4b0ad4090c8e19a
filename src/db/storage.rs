//! Legacy single-version notification store.
//!
//! One row per `(uaid, chid)` holding the latest version number. Versions
//! only move forward: a save carrying an older or equal version is a no-op.

use super::throttle::ThrottleTracker;
use crate::error::Result;
use crate::kv::{Condition, Item, Key, KeyPart, KeyValueStore, Query, RangeCondition};
use crate::types::{LegacyNotification, CHANNEL_REGISTRY_KEY};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LegacyNotificationStore {
    kv: Arc<dyn KeyValueStore>,
    table: String,
    throttle: ThrottleTracker,
}

impl LegacyNotificationStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, table: impl Into<String>, throttle: ThrottleTracker) -> Self {
        Self {
            kv,
            table: table.into(),
            throttle,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn key(uaid: &str, chid: &str) -> Key {
        Key::hash(LegacyNotification::UAID, uaid).with_range(LegacyNotification::CHID, chid)
    }

    /// All pending notifications of a user, in channel order.
    pub async fn fetch(&self, uaid: &str) -> Result<Vec<LegacyNotification>> {
        let query = Query::new(
            KeyPart::new(LegacyNotification::UAID, uaid),
            LegacyNotification::CHID,
            RangeCondition::Gt(CHANNEL_REGISTRY_KEY.to_string()),
        )
        .consistent();

        let items = self
            .throttle
            .track("fetch_notifications", self.kv.query(&self.table, &query))
            .await?;
        items.iter().map(LegacyNotification::from_item).collect()
    }

    /// Record `version` for a channel unless a newer or equal one is stored.
    ///
    /// Returns whether the row was written.
    pub async fn save(&self, uaid: &str, chid: &str, version: u64) -> Result<bool> {
        let condition = Condition::not_exists(LegacyNotification::VERSION)
            .or(Condition::less_than(LegacyNotification::VERSION, version));
        let item = Item::new().with(LegacyNotification::VERSION, version);

        let result = self
            .throttle
            .track(
                "save_notification",
                self.kv
                    .put_item(&self.table, &Self::key(uaid, chid), item, Some(&condition)),
            )
            .await;

        match result {
            Ok(()) => Ok(true),
            Err(e) if e.is_condition_failed() => {
                debug!(uaid, chid, version, "stale notification version ignored");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a channel's notification, only at `expected` when given.
    ///
    /// A throttled delete is counted and reported as `false` instead of an
    /// error; the notification is redelivered and deleted later.
    pub async fn delete(&self, uaid: &str, chid: &str, expected: Option<u64>) -> Result<bool> {
        let condition = expected.map(|v| Condition::equals(LegacyNotification::VERSION, v));

        let result = self
            .kv
            .delete_item(&self.table, &Self::key(uaid, chid), condition.as_ref())
            .await;

        match result {
            Ok(()) => Ok(true),
            Err(e) if e.is_condition_failed() => Ok(false),
            Err(e) if e.is_throttled() => {
                self.throttle.record("delete_notification");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
