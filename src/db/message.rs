//! Per-partition message store and channel registry.
//!
//! Each user owns a contiguous range of rows in a message partition:
//!
//! ```text
//! uaid  chidmessageid      attributes
//! u1    " "                chids = {c1, c2}        <- channel registry
//! u1    "c1:m1"            ttl, timestamp, updateid, data?, headers?
//! u1    "c1:m2"            ...
//! u1    "c2:m9"            ...
//! ```
//!
//! The registry row sorts first, so a scan strictly after it yields only
//! messages and a scan from it covers everything the user has stored.

use super::throttle::ThrottleTracker;
use crate::config::DEFAULT_BATCH_WRITE_LIMIT;
use crate::error::Result;
use crate::kv::{
    AttributeValue, Condition, Item, Key, KeyPart, KeyValueStore, Query, RangeCondition,
    ReturnValues, Update,
};
use crate::types::{
    new_update_id, now_secs, ordering_key, ChannelSet, Message, MessageWrite, CHANNEL_REGISTRY_KEY,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Attribute of the registry row holding the channel set.
const CHIDS: &str = "chids";

/// Access to one message partition.
#[derive(Debug, Clone)]
pub struct MessageStore {
    kv: Arc<dyn KeyValueStore>,
    table: String,
    throttle: ThrottleTracker,
    batch_write_limit: usize,
}

impl MessageStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, table: impl Into<String>, throttle: ThrottleTracker) -> Self {
        Self {
            kv,
            table: table.into(),
            throttle,
            batch_write_limit: DEFAULT_BATCH_WRITE_LIMIT,
        }
    }

    /// Cap the number of keys sent per bulk delete.
    pub fn with_batch_write_limit(mut self, limit: usize) -> Self {
        self.batch_write_limit = limit.max(1);
        self
    }

    /// Partition this store reads and writes.
    pub fn table(&self) -> &str {
        &self.table
    }

    fn key(uaid: &str, range: &str) -> Key {
        Key::hash(Message::UAID, uaid).with_range(Message::ORDERING_KEY, range)
    }

    fn scan(uaid: &str, range: RangeCondition) -> Query {
        Query::new(KeyPart::new(Message::UAID, uaid), Message::ORDERING_KEY, range)
    }

    /// Add a channel to the user's registry. Idempotent.
    pub async fn register_channel(&self, uaid: &str, chid: &str) -> Result<()> {
        let update = Update::new().add_to_set(CHIDS, [chid]);
        self.throttle
            .track(
                "register_channel",
                self.kv.update_item(
                    &self.table,
                    &Self::key(uaid, CHANNEL_REGISTRY_KEY),
                    &update,
                    None,
                    ReturnValues::None,
                ),
            )
            .await?;
        Ok(())
    }

    /// Remove a channel from the user's registry.
    ///
    /// Returns whether the channel was registered before the call. Old
    /// attributes that cannot be decoded count as "not registered".
    pub async fn unregister_channel(&self, uaid: &str, chid: &str) -> Result<bool> {
        let update = Update::new().delete_from_set(CHIDS, [chid]);
        let old = self
            .throttle
            .track(
                "unregister_channel",
                self.kv.update_item(
                    &self.table,
                    &Self::key(uaid, CHANNEL_REGISTRY_KEY),
                    &update,
                    None,
                    ReturnValues::UpdatedOld,
                ),
            )
            .await?;

        Ok(match old.as_ref().and_then(|item| item.get(CHIDS)) {
            None => false,
            Some(AttributeValue::SS(chids)) => chids.contains(chid),
            Some(other) => {
                warn!(uaid, chid, value = ?other, "undecodable channel set in old attributes");
                false
            }
        })
    }

    /// The user's registered channels.
    ///
    /// The flag is `false` when the user has no registry row at all, which
    /// is how callers tell "no channels" from "not in this partition".
    pub async fn all_channels(&self, uaid: &str) -> Result<(bool, ChannelSet)> {
        let result = self
            .throttle
            .track(
                "all_channels",
                self.kv
                    .get_item(&self.table, &Self::key(uaid, CHANNEL_REGISTRY_KEY), true),
            )
            .await;

        match result {
            Ok(item) => Ok((true, item.get_string_set(CHIDS).cloned().unwrap_or_default())),
            Err(e) if e.is_not_found() => Ok((false, ChannelSet::new())),
            Err(e) => Err(e),
        }
    }

    /// Replace the user's registry with `channels`.
    pub async fn save_channels(&self, uaid: &str, channels: &ChannelSet) -> Result<()> {
        let mut item = Item::new();
        if !channels.is_empty() {
            item.insert(CHIDS, channels.clone());
        }
        self.throttle
            .track(
                "save_channels",
                self.kv
                    .put_item(&self.table, &Self::key(uaid, CHANNEL_REGISTRY_KEY), item, None),
            )
            .await
    }

    /// Store a new message, replacing any with the same id.
    ///
    /// Returns the update id assigned to the stored version.
    pub async fn store_message(&self, uaid: &str, write: &MessageWrite) -> Result<String> {
        let updateid = new_update_id();
        let mut item = Item::new()
            .with(Message::TTL, write.ttl)
            .with(Message::TIMESTAMP, write.timestamp.unwrap_or_else(now_secs))
            .with(Message::UPDATE_ID, updateid.clone());
        if let Some(data) = &write.data {
            item.insert(Message::DATA, data.clone());
        }
        if let Some(headers) = &write.headers {
            item.insert(Message::HEADERS, headers.clone());
        }

        self.throttle
            .track(
                "store_message",
                self.kv
                    .put_item(&self.table, &Self::key(uaid, &write.ordering_key()), item, None),
            )
            .await?;
        Ok(updateid)
    }

    /// Overwrite an existing message in place.
    ///
    /// The update id is regenerated. A write without data clears any stored
    /// payload. Returns `false` when the message does not exist.
    pub async fn update_message(&self, uaid: &str, write: &MessageWrite) -> Result<bool> {
        let mut update = Update::new()
            .set(Message::TTL, write.ttl)
            .set(Message::TIMESTAMP, write.timestamp.unwrap_or_else(now_secs))
            .set(Message::UPDATE_ID, new_update_id());
        update = match (&write.data, &write.headers) {
            (Some(data), Some(headers)) => update
                .set(Message::DATA, data.clone())
                .set(Message::HEADERS, headers.clone()),
            (Some(data), None) => update.set(Message::DATA, data.clone()).remove(Message::HEADERS),
            (None, _) => update.remove(Message::DATA).remove(Message::HEADERS),
        };
        let condition = Condition::exists(Message::UPDATE_ID);

        let result = self
            .throttle
            .track(
                "update_message",
                self.kv.update_item(
                    &self.table,
                    &Self::key(uaid, &write.ordering_key()),
                    &update,
                    Some(&condition),
                    ReturnValues::None,
                ),
            )
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if e.is_condition_failed() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete one message, only at `expected_updateid` when given.
    pub async fn delete_message(
        &self,
        uaid: &str,
        chid: &str,
        message_id: &str,
        expected_updateid: Option<&str>,
    ) -> Result<bool> {
        let condition = expected_updateid.map(|id| Condition::equals(Message::UPDATE_ID, id));
        let result = self
            .throttle
            .track(
                "delete_message",
                self.kv.delete_item(
                    &self.table,
                    &Self::key(uaid, &ordering_key(chid, message_id)),
                    condition.as_ref(),
                ),
            )
            .await;

        match result {
            Ok(()) => Ok(true),
            Err(e) if e.is_condition_failed() => {
                debug!(uaid, chid, message_id, "message changed before delete");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Bulk-delete messages by ordering key.
    ///
    /// Absent and empty keys are skipped. Returns the number of keys sent.
    pub async fn delete_messages<I, K>(&self, uaid: &str, keys: I) -> Result<usize>
    where
        I: IntoIterator<Item = K>,
        K: Into<Option<String>>,
    {
        let keys: Vec<String> = keys
            .into_iter()
            .filter_map(Into::into)
            .filter(|k| !k.is_empty())
            .collect();
        self.throttle
            .track("delete_messages", self.delete_keys(uaid, keys))
            .await
    }

    /// Delete every stored message of one channel.
    ///
    /// Returns whether any message was found.
    pub async fn delete_messages_for_channel(&self, uaid: &str, chid: &str) -> Result<bool> {
        let prefix = format!("{}:", chid);
        let query = Self::scan(uaid, RangeCondition::BeginsWith(prefix))
            .consistent()
            .project([Message::ORDERING_KEY]);

        let deleted = self
            .throttle
            .track("delete_messages_for_channel", self.delete_scanned(uaid, &query))
            .await?;
        Ok(deleted > 0)
    }

    /// Delete the user's registry row and every message in this partition.
    ///
    /// Returns whether anything was stored.
    pub async fn delete_user(&self, uaid: &str) -> Result<bool> {
        let query = Self::scan(uaid, RangeCondition::Gte(CHANNEL_REGISTRY_KEY.to_string()))
            .consistent()
            .project([Message::ORDERING_KEY]);

        let deleted = self
            .throttle
            .track("delete_user", self.delete_scanned(uaid, &query))
            .await?;
        debug!(uaid, table = %self.table, deleted, "deleted user rows");
        Ok(deleted > 0)
    }

    /// Up to `limit` stored messages, in `(chid, message_id)` order.
    pub async fn fetch_messages(&self, uaid: &str, limit: usize) -> Result<Vec<Message>> {
        let query = Self::scan(uaid, RangeCondition::Gt(CHANNEL_REGISTRY_KEY.to_string()))
            .consistent()
            .limit(limit);

        let items = self
            .throttle
            .track("fetch_messages", self.kv.query(&self.table, &query))
            .await?;
        items.iter().map(Message::from_item).collect()
    }

    /// Delete every row `query` returns.
    async fn delete_scanned(&self, uaid: &str, query: &Query) -> Result<usize> {
        let items = self.kv.query(&self.table, query).await?;
        let keys = items
            .iter()
            .filter_map(|item| item.get_str(Message::ORDERING_KEY))
            .map(str::to_string)
            .collect();
        self.delete_keys(uaid, keys).await
    }

    async fn delete_keys(&self, uaid: &str, keys: Vec<String>) -> Result<usize> {
        let keys: Vec<Key> = keys.iter().map(|k| Self::key(uaid, k)).collect();
        for batch in keys.chunks(self.batch_write_limit) {
            self.kv.batch_delete(&self.table, batch).await?;
        }
        Ok(keys.len())
    }
}
