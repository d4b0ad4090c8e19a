//! Storage facade for the push service.
//!
//! [`PushDatabase`] wires the three stores to one [`KeyValueStore`] and one
//! [`MetricsSink`]:
//!
//! - [`RouterStore`]: which node holds each user's connection
//! - [`LegacyNotificationStore`]: latest version per channel, older protocol
//! - [`MessageStore`]: channel registry and pending messages, one per
//!   monthly partition
//!
//! Partition names are resolved once, when the database is built, and stay
//! fixed for its lifetime. A process rolling into a new month builds a new
//! `PushDatabase`.
//!
//! # Example
//!
//! ```rust,no_run
//! use pushstore::{MemoryStore, PushDatabase, StoreConfig, StoreMetrics};
//! use std::sync::Arc;
//!
//! # async fn example() -> pushstore::Result<()> {
//! let db = PushDatabase::new(
//!     StoreConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(StoreMetrics::new()),
//! )?;
//! db.preflight_check().await?;
//! db.message().register_channel("uaid", "chid").await?;
//! # Ok(())
//! # }
//! ```

mod message;
mod preflight;
mod router;
mod storage;
mod throttle;

pub use message::MessageStore;
pub use router::RouterStore;
pub use storage::LegacyNotificationStore;
pub use throttle::{ThrottleTracker, THROTTLE_COUNTER_PREFIX};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::kv::KeyValueStore;
use crate::metrics::MetricsSink;
use crate::partitioning::{self, MessagePartitions};
use crate::types::Message;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info};

/// Entry point to the push storage layer.
#[derive(Debug, Clone)]
pub struct PushDatabase {
    config: StoreConfig,
    partitions: MessagePartitions,
    kv: Arc<dyn KeyValueStore>,
    throttle: ThrottleTracker,
    router: RouterStore,
    storage: LegacyNotificationStore,
    message: MessageStore,
}

impl PushDatabase {
    /// Build the database with partitions resolved for today (UTC).
    pub fn new(
        config: StoreConfig,
        kv: Arc<dyn KeyValueStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        Self::for_date(config, kv, metrics, partitioning::today())
    }

    /// Build the database with partitions resolved around `today`.
    pub fn for_date(
        config: StoreConfig,
        kv: Arc<dyn KeyValueStore>,
        metrics: Arc<dyn MetricsSink>,
        today: NaiveDate,
    ) -> Result<Self> {
        config.validate()?;
        let partitions = config.resolve_partitions(today)?;
        let throttle = ThrottleTracker::new(metrics);

        let router = RouterStore::new(kv.clone(), config.router_table.clone(), throttle.clone());
        let storage =
            LegacyNotificationStore::new(kv.clone(), config.storage_table.clone(), throttle.clone());
        let message = MessageStore::new(kv.clone(), partitions.current.clone(), throttle.clone())
            .with_batch_write_limit(config.batch_write_limit);

        info!(
            router = %config.router_table,
            storage = %config.storage_table,
            message = %partitions.current,
            rotating = partitions.is_rotating(),
            "push database ready"
        );

        Ok(Self {
            config,
            partitions,
            kv,
            throttle,
            router,
            storage,
            message,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Partition names resolved at construction.
    pub fn partitions(&self) -> &MessagePartitions {
        &self.partitions
    }

    pub fn router(&self) -> &RouterStore {
        &self.router
    }

    pub fn storage(&self) -> &LegacyNotificationStore {
        &self.storage
    }

    /// Message store for the current partition.
    pub fn message(&self) -> &MessageStore {
        &self.message
    }

    /// Message store for one of the resolved partitions.
    pub fn message_store(&self, partition: &str) -> Result<MessageStore> {
        if !self.partitions.contains(partition) {
            return Err(Error::Config(format!("unknown message partition {}", partition)));
        }
        Ok(self.partition_store(partition))
    }

    fn partition_store(&self, partition: &str) -> MessageStore {
        MessageStore::new(self.kv.clone(), partition, self.throttle.clone())
            .with_batch_write_limit(self.config.batch_write_limit)
    }

    /// Pending messages in the current partition, up to the configured
    /// fetch limit.
    pub async fn fetch_messages(&self, uaid: &str) -> Result<Vec<Message>> {
        self.message.fetch_messages(uaid, self.config.fetch_limit).await
    }

    /// Write, read and delete a throwaway record in every table.
    pub async fn preflight_check(&self) -> Result<()> {
        preflight::run(self).await
    }

    /// Delete a channel's messages and remove it from the registry.
    ///
    /// Returns whether the channel was registered.
    pub async fn drop_channel(&self, uaid: &str, chid: &str) -> Result<bool> {
        self.message.delete_messages_for_channel(uaid, chid).await?;
        self.message.unregister_channel(uaid, chid).await
    }

    /// Delete everything stored for a user.
    ///
    /// Message rows are removed from the current partition and from the
    /// user's recorded partition. Returns whether a router record existed.
    pub async fn drop_user(&self, uaid: &str) -> Result<bool> {
        let recorded = match self.router.get_user(uaid).await {
            Ok(user) => user.current_month,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        self.message.delete_user(uaid).await?;
        if let Some(month) = recorded.filter(|m| m != &self.partitions.current) {
            self.partition_store(&month).delete_user(uaid).await?;
        }
        self.router.unregister_user(uaid).await
    }

    /// Move a user's channel registry into the current partition.
    ///
    /// A user without a registry in the recorded partition gets none in the
    /// current one either; only the router record is updated. Returns whether the user was moved. Fails with `NotFound` when the
    /// user has no router record.
    pub async fn rotate_user(&self, uaid: &str) -> Result<bool> {
        let user = self.router.get_user(uaid).await?;
        let current = &self.partitions.current;

        match user.current_month.as_deref() {
            Some(month) if month == current.as_str() => Ok(false),
            Some(month) => {
                let (found, channels) = self.partition_store(month).all_channels(uaid).await?;
                if found {
                    self.message.save_channels(uaid, &channels).await?;
                }
                self.router.set_active_partition(uaid, current).await?;
                info!(uaid, from = month, to = %current, channels = channels.len(), "user rotated");
                Ok(true)
            }
            None => {
                debug!(uaid, to = %current, "recording partition for user");
                self.router.set_active_partition(uaid, current).await?;
                Ok(true)
            }
        }
    }
}
