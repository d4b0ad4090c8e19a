//! Storage-consistency layer for a push notification service.
//!
//! Connection nodes use this crate to coordinate through a shared
//! partitioned key-value store. Every cross-node invariant is enforced by a
//! single-row conditional write, never by locks or transactions:
//!
//! - **Node ownership**: a user is claimed by the node with the newest
//!   `connected_at`, and released only by the node still holding it
//! - **Legacy notifications**: a channel's version only moves forward
//! - **Messages**: a per-user channel registry plus pending messages, in
//!   monthly partitions, with update ids guarding in-place edits
//!
//! Throttled store calls are counted under `error.provisioned.<operation>`
//! and handed back to the caller unchanged.
//!
//! # Example
//!
//! ```rust,no_run
//! use pushstore::{MemoryStore, MessageWrite, PushDatabase, StoreConfig, StoreMetrics, UserRecord};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = PushDatabase::new(
//!         StoreConfig::default(),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(StoreMetrics::new()),
//!     )?;
//!
//!     // Claim the user for this node
//!     let user = UserRecord::new("uaid").with_node("node-a:8080", 1_700_000_000);
//!     if db.router().register_user(&user).await?.is_registered() {
//!         db.message().register_channel("uaid", "chid").await?;
//!         db.message()
//!             .store_message("uaid", &MessageWrite::new("chid", "msg-1", 300))
//!             .await?;
//!     }
//!
//!     for message in db.fetch_messages("uaid").await? {
//!         println!("pending: {}", message.ordering_key());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               PushDatabase                  │
//! │  preflight_check / drop_user / rotate_user  │
//! └─────────────────────────────────────────────┘
//!                     │
//!     ┌───────────────┼───────────────┐
//!     ▼               ▼               ▼
//! ┌─────────┐   ┌───────────┐   ┌──────────────┐
//! │ Router  │   │  Legacy   │   │   Message    │
//! │  Store  │   │  Storage  │   │ (per month)  │
//! └─────────┘   └───────────┘   └──────────────┘
//!     │               │               │
//!     └───────────────┼───────────────┘
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │   KeyValueStore (conditional single-row)    │
//! └─────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod kv;
pub mod metrics;
pub mod partitioning;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use config::StoreConfig;
pub use db::{LegacyNotificationStore, MessageStore, PushDatabase, RouterStore, ThrottleTracker};
pub use error::{Error, Result, StoreError};
pub use types::{
    ChannelSet, Headers, LegacyNotification, Message, MessageWrite, RegisterOutcome, UserRecord,
};

// Re-export storage backend types
pub use kv::{Condition, Item, Key, KeyValueStore, MemoryStore, Query, ReturnValues, Update};

// Re-export partitioning types
pub use partitioning::{partition_name, MessagePartitions};

// Re-export metrics types
pub use metrics::{Counter, CounterFamily, MetricsSink, MetricsSnapshot, NoopMetrics, StoreMetrics};

// Re-export testing types
pub use testing::{FaultAction, FaultRegistry};
