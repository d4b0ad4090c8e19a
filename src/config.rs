//! Configuration types for the push storage layer.

use crate::error::{Error, Result};
use crate::partitioning::MessagePartitions;
use chrono::NaiveDate;

/// Default per-request bulk-write cap of the backing store.
pub const DEFAULT_BATCH_WRITE_LIMIT: usize = 25;

/// Main configuration for the push storage layer.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Table holding per-user node ownership.
    pub router_table: String,

    /// Table holding legacy single-version notifications.
    pub storage_table: String,

    /// Prefix of the monthly message partitions.
    pub message_prefix: String,

    /// Fixed message table; disables monthly rotation when set.
    pub message_table: Option<String>,

    /// Default number of messages returned by a fetch.
    pub fetch_limit: usize,

    /// Maximum number of keys sent in one bulk-delete request.
    pub batch_write_limit: usize,

    /// Node id written by the startup preflight check.
    pub preflight_node_id: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            router_table: "router".to_string(),
            storage_table: "storage".to_string(),
            message_prefix: "message".to_string(),
            message_table: None,
            fetch_limit: 10,
            batch_write_limit: DEFAULT_BATCH_WRITE_LIMIT,
            preflight_node_id: "mynode:2020".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create a configuration with default table names.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the router table name.
    pub fn with_router_table(mut self, name: impl Into<String>) -> Self {
        self.router_table = name.into();
        self
    }

    /// Set the legacy storage table name.
    pub fn with_storage_table(mut self, name: impl Into<String>) -> Self {
        self.storage_table = name.into();
        self
    }

    /// Set the message partition prefix.
    pub fn with_message_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.message_prefix = prefix.into();
        self
    }

    /// Use one fixed message table instead of monthly partitions.
    pub fn with_message_table(mut self, name: impl Into<String>) -> Self {
        self.message_table = Some(name.into());
        self
    }

    /// Set the default fetch limit.
    pub fn with_fetch_limit(mut self, limit: usize) -> Self {
        self.fetch_limit = limit;
        self
    }

    /// Set the bulk-delete batch size.
    pub fn with_batch_write_limit(mut self, limit: usize) -> Self {
        self.batch_write_limit = limit;
        self
    }

    /// Set the node id used by the preflight check.
    pub fn with_preflight_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.preflight_node_id = node_id.into();
        self
    }

    /// Reject configurations the stores cannot work with.
    pub fn validate(&self) -> Result<()> {
        let names = [
            ("router_table", self.router_table.as_str()),
            ("storage_table", self.storage_table.as_str()),
            ("message_prefix", self.message_prefix.as_str()),
        ];
        for (field, value) in names {
            if value.is_empty() {
                return Err(Error::Config(format!("{} must not be empty", field)));
            }
        }
        if self.message_table.as_deref() == Some("") {
            return Err(Error::Config("message_table must not be empty".to_string()));
        }
        if self.fetch_limit == 0 {
            return Err(Error::Config("fetch_limit must be positive".to_string()));
        }
        if self.batch_write_limit == 0 {
            return Err(Error::Config("batch_write_limit must be positive".to_string()));
        }
        Ok(())
    }

    /// Resolve the message partitions around `today`.
    pub fn resolve_partitions(&self, today: NaiveDate) -> Result<MessagePartitions> {
        match &self.message_table {
            Some(name) => Ok(MessagePartitions::fixed(name.clone())),
            None => MessagePartitions::resolve(&self.message_prefix, today),
        }
    }
}
