//! Time-bucketed message partitions.
//!
//! Messages are written to a table named after the current calendar month
//! (`message_2024_3`). Once a month the active table rotates; the previous
//! month's table is kept around so users who have not reconnected since can
//! be migrated forward, and the next month's table can be provisioned ahead
//! of time.
//!
//! ```text
//!   previous            current             next
//! message_2024_2 ──▶ message_2024_3 ──▶ message_2024_4
//! ```
//!
//! The names are resolved once into [`MessagePartitions`] and handed to the
//! components that need them, so a single request never sees the month
//! change underneath it.

mod rotation;

pub use rotation::{month_offset, partition_name, partition_name_for, today};

use crate::error::Result;
use chrono::NaiveDate;

/// Resolved names of the message partitions around a reference date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePartitions {
    /// Last month's partition.
    pub previous: String,
    /// The partition new messages go to.
    pub current: String,
    /// Next month's partition.
    pub next: String,
}

impl MessagePartitions {
    /// Resolve partition names for `prefix` around `today`.
    pub fn resolve(prefix: &str, today: NaiveDate) -> Result<Self> {
        Ok(Self {
            previous: partition_name_for(prefix, today, -1)?,
            current: partition_name_for(prefix, today, 0)?,
            next: partition_name_for(prefix, today, 1)?,
        })
    }

    /// A single non-rotating partition.
    pub fn fixed(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            previous: name.clone(),
            current: name.clone(),
            next: name,
        }
    }

    /// Whether rotation is in effect.
    pub fn is_rotating(&self) -> bool {
        self.previous != self.current
    }

    /// Whether `name` is one of the resolved partitions.
    pub fn contains(&self, name: &str) -> bool {
        self.previous == name || self.current == name || self.next == name
    }
}
