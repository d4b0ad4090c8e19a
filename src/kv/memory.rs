//! In-process key-value store.
//!
//! Rows live in one ordered map per table, so range queries come back in key
//! order exactly as a partitioned store returns them. Every conditional write
//! holds the table's write lock across its read-check-write, which gives the
//! same single-row atomicity a real backend provides and nothing more.
//!
//! Rows are kept bincode-encoded. Reads therefore cross a decode step just
//! like a networked backend; a row that fails to decode is reported as a
//! transport anomaly rather than a panic.

use super::{Condition, Item, Key, KeyValueStore, Query, ReturnValues, Update};
use crate::error::{Error, Result, StoreError};
use crate::testing::{FaultAction, FaultRegistry};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

type Rows = BTreeMap<(String, String), Bytes>;

/// Key-value store held entirely in memory.
pub struct MemoryStore {
    /// Table name to ordered rows.
    tables: DashMap<String, Arc<RwLock<Rows>>>,

    /// Faults consulted before every operation.
    faults: Arc<FaultRegistry>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_faults(Arc::new(FaultRegistry::new()))
    }

    /// Create an empty store wired to a shared fault registry.
    pub fn with_faults(faults: Arc<FaultRegistry>) -> Self {
        Self {
            tables: DashMap::new(),
            faults,
        }
    }

    /// The fault registry consulted by this store.
    pub fn faults(&self) -> &Arc<FaultRegistry> {
        &self.faults
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.existing(table).map(|t| t.read().len()).unwrap_or(0)
    }

    /// Names of tables that have been written to.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Overwrite a stored row with bytes that will not decode.
    ///
    /// Returns whether the row existed.
    pub fn corrupt_row(&self, table: &str, key: &Key) -> bool {
        let Some(rows) = self.existing(table) else {
            return false;
        };
        let mut rows = rows.write();
        match rows.get_mut(&key.row_id()) {
            Some(bytes) => {
                *bytes = Bytes::from_static(&[0xff]);
                true
            }
            None => false,
        }
    }

    fn existing(&self, table: &str) -> Option<Arc<RwLock<Rows>>> {
        self.tables.get(table).map(|t| Arc::clone(t.value()))
    }

    fn table(&self, table: &str) -> Arc<RwLock<Rows>> {
        let entry = self.tables.entry(table.to_string()).or_default();
        Arc::clone(entry.value())
    }

    /// Run the armed fault for `op`, if any.
    ///
    /// Returns `true` when the caller should garble the old attributes it
    /// hands back.
    async fn inject(&self, op: &str) -> Result<bool> {
        match self.faults.check(op) {
            None => Ok(false),
            Some(FaultAction::Delay(d)) => {
                tokio::time::sleep(d).await;
                Ok(false)
            }
            Some(FaultAction::MalformedOld) => Ok(true),
            Some(action) => match action.as_error(op) {
                Some(e) => Err(e.into()),
                None => Ok(false),
            },
        }
    }
}

fn encode(item: &Item) -> Result<Bytes> {
    Ok(Bytes::from(bincode::serialize(item)?))
}

fn decode(bytes: &Bytes) -> Result<Item> {
    Ok(bincode::deserialize(bytes)?)
}

fn check(condition: Option<&Condition>, current: Option<&Item>) -> Result<()> {
    match condition {
        Some(cond) if !cond.evaluate(current) => Err(StoreError::ConditionFailed.into()),
        _ => Ok(()),
    }
}

fn garble(item: Item) -> Item {
    item.iter()
        .map(|(name, _)| (name.clone(), String::new().into()))
        .collect()
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, table: &str, key: &Key, _consistent: bool) -> Result<Item> {
        self.inject("get_item").await?;
        trace!(table, hash = %key.hash.value, "get_item");

        let rows = self.existing(table).ok_or(StoreError::NotFound)?;
        let rows = rows.read();
        let bytes = rows.get(&key.row_id()).ok_or(StoreError::NotFound)?;
        decode(bytes)
    }

    async fn put_item(
        &self,
        table: &str,
        key: &Key,
        mut item: Item,
        condition: Option<&Condition>,
    ) -> Result<()> {
        self.inject("put_item").await?;
        trace!(table, hash = %key.hash.value, conditional = condition.is_some(), "put_item");

        let rows = self.table(table);
        let mut rows = rows.write();
        let row_id = key.row_id();
        let current = rows.get(&row_id).map(decode).transpose()?;
        check(condition, current.as_ref())?;

        key.stamp(&mut item);
        rows.insert(row_id, encode(&item)?);
        Ok(())
    }

    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        update: &Update,
        condition: Option<&Condition>,
        returns: ReturnValues,
    ) -> Result<Option<Item>> {
        let garbled = self.inject("update_item").await?;
        trace!(table, hash = %key.hash.value, conditional = condition.is_some(), "update_item");

        let rows = self.table(table);
        let mut rows = rows.write();
        let row_id = key.row_id();
        let current = rows.get(&row_id).map(decode).transpose()?;
        check(condition, current.as_ref())?;

        let mut next = current.clone().unwrap_or_default();
        key.stamp(&mut next);
        update.apply(&mut next).map_err(Error::from)?;
        rows.insert(row_id, encode(&next)?);

        let old = match returns {
            ReturnValues::None => None,
            ReturnValues::AllOld => current,
            ReturnValues::UpdatedOld => {
                let touched: Vec<String> = update.attributes().into_iter().collect();
                current
                    .map(|c| c.project(&touched))
                    .filter(|c| !c.is_empty())
            }
        };
        Ok(if garbled { old.map(garble) } else { old })
    }

    async fn delete_item(
        &self,
        table: &str,
        key: &Key,
        condition: Option<&Condition>,
    ) -> Result<()> {
        self.inject("delete_item").await?;
        trace!(table, hash = %key.hash.value, conditional = condition.is_some(), "delete_item");

        let rows = self.table(table);
        let mut rows = rows.write();
        let row_id = key.row_id();
        let current = rows.get(&row_id).map(decode).transpose()?;
        check(condition, current.as_ref())?;

        rows.remove(&row_id);
        Ok(())
    }

    async fn query(&self, table: &str, query: &Query) -> Result<Vec<Item>> {
        self.inject("query").await?;
        trace!(table, hash = %query.hash.value, range = ?query.range, "query");

        let Some(rows) = self.existing(table) else {
            return Ok(Vec::new());
        };
        let rows = rows.read();
        let start = (
            query.hash.value.clone(),
            query.range.lower_bound().to_string(),
        );

        let mut results = Vec::new();
        for ((hash, range), bytes) in rows.range(start..) {
            if hash != &query.hash.value {
                break;
            }
            if query.limit.is_some_and(|limit| results.len() >= limit) {
                break;
            }
            if !query.range.matches(range) {
                continue;
            }
            let item = decode(bytes)?;
            results.push(match &query.projection {
                Some(names) => item.project(names),
                None => item,
            });
        }
        Ok(results)
    }

    async fn batch_delete(&self, table: &str, keys: &[Key]) -> Result<()> {
        self.inject("batch_delete").await?;
        trace!(table, count = keys.len(), "batch_delete");

        let rows = self.table(table);
        let mut rows = rows.write();
        for key in keys {
            rows.remove(&key.row_id());
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("tables", &self.table_names())
            .finish()
    }
}
