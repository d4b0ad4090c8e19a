//! Key-value store abstraction.
//!
//! The storage layer never talks to a concrete database. Everything goes
//! through [`KeyValueStore`], a single-row conditional-write primitive plus
//! ordered range queries within one hash key:
//!
//! ```text
//! ┌──────────────┐  ┌──────────────────────┐  ┌──────────────┐
//! │ RouterStore  │  │ LegacyNotificationSt.│  │ MessageStore │
//! └──────┬───────┘  └──────────┬───────────┘  └──────┬───────┘
//!        │    Condition / Update / Query             │
//!        └─────────────────────┼─────────────────────┘
//!                              ▼
//!                 ┌─────────────────────────┐
//!                 │  dyn KeyValueStore      │
//!                 │  (MemoryStore, remote)  │
//!                 └─────────────────────────┘
//! ```
//!
//! Conditions and updates are typed values rather than expression strings;
//! a remote adapter renders them into whatever its wire protocol expects.

mod expr;
mod memory;

pub use expr::{Condition, RangeCondition, ReturnValues, Update, UpdateAction};
pub use memory::MemoryStore;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// A string.
    S(String),
    /// A non-negative number.
    N(u64),
    /// A non-empty set of strings.
    SS(BTreeSet<String>),
    /// A flat string map.
    M(BTreeMap<String, String>),
}

impl AttributeValue {
    /// Borrow the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    /// The numeric payload, if this is a number.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttributeValue::N(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrow the set payload, if this is a string set.
    pub fn as_string_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            AttributeValue::SS(set) => Some(set),
            _ => None,
        }
    }

    /// Borrow the map payload, if this is a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            AttributeValue::M(map) => Some(map),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::S(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::S(s)
    }
}

impl From<u64> for AttributeValue {
    fn from(n: u64) -> Self {
        AttributeValue::N(n)
    }
}

impl From<BTreeSet<String>> for AttributeValue {
    fn from(set: BTreeSet<String>) -> Self {
        AttributeValue::SS(set)
    }
}

impl From<BTreeMap<String, String>> for AttributeValue {
    fn from(map: BTreeMap<String, String>) -> Self {
        AttributeValue::M(map)
    }
}

/// A stored row: attribute name to value, key attributes included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    attributes: BTreeMap<String, AttributeValue>,
}

impl Item {
    /// Create an empty item.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace an attribute.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Remove an attribute, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    /// Get an attribute.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Whether the attribute is present.
    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Get a string attribute. Missing or differently-typed values yield `None`.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttributeValue::as_str)
    }

    /// Get a numeric attribute.
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(AttributeValue::as_u64)
    }

    /// Get a string-set attribute.
    pub fn get_string_set(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.get(name).and_then(AttributeValue::as_string_set)
    }

    /// Get a map attribute.
    pub fn get_map(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.get(name).and_then(AttributeValue::as_map)
    }

    /// Keep only the named attributes.
    pub fn project(&self, names: &[String]) -> Item {
        let attributes = self
            .attributes
            .iter()
            .filter(|(k, _)| names.iter().any(|n| n == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Item { attributes }
    }

    /// Iterate over attributes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.attributes.iter()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Whether the item has no attributes.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl FromIterator<(String, AttributeValue)> for Item {
    fn from_iter<T: IntoIterator<Item = (String, AttributeValue)>>(iter: T) -> Self {
        Item {
            attributes: iter.into_iter().collect(),
        }
    }
}

/// One component of a primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPart {
    /// Attribute name.
    pub name: String,
    /// Attribute value.
    pub value: String,
}

impl KeyPart {
    /// Create a key part.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Primary key of a row: a hash part and an optional range part.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    /// Partition (hash) component.
    pub hash: KeyPart,
    /// Ordering (range) component, for tables that have one.
    pub range: Option<KeyPart>,
}

impl Key {
    /// Key for a hash-only table.
    pub fn hash(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            hash: KeyPart::new(name, value),
            range: None,
        }
    }

    /// Add a range component.
    pub fn with_range(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.range = Some(KeyPart::new(name, value));
        self
    }

    /// Stable row identity used by ordered backends: `(hash, range or "")`.
    pub fn row_id(&self) -> (String, String) {
        (
            self.hash.value.clone(),
            self.range
                .as_ref()
                .map(|r| r.value.clone())
                .unwrap_or_default(),
        )
    }

    /// Write the key attributes into an item.
    pub fn stamp(&self, item: &mut Item) {
        item.insert(self.hash.name.clone(), self.hash.value.clone());
        if let Some(range) = &self.range {
            item.insert(range.name.clone(), range.value.clone());
        }
    }
}

/// A range query within one hash key.
#[derive(Debug, Clone)]
pub struct Query {
    /// Hash key to scan.
    pub hash: KeyPart,
    /// Name of the range attribute.
    pub range_name: String,
    /// Condition on the range attribute.
    pub range: RangeCondition,
    /// Read with strong consistency.
    pub consistent: bool,
    /// Maximum number of rows to return.
    pub limit: Option<usize>,
    /// Attributes to return; all when `None`.
    pub projection: Option<Vec<String>>,
}

impl Query {
    /// Create an eventually-consistent, unbounded query.
    pub fn new(hash: KeyPart, range_name: impl Into<String>, range: RangeCondition) -> Self {
        Self {
            hash,
            range_name: range_name.into(),
            range,
            consistent: false,
            limit: None,
            projection: None,
        }
    }

    /// Require strongly-consistent reads.
    pub fn consistent(mut self) -> Self {
        self.consistent = true;
        self
    }

    /// Cap the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Only return the given attributes.
    pub fn project<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

/// A partitioned key-value store offering single-row conditional writes.
///
/// Every method may fail with [`StoreError::Throttled`](crate::error::StoreError::Throttled).
/// Conditional methods fail with `ConditionFailed` when their guard does not hold.
#[async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Read one row. Fails with `NotFound` when absent.
    async fn get_item(&self, table: &str, key: &Key, consistent: bool) -> Result<Item>;

    /// Insert or replace one row.
    async fn put_item(
        &self,
        table: &str,
        key: &Key,
        item: Item,
        condition: Option<&Condition>,
    ) -> Result<()>;

    /// Apply an update to one row, creating it if needed.
    ///
    /// Returns the attributes selected by `returns`, or `None` for
    /// [`ReturnValues::None`] or when there was no previous row.
    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        update: &Update,
        condition: Option<&Condition>,
        returns: ReturnValues,
    ) -> Result<Option<Item>>;

    /// Delete one row. Deleting an absent row without a condition succeeds.
    async fn delete_item(&self, table: &str, key: &Key, condition: Option<&Condition>)
        -> Result<()>;

    /// Range query within one hash key, ascending by range key.
    async fn query(&self, table: &str, query: &Query) -> Result<Vec<Item>>;

    /// Delete many rows in one request. Not atomic across rows.
    async fn batch_delete(&self, table: &str, keys: &[Key]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_typed_getters() {
        let item = Item::new()
            .with("name", "alice")
            .with("version", 3u64)
            .with("chids", BTreeSet::from(["a".to_string()]));

        assert_eq!(item.get_str("name"), Some("alice"));
        assert_eq!(item.get_u64("version"), Some(3));
        assert_eq!(item.get_u64("name"), None);
        assert!(item.get_string_set("chids").unwrap().contains("a"));
        assert_eq!(item.get_str("missing"), None);
    }

    #[test]
    fn test_projection() {
        let item = Item::new().with("a", "1").with("b", "2").with("c", "3");
        let projected = item.project(&["a".to_string(), "c".to_string()]);
        assert_eq!(projected.len(), 2);
        assert!(!projected.contains("b"));
    }

    #[test]
    fn test_key_stamp_and_row_id() {
        let key = Key::hash("uaid", "u1").with_range("chid", "c1");
        let mut item = Item::new();
        key.stamp(&mut item);
        assert_eq!(item.get_str("uaid"), Some("u1"));
        assert_eq!(item.get_str("chid"), Some("c1"));
        assert_eq!(key.row_id(), ("u1".to_string(), "c1".to_string()));
        assert_eq!(Key::hash("uaid", "u1").row_id().1, "");
    }
}
