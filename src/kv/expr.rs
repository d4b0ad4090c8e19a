//! Typed condition, update and range expressions.

use super::{AttributeValue, Item};
use crate::error::StoreError;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Guard evaluated against the currently stored row.
///
/// An absent row is evaluated as an empty item: `Exists` is false,
/// `NotExists` is true and every comparison is false.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Attribute is present.
    Exists(String),
    /// Attribute is absent.
    NotExists(String),
    /// Attribute equals the value.
    Equals(String, AttributeValue),
    /// Attribute is strictly less than the value (same type only).
    LessThan(String, AttributeValue),
    /// Both hold.
    And(Box<Condition>, Box<Condition>),
    /// Either holds.
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    pub fn exists(name: impl Into<String>) -> Self {
        Condition::Exists(name.into())
    }

    pub fn not_exists(name: impl Into<String>) -> Self {
        Condition::NotExists(name.into())
    }

    pub fn equals(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Condition::Equals(name.into(), value.into())
    }

    pub fn less_than(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Condition::LessThan(name.into(), value.into())
    }

    pub fn and(self, other: Condition) -> Self {
        Condition::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Condition) -> Self {
        Condition::Or(Box::new(self), Box::new(other))
    }

    /// Evaluate against the stored row, if any.
    pub fn evaluate(&self, item: Option<&Item>) -> bool {
        let get = |name: &str| item.and_then(|i| i.get(name));
        match self {
            Condition::Exists(name) => get(name).is_some(),
            Condition::NotExists(name) => get(name).is_none(),
            Condition::Equals(name, value) => get(name) == Some(value),
            Condition::LessThan(name, value) => {
                matches!(get(name).and_then(|v| compare(v, value)), Some(Ordering::Less))
            }
            Condition::And(a, b) => a.evaluate(item) && b.evaluate(item),
            Condition::Or(a, b) => a.evaluate(item) || b.evaluate(item),
        }
    }
}

fn compare(a: &AttributeValue, b: &AttributeValue) -> Option<Ordering> {
    match (a, b) {
        (AttributeValue::N(x), AttributeValue::N(y)) => Some(x.cmp(y)),
        (AttributeValue::S(x), AttributeValue::S(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// One mutation inside an [`Update`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction {
    /// Set an attribute.
    Set(String, AttributeValue),
    /// Remove an attribute.
    Remove(String),
    /// Union elements into a string set, creating it if absent.
    AddToSet(String, BTreeSet<String>),
    /// Remove elements from a string set. An emptied set is removed.
    DeleteFromSet(String, BTreeSet<String>),
}

impl UpdateAction {
    fn attribute(&self) -> &str {
        match self {
            UpdateAction::Set(name, _)
            | UpdateAction::Remove(name)
            | UpdateAction::AddToSet(name, _)
            | UpdateAction::DeleteFromSet(name, _) => name,
        }
    }
}

/// An ordered list of attribute mutations applied to one row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    actions: Vec<UpdateAction>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.actions.push(UpdateAction::Set(name.into(), value.into()));
        self
    }

    pub fn remove(mut self, name: impl Into<String>) -> Self {
        self.actions.push(UpdateAction::Remove(name.into()));
        self
    }

    pub fn add_to_set<I, S>(mut self, name: impl Into<String>, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = elements.into_iter().map(Into::into).collect();
        self.actions.push(UpdateAction::AddToSet(name.into(), set));
        self
    }

    pub fn delete_from_set<I, S>(mut self, name: impl Into<String>, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = elements.into_iter().map(Into::into).collect();
        self.actions
            .push(UpdateAction::DeleteFromSet(name.into(), set));
        self
    }

    /// The actions in application order.
    pub fn actions(&self) -> &[UpdateAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Names of the attributes this update touches.
    pub fn attributes(&self) -> BTreeSet<String> {
        self.actions
            .iter()
            .map(|a| a.attribute().to_string())
            .collect()
    }

    /// Apply every action to `item` in order.
    pub fn apply(&self, item: &mut Item) -> Result<(), StoreError> {
        for action in &self.actions {
            match action {
                UpdateAction::Set(name, value) => item.insert(name.clone(), value.clone()),
                UpdateAction::Remove(name) => {
                    item.remove(name);
                }
                UpdateAction::AddToSet(name, elements) => {
                    let mut set = match item.get(name) {
                        None => BTreeSet::new(),
                        Some(AttributeValue::SS(existing)) => existing.clone(),
                        Some(_) => return Err(type_mismatch(name)),
                    };
                    set.extend(elements.iter().cloned());
                    if !set.is_empty() {
                        item.insert(name.clone(), set);
                    }
                }
                UpdateAction::DeleteFromSet(name, elements) => match item.get(name) {
                    None => {}
                    Some(AttributeValue::SS(existing)) => {
                        let remaining: BTreeSet<String> =
                            existing.difference(elements).cloned().collect();
                        if remaining.is_empty() {
                            item.remove(name);
                        } else {
                            item.insert(name.clone(), remaining);
                        }
                    }
                    Some(_) => return Err(type_mismatch(name)),
                },
            }
        }
        Ok(())
    }
}

fn type_mismatch(name: &str) -> StoreError {
    StoreError::TransportAnomaly(format!("set operation on non-set attribute {}", name))
}

/// Which attributes `update_item` hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnValues {
    /// Nothing.
    #[default]
    None,
    /// The whole row as it was before the update.
    AllOld,
    /// Only the touched attributes, as they were before the update.
    UpdatedOld,
}

/// Condition on the range component of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeCondition {
    Eq(String),
    Gt(String),
    Gte(String),
    BeginsWith(String),
}

impl RangeCondition {
    /// Whether a range value satisfies the condition.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            RangeCondition::Eq(v) => value == v,
            RangeCondition::Gt(v) => value > v.as_str(),
            RangeCondition::Gte(v) => value >= v.as_str(),
            RangeCondition::BeginsWith(prefix) => value.starts_with(prefix.as_str()),
        }
    }

    /// Smallest value the condition can match, used to seek ordered scans.
    pub fn lower_bound(&self) -> &str {
        match self {
            RangeCondition::Eq(v)
            | RangeCondition::Gt(v)
            | RangeCondition::Gte(v)
            | RangeCondition::BeginsWith(v) => v,
        }
    }
}
