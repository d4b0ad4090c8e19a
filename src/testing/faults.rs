//! Fault injection for store operations.
//!
//! [`MemoryStore`](crate::kv::MemoryStore) consults a [`FaultRegistry`]
//! before every operation, keyed by the operation name (`get_item`,
//! `put_item`, `update_item`, `delete_item`, `query`, `batch_delete`).
//! Tests use it to reproduce throttling, malformed responses and lost races
//! without a real backend.
//!
//! # Example
//!
//! ```rust
//! use pushstore::testing::{FaultAction, FaultRegistry};
//!
//! let faults = FaultRegistry::new();
//! faults.enable("put_item", FaultAction::Throttle);
//! faults.enable_once("get_item", FaultAction::Malformed);
//!
//! faults.disable("put_item");
//! ```

use crate::error::StoreError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What an armed fault does when hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultAction {
    /// Fail with `Throttled`.
    Throttle,

    /// Fail with `TransportAnomaly`.
    Malformed,

    /// Fail with `ConditionFailed`, as if another writer won the race.
    ConditionFail,

    /// Let the write happen but garble the returned old attributes.
    MalformedOld,

    /// Delay the operation, then continue normally.
    Delay(Duration),
}

impl FaultAction {
    /// The store error this action surfaces, if it surfaces one.
    pub fn as_error(&self, op: &str) -> Option<StoreError> {
        match self {
            FaultAction::Throttle => Some(StoreError::Throttled),
            FaultAction::Malformed => Some(StoreError::TransportAnomaly(format!(
                "injected malformed response for {}",
                op
            ))),
            FaultAction::ConditionFail => Some(StoreError::ConditionFailed),
            FaultAction::MalformedOld | FaultAction::Delay(_) => None,
        }
    }
}

struct FaultState {
    action: FaultAction,
    /// Remaining triggers; `None` means unlimited.
    remaining: Option<AtomicU64>,
    hit_count: AtomicU64,
}

/// Registry of armed faults, shared between a store and its test.
pub struct FaultRegistry {
    faults: RwLock<HashMap<String, Arc<FaultState>>>,
    enabled: AtomicBool,
    total_hits: AtomicU64,
}

impl Default for FaultRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            faults: RwLock::new(HashMap::new()),
            enabled: AtomicBool::new(true),
            total_hits: AtomicU64::new(0),
        }
    }

    /// Arm a fault that triggers on every hit.
    pub fn enable(&self, op: &str, action: FaultAction) {
        self.insert(op, action, None);
    }

    /// Arm a fault that triggers on the next hit only.
    pub fn enable_once(&self, op: &str, action: FaultAction) {
        self.enable_times(op, action, 1);
    }

    /// Arm a fault that triggers on the next `n` hits.
    pub fn enable_times(&self, op: &str, action: FaultAction, n: u64) {
        self.insert(op, action, Some(n));
    }

    fn insert(&self, op: &str, action: FaultAction, remaining: Option<u64>) {
        let state = Arc::new(FaultState {
            action,
            remaining: remaining.map(AtomicU64::new),
            hit_count: AtomicU64::new(0),
        });
        self.faults.write().insert(op.to_string(), state);
    }

    /// Disarm the fault for an operation.
    pub fn disable(&self, op: &str) {
        self.faults.write().remove(op);
    }

    /// Globally enable/disable all faults.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Check an operation; returns the action to take if a fault triggers.
    pub fn check(&self, op: &str) -> Option<FaultAction> {
        if !self.enabled.load(Ordering::Relaxed) {
            return None;
        }

        let state = self.faults.read().get(op).cloned()?;
        state.hit_count.fetch_add(1, Ordering::Relaxed);

        if let Some(remaining) = &state.remaining {
            let claimed = remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !claimed {
                return None;
            }
        }

        self.total_hits.fetch_add(1, Ordering::Relaxed);
        Some(state.action.clone())
    }

    /// Number of times an operation's fault was consulted.
    pub fn hits(&self, op: &str) -> u64 {
        self.faults
            .read()
            .get(op)
            .map(|s| s.hit_count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Number of times any fault actually triggered.
    pub fn total_hits(&self) -> u64 {
        self.total_hits.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for FaultRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut armed: Vec<String> = self.faults.read().keys().cloned().collect();
        armed.sort();
        f.debug_struct("FaultRegistry")
            .field("armed", &armed)
            .field("total_hits", &self.total_hits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_fault() {
        let registry = FaultRegistry::new();
        registry.enable("query", FaultAction::Throttle);

        assert_eq!(registry.check("query"), Some(FaultAction::Throttle));
        assert_eq!(registry.check("query"), Some(FaultAction::Throttle));
        assert_eq!(registry.check("get_item"), None);
        assert_eq!(registry.hits("query"), 2);
    }

    #[test]
    fn test_once_fault() {
        let registry = FaultRegistry::new();
        registry.enable_once("put_item", FaultAction::ConditionFail);

        assert_eq!(registry.check("put_item"), Some(FaultAction::ConditionFail));
        assert_eq!(registry.check("put_item"), None);
        assert_eq!(registry.total_hits(), 1);
    }

    #[test]
    fn test_global_disable() {
        let registry = FaultRegistry::new();
        registry.enable("put_item", FaultAction::Throttle);
        registry.set_enabled(false);
        assert_eq!(registry.check("put_item"), None);

        registry.set_enabled(true);
        registry.disable("put_item");
        assert_eq!(registry.check("put_item"), None);
    }

    #[test]
    fn test_action_errors() {
        assert_eq!(FaultAction::Throttle.as_error("x"), Some(StoreError::Throttled));
        assert!(FaultAction::Delay(Duration::from_millis(1)).as_error("x").is_none());
    }
}
