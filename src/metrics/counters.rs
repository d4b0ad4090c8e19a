//! Counter metrics for monotonically increasing values.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter.
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn help(&self) -> &'static str {
        self.help
    }

    /// Increment the counter by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters created on first use, keyed by a runtime name.
///
/// Counter names such as `error.provisioned.register_user` are only known
/// when the failing operation reports them.
#[derive(Debug, Default)]
pub struct CounterFamily {
    counters: RwLock<BTreeMap<String, AtomicU64>>,
}

impl CounterFamily {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the named counter by 1.
    pub fn inc(&self, name: &str) {
        // Fast path: counter already exists
        {
            let counters = self.counters.read();
            if let Some(counter) = counters.get(name) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let mut counters = self.counters.write();
        counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Value of the named counter, zero if it was never incremented.
    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// All counters in name order.
    pub fn get_all(&self) -> Vec<(String, u64)> {
        self.counters
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }
}
