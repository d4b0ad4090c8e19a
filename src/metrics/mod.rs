//! Metrics module.
//!
//! The storage layer only ever increments named counters, through the
//! [`MetricsSink`] trait. [`StoreMetrics`] is the in-process implementation:
//! it keeps every counter it has seen and can render them in Prometheus text
//! format. [`NoopMetrics`] drops everything.
//!
//! # Example
//!
//! ```rust
//! use pushstore::metrics::{MetricsSink, StoreMetrics};
//!
//! let metrics = StoreMetrics::new();
//! metrics.increment("error.provisioned.fetch_messages");
//! assert_eq!(metrics.get("error.provisioned.fetch_messages"), 1);
//! ```

mod counters;

pub use counters::{Counter, CounterFamily};

/// Destination for named counter increments.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    /// Increment the counter called `name` by one.
    fn increment(&self, name: &str);
}

/// Discards every increment.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str) {}
}

/// Counts increments per counter name.
#[derive(Debug)]
pub struct StoreMetrics {
    /// Every increment, regardless of name.
    pub increments_total: Counter,
    /// Per-name counters.
    pub counters: CounterFamily,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self {
            increments_total: Counter::new(
                "pushstore_increments_total",
                "Total counter increments reported by the store layer",
            ),
            counters: CounterFamily::new(),
        }
    }

    /// Value of one named counter.
    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name)
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total: self.increments_total.get(),
            counters: self.counters.get_all(),
        }
    }

    /// Format metrics in Prometheus exposition format.
    ///
    /// Dotted counter names are exported with dots replaced by underscores.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.increments_total.name(),
            self.increments_total.help(),
            self.increments_total.name(),
            self.increments_total.name(),
            self.increments_total.get()
        ));

        for (name, value) in self.counters.get_all() {
            let name = prometheus_name(&name);
            output.push_str(&format!("# TYPE {} counter\n{} {}\n", name, name, value));
        }

        output
    }
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for StoreMetrics {
    fn increment(&self, name: &str) {
        self.increments_total.inc();
        self.counters.inc(name);
    }
}

fn prometheus_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// A point-in-time copy of [`StoreMetrics`].
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub counters: Vec<(String, u64)>,
}

impl MetricsSnapshot {
    /// Value of one named counter in the snapshot.
    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .unwrap_or(0)
    }
}
