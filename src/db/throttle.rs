//! Throughput-exceeded tracking for store operations.

use crate::error::Result;
use crate::metrics::MetricsSink;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

/// Prefix of every throttle counter.
pub const THROTTLE_COUNTER_PREFIX: &str = "error.provisioned";

/// Wraps store calls and counts the ones the backend throttled.
///
/// The error is always handed back unchanged. Retrying is the caller's call.
#[derive(Debug, Clone)]
pub struct ThrottleTracker {
    metrics: Arc<dyn MetricsSink>,
}

impl ThrottleTracker {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self { metrics }
    }

    /// Counter incremented when `operation` is throttled.
    pub fn counter_name(operation: &str) -> String {
        format!("{}.{}", THROTTLE_COUNTER_PREFIX, operation)
    }

    /// Count one throttled call of `operation`.
    pub fn record(&self, operation: &str) {
        warn!(operation, "store throughput exceeded");
        self.metrics.increment(&Self::counter_name(operation));
    }

    /// Await `fut`, counting a throttled failure under `operation`.
    pub async fn track<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result = fut.await;
        if let Err(e) = &result {
            if e.is_throttled() {
                self.record(operation);
            }
        }
        result
    }
}
