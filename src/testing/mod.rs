//! Testing utilities for the push storage layer.
//!
//! [`FaultRegistry`] arms failures on named [`MemoryStore`](crate::kv::MemoryStore)
//! operations so the error paths of every store can be driven without a real
//! backend:
//!
//! ```text
//!   test ──enable("update_item", Throttle)──▶ FaultRegistry
//!                                                  │ check(op)
//!   RouterStore ──update_item──▶ MemoryStore ◀─────┘
//!                                  │
//!                                  └──▶ Err(Throttled)
//! ```
//!
//! The scenario tests in this module exercise the stores together, the way
//! connection nodes use them.

mod faults;

#[cfg(test)]
mod scenarios;

pub use faults::{FaultAction, FaultRegistry};
