//! Metrics abstraction for the queue and the executing agents.
//!
//! Backends implement [`MetricsBackend`]; [`noop_metrics`] is the default.
mod backend;
pub use backend::{MetricsBackend, MetricsHandle, RequeueReason};

mod noop;
pub use noop::NoOpMetrics;

use std::sync::Arc;

#[inline]
pub fn noop_metrics() -> MetricsHandle {
    Arc::new(NoOpMetrics)
}
