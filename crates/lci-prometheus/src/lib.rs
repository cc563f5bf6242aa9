//! Prometheus backend for the build queue and agent metrics.
//!
//! [`PrometheusMetrics`] implements [`lci_core::MetricsBackend`]; hand a clone to the
//! queue and runners, and serve [`PrometheusMetrics::render`] from `/metrics`.
//!
//! ## Metrics
//! - `lci_jobs_started_total{source}` - Counter
//! - `lci_jobs_finished_total{source, status}` - Counter
//! - `lci_job_duration_seconds{source}` - Histogram
//! - `lci_sandbox_errors_total{source, error_kind}` - Counter
//! - `lci_requeues_total{reason}` - Counter
//! - `lci_claims_rejected_total` - Counter
mod backend;
pub use backend::PrometheusMetrics;

pub use prometheus::{Encoder, Registry, TextEncoder};
