use lci_model::JobStatus;

use crate::metrics::backend::{MetricsBackend, RequeueReason};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl MetricsBackend for NoOpMetrics {
    #[inline(always)]
    fn record_job_started(&self, _: &str) {}

    #[inline(always)]
    fn record_job_finished(&self, _: &str, _: JobStatus, _: u64) {}

    #[inline(always)]
    fn record_sandbox_error(&self, _: &str, _: &str) {}

    #[inline(always)]
    fn record_requeue(&self, _: RequeueReason) {}

    #[inline(always)]
    fn record_claim_rejected(&self) {}
}
