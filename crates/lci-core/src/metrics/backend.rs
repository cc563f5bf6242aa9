use std::sync::Arc;

use lci_model::JobStatus;

/// Why a job went back to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueReason {
    /// Its agent stopped heartbeating or disappeared from the registry.
    AgentLost,
    /// The claiming agent's pool was full.
    Rejected,
    /// Its agent was paused past the grace period.
    Paused,
}

impl RequeueReason {
    #[inline]
    pub fn as_label(&self) -> &'static str {
        match self {
            RequeueReason::AgentLost => "agent_lost",
            RequeueReason::Rejected => "rejected",
            RequeueReason::Paused => "paused",
        }
    }
}

/// Backend metrics collection interface.
///
/// `source` labels where a job ended: the sandbox kind (`"docker"`, `"process"`)
/// or `"queue"` for jobs that never reached a sandbox.
pub trait MetricsBackend: Send + Sync + 'static {
    /// A sandbox was launched for a job.
    fn record_job_started(&self, source: &str);
    /// A job reached a terminal state.
    fn record_job_finished(&self, source: &str, status: JobStatus, duration_ms: u64);
    /// Sandbox setup or teardown failed.
    fn record_sandbox_error(&self, source: &str, error_kind: &str);
    fn record_requeue(&self, reason: RequeueReason);
    /// A claimed job was handed back because the local pool was full.
    fn record_claim_rejected(&self);
}

pub type MetricsHandle = Arc<dyn MetricsBackend>;
