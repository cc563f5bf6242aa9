use async_trait::async_trait;
use lci_core::{AgentView, CancelOutcome};
use lci_model::{AgentId, CourseId, JobDescriptor, JobId, RunningJob};

use crate::ApiError;

/// Backend of the administrative API.
///
/// [`CoreApiAdapter`](crate::CoreApiAdapter) delegates to the queue and registry;
/// other implementations can add caching or auditing around the same calls.
#[async_trait]
pub trait ApiHandler: Send + Sync + 'static {
    async fn queued_jobs(&self, course: &CourseId) -> Result<Vec<JobDescriptor>, ApiError>;

    async fn running_jobs(&self, course: &CourseId) -> Result<Vec<RunningJob>, ApiError>;

    /// Idempotent: an unknown or finished job, or one of another course, is
    /// not an error and is left untouched.
    async fn cancel_job(&self, course: &CourseId, job: &JobId) -> Result<CancelOutcome, ApiError>;

    async fn cancel_all_queued(&self, course: &CourseId) -> Result<usize, ApiError>;

    async fn cancel_all_running(&self, course: &CourseId) -> Result<usize, ApiError>;

    async fn agents(&self) -> Result<Vec<AgentView>, ApiError>;

    async fn pause_agent(&self, agent: &AgentId) -> Result<(), ApiError>;

    async fn resume_agent(&self, agent: &AgentId) -> Result<(), ApiError>;

    async fn submit_job(&self, job: JobDescriptor) -> Result<JobId, ApiError>;

    /// Prometheus text exposition, `None` when metrics are not collected.
    fn metrics(&self) -> Option<Result<String, ApiError>> {
        None
    }
}
