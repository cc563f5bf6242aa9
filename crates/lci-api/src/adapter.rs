use async_trait::async_trait;
use lci_core::{AgentRegistry, AgentView, BuildJobQueue, CancelOutcome};
use lci_model::{AgentId, CourseId, JobDescriptor, JobId, RunningJob};
use lci_prometheus::PrometheusMetrics;
use tracing::info;

use crate::{ApiError, ApiHandler};

/// [`ApiHandler`] backed directly by the build queue and agent registry.
#[derive(Clone)]
pub struct CoreApiAdapter {
    queue: BuildJobQueue,
    registry: AgentRegistry,
    metrics: Option<PrometheusMetrics>,
}

impl CoreApiAdapter {
    pub fn new(queue: BuildJobQueue, registry: AgentRegistry) -> Self {
        Self {
            queue,
            registry,
            metrics: None,
        }
    }

    /// Serve these metrics at `/metrics`.
    pub fn with_metrics(mut self, metrics: PrometheusMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[async_trait]
impl ApiHandler for CoreApiAdapter {
    async fn queued_jobs(&self, course: &CourseId) -> Result<Vec<JobDescriptor>, ApiError> {
        Ok(self.queue.get_queued_jobs_for_course(course).await?)
    }

    async fn running_jobs(&self, course: &CourseId) -> Result<Vec<RunningJob>, ApiError> {
        Ok(self.queue.get_processing_jobs_for_course(course).await?)
    }

    async fn cancel_job(&self, course: &CourseId, job: &JobId) -> Result<CancelOutcome, ApiError> {
        let outcome = self.queue.cancel_course_build_job(course, job).await?;
        info!(course = %course, job = %job, ?outcome, "cancel requested");
        Ok(outcome)
    }

    async fn cancel_all_queued(&self, course: &CourseId) -> Result<usize, ApiError> {
        Ok(self.queue.cancel_all_queued_build_jobs_for_course(course).await?)
    }

    async fn cancel_all_running(&self, course: &CourseId) -> Result<usize, ApiError> {
        Ok(self.queue.cancel_all_running_build_jobs_for_course(course).await?)
    }

    async fn agents(&self) -> Result<Vec<AgentView>, ApiError> {
        Ok(self.registry.views().await?)
    }

    async fn pause_agent(&self, agent: &AgentId) -> Result<(), ApiError> {
        // Unknown ids would be published to nobody.
        self.registry.get(agent).await?;
        Ok(self.queue.pause_agent(agent).await?)
    }

    async fn resume_agent(&self, agent: &AgentId) -> Result<(), ApiError> {
        self.registry.get(agent).await?;
        Ok(self.queue.resume_agent(agent).await?)
    }

    async fn submit_job(&self, job: JobDescriptor) -> Result<JobId, ApiError> {
        let id = job.id.clone();
        self.queue.enqueue(job).await?;
        Ok(id)
    }

    fn metrics(&self) -> Option<Result<String, ApiError>> {
        self.metrics
            .as_ref()
            .map(|m| m.render().map_err(|e| ApiError::Internal(e.to_string())))
    }
}
