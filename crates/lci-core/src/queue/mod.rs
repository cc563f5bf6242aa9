//! Cluster-wide view of pending and running build jobs.
//!
//! Pending jobs live in the [`BUILD_JOB_QUEUE`] queue, running ones in the
//! [`RUNNING_JOBS_MAP`] map keyed by job id. Every mutation of a running entry
//! holds that job's key lock.
mod cancel;
pub use cancel::CancelOutcome;

mod claim;

mod requeue;
pub use requeue::{RequeueOutcome, RequeueReport};

use lci_grid::{DataProviderExt, DistributedDataProvider, DistributedMap, DistributedQueue, DistributedTopic};
use lci_model::{
    AgentId, BUILD_JOB_QUEUE, CourseId, FinishedJob, JobDescriptor, JobId, PAUSE_AGENT_TOPIC,
    QueueEntry, REGISTRY_EVENTS_TOPIC, RESUME_AGENT_TOPIC, RUNNING_JOBS_MAP, RegistryEvent,
    RunningJob,
};
use tracing::{debug, info, instrument, warn};

use crate::{
    config::QueueConfig,
    error::CoreResult,
    history::RecentJobs,
    metrics::{MetricsHandle, noop_metrics},
};

/// Metrics source label for jobs that end without reaching a sandbox.
const QUEUE_SOURCE: &str = "queue";

#[derive(Clone)]
pub struct BuildJobQueue {
    queue: DistributedQueue<QueueEntry>,
    running: DistributedMap<JobId, RunningJob>,
    events: DistributedTopic<RegistryEvent>,
    pause: DistributedTopic<AgentId>,
    resume: DistributedTopic<AgentId>,
    history: RecentJobs,
    config: QueueConfig,
    metrics: MetricsHandle,
}

impl BuildJobQueue {
    pub fn new(provider: &dyn DistributedDataProvider, config: QueueConfig) -> Self {
        Self {
            queue: provider.queue(BUILD_JOB_QUEUE),
            running: provider.map(RUNNING_JOBS_MAP),
            events: provider.topic(REGISTRY_EVENTS_TOPIC),
            pause: provider.topic(PAUSE_AGENT_TOPIC),
            resume: provider.topic(RESUME_AGENT_TOPIC),
            history: RecentJobs::new(provider, config.recent_jobs),
            config,
            metrics: noop_metrics(),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    #[inline]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Raw queue handle, for item listeners.
    #[inline]
    pub fn pending(&self) -> &DistributedQueue<QueueEntry> {
        &self.queue
    }

    /// Topic carrying [`RegistryEvent`] updates.
    #[inline]
    pub fn events(&self) -> &DistributedTopic<RegistryEvent> {
        &self.events
    }

    #[inline]
    pub fn pause_topic(&self) -> &DistributedTopic<AgentId> {
        &self.pause
    }

    #[inline]
    pub fn resume_topic(&self) -> &DistributedTopic<AgentId> {
        &self.resume
    }

    #[inline]
    pub fn history(&self) -> &RecentJobs {
        &self.history
    }

    /// Queue a new job in priority order and notify listeners.
    #[instrument(level = "debug", skip(self, job), fields(job = %job.id, course = %job.course))]
    pub async fn enqueue(&self, job: JobDescriptor) -> CoreResult<()> {
        let priority = i64::from(job.priority);
        self.queue.offer(&QueueEntry::new(job), priority).await?;
        debug!(priority, "job queued");
        self.publish(RegistryEvent::QueueChanged).await;
        Ok(())
    }

    /// Every queued job, in dispatch order.
    pub async fn queued_jobs(&self) -> CoreResult<Vec<QueueEntry>> {
        Ok(self.queue.snapshot().await?)
    }

    pub async fn running_jobs(&self) -> CoreResult<Vec<RunningJob>> {
        Ok(self.running.values().await?)
    }

    pub async fn running_job(&self, id: &JobId) -> CoreResult<Option<RunningJob>> {
        Ok(self.running.get(id).await?)
    }

    /// Queued jobs of one course. Eventually consistent; no lock is held.
    pub async fn get_queued_jobs_for_course(&self, course: &CourseId) -> CoreResult<Vec<JobDescriptor>> {
        Ok(self
            .queue
            .snapshot()
            .await?
            .into_iter()
            .filter(|e| &e.job.course == course)
            .map(|e| e.job)
            .collect())
    }

    /// Running jobs of one course. Eventually consistent; no lock is held.
    pub async fn get_processing_jobs_for_course(&self, course: &CourseId) -> CoreResult<Vec<RunningJob>> {
        Ok(self
            .running
            .values()
            .await?
            .into_iter()
            .filter(|r| &r.job.course == course)
            .collect())
    }

    /// Ask `agent` to stop claiming.
    pub async fn pause_agent(&self, agent: &AgentId) -> CoreResult<()> {
        self.pause.publish(agent).await?;
        info!(agent = %agent, "pause requested");
        Ok(())
    }

    pub async fn resume_agent(&self, agent: &AgentId) -> CoreResult<()> {
        self.resume.publish(agent).await?;
        info!(agent = %agent, "resume requested");
        Ok(())
    }

    /// Publish a registry event. Dashboards recover on the next change, so a
    /// failed publish is only logged.
    async fn publish(&self, event: RegistryEvent) {
        if let Err(e) = self.events.publish(&event).await {
            warn!(error = %e, "failed to publish registry event");
        }
    }

    /// Announce a terminal state and remember it in the agent's history.
    async fn record_terminal(&self, finished: FinishedJob) {
        if let Some(agent) = &finished.agent {
            if let Err(e) = self.history.record(agent, &finished).await {
                warn!(agent = %agent, job = %finished.job.id, error = %e, "failed to record job history");
            }
        }
        self.publish(RegistryEvent::Finished(Box::new(finished))).await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use lci_grid::LocalProvider;
    use lci_model::ResourceRequirements;

    use super::*;

    pub(crate) fn job(course: &str) -> JobDescriptor {
        JobDescriptor::new(course, ResourceRequirements::script("alpine", vec!["true".into()]))
    }

    pub(crate) fn queue_on(grid: &LocalProvider) -> BuildJobQueue {
        BuildJobQueue::new(grid, QueueConfig::default())
    }

    #[tokio::test]
    async fn enqueue_orders_by_priority_and_filters_by_course() {
        let grid = LocalProvider::default();
        let q = queue_on(&grid);

        let low = job("c1").with_priority(5);
        let urgent = job("c2").with_priority(1);
        let mid = job("c1").with_priority(3);
        for j in [&low, &urgent, &mid] {
            q.enqueue(j.clone()).await.unwrap();
        }

        let order: Vec<_> = q.queued_jobs().await.unwrap().into_iter().map(|e| e.job.id).collect();
        assert_eq!(order, vec![urgent.id.clone(), mid.id.clone(), low.id.clone()]);

        let c1 = q.get_queued_jobs_for_course(&CourseId::from("c1")).await.unwrap();
        assert_eq!(c1.iter().map(|j| &j.id).collect::<Vec<_>>(), vec![&mid.id, &low.id]);
        assert!(q.get_queued_jobs_for_course(&CourseId::from("none")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn enqueue_publishes_queue_changed() {
        let grid = LocalProvider::default();
        let q = queue_on(&grid);
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            q.events()
                .add_message_listener(move |ev| seen.lock().unwrap().push(ev))
                .await
                .unwrap();
        }
        q.enqueue(job("c")).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![RegistryEvent::QueueChanged]);
    }

    #[tokio::test]
    async fn pause_and_resume_publish_agent_id() {
        let grid = LocalProvider::default();
        let q = queue_on(&grid);
        let paused = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let paused = paused.clone();
            q.pause_topic()
                .add_message_listener(move |a| paused.lock().unwrap().push(a))
                .await
                .unwrap();
        }
        q.pause_agent(&AgentId::from("a1")).await.unwrap();
        q.resume_agent(&AgentId::from("a1")).await.unwrap();
        assert_eq!(*paused.lock().unwrap(), vec![AgentId::from("a1")]);
    }

    #[tokio::test]
    async fn inactive_grid_refuses_reads_and_writes() {
        let grid = LocalProvider::default();
        let q = queue_on(&grid);
        grid.shutdown();

        assert!(q.enqueue(job("c")).await.unwrap_err().is_grid_unavailable());
        assert!(
            q.get_processing_jobs_for_course(&CourseId::from("c"))
                .await
                .unwrap_err()
                .is_grid_unavailable()
        );
    }
}
