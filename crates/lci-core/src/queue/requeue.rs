use lci_model::{AgentId, FinishedJob, JobFailure, JobId, JobStatus, QueueEntry, RegistryEvent, RunningJob};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::{BuildJobQueue, QUEUE_SOURCE};
use crate::{error::CoreResult, metrics::RequeueReason};

/// What happened to one job handed back to the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// Back at the head of the queue with this retry count.
    Requeued { retry_count: u32 },
    /// Retry budget exhausted; recorded as failed.
    Failed,
}

/// Summary of [`BuildJobQueue::requeue_on_agent_loss`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequeueReport {
    pub requeued: Vec<JobId>,
    pub failed: Vec<JobId>,
    /// Jobs that could not be processed this round; a later sweep retries them.
    pub errors: usize,
}

impl RequeueReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty() && self.errors == 0
    }

    pub(crate) fn merge(&mut self, other: RequeueReport) {
        self.requeued.extend(other.requeued);
        self.failed.extend(other.failed);
        self.errors += other.errors;
    }
}

impl BuildJobQueue {
    /// Hand every job of a dead agent back to the queue head.
    ///
    /// Each job's retry count is incremented; jobs past the retry limit are
    /// recorded as failed instead. Failures of single jobs do not stop the rest.
    #[instrument(level = "info", skip(self, agent), fields(agent = %agent))]
    pub async fn requeue_on_agent_loss(&self, agent: &AgentId) -> CoreResult<RequeueReport> {
        self.requeue_all_owned(agent, RequeueReason::AgentLost).await
    }

    /// Like [`BuildJobQueue::requeue_on_agent_loss`], for an agent paused past its grace period.
    #[instrument(level = "info", skip(self, agent), fields(agent = %agent))]
    pub async fn requeue_paused(&self, agent: &AgentId) -> CoreResult<RequeueReport> {
        self.requeue_all_owned(agent, RequeueReason::Paused).await
    }

    /// Give back a claimed job the local pool rejected.
    ///
    /// The job returns to the head with its retry count unchanged. `None` when
    /// the job is no longer owned by the claimant.
    pub async fn release_claim(&self, running: &RunningJob) -> CoreResult<Option<RequeueOutcome>> {
        self.metrics.record_claim_rejected();
        self.requeue_owned(&running.job.id, &running.agent, RequeueReason::Rejected)
            .await
    }

    async fn requeue_all_owned(&self, agent: &AgentId, reason: RequeueReason) -> CoreResult<RequeueReport> {
        let owned: Vec<JobId> = self
            .running
            .values()
            .await?
            .into_iter()
            .filter(|r| r.is_owned_by(agent))
            .map(|r| r.job.id)
            .collect();

        let mut report = RequeueReport::default();
        for id in owned {
            match self.requeue_owned(&id, agent, reason).await {
                Ok(Some(RequeueOutcome::Requeued { .. })) => report.requeued.push(id),
                Ok(Some(RequeueOutcome::Failed)) => report.failed.push(id),
                Ok(None) => {}
                Err(e) => {
                    warn!(job = %id, error = %e, "requeue failed");
                    report.errors += 1;
                }
            }
        }
        if !report.is_empty() {
            info!(
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                errors = report.errors,
                reason = reason.as_label(),
                "jobs handed back"
            );
            self.publish(RegistryEvent::QueueChanged).await;
        }
        Ok(report)
    }

    /// Requeue one job if `agent` still owns it. Holds the job lock throughout.
    async fn requeue_owned(
        &self,
        id: &JobId,
        agent: &AgentId,
        reason: RequeueReason,
    ) -> CoreResult<Option<RequeueOutcome>> {
        let guard = self.running.lock(id).await?;
        let outcome = self.requeue_locked(id, agent, reason).await;
        guard.unlock().await?;

        let Some((outcome, finished)) = outcome? else {
            return Ok(None);
        };
        match outcome {
            RequeueOutcome::Requeued { retry_count } => {
                self.metrics.record_requeue(reason);
                self.publish(RegistryEvent::Requeued {
                    job: id.clone(),
                    retry_count,
                })
                .await;
            }
            RequeueOutcome::Failed => {
                self.metrics
                    .record_job_finished(QUEUE_SOURCE, JobStatus::Failed, 0);
                if let Some(finished) = finished {
                    self.record_terminal(finished).await;
                }
            }
        }
        Ok(Some(outcome))
    }

    async fn requeue_locked(
        &self,
        id: &JobId,
        agent: &AgentId,
        reason: RequeueReason,
    ) -> CoreResult<Option<(RequeueOutcome, Option<FinishedJob>)>> {
        let Some(current) = self.running.get(id).await? else {
            return Ok(None);
        };
        if !current.is_owned_by(agent) {
            return Ok(None);
        }

        // A pool rejection is not a failed attempt.
        let next = match reason {
            RequeueReason::Rejected => current.job.clone(),
            _ => current.job.retried(),
        };
        self.running.remove(id).await?;

        if next.retry_count > self.config.max_retries {
            warn!(job = %id, retries = current.job.retry_count, reason = reason.as_label(), "retry limit reached; failing job");
            let failed = FinishedJob::failed(
                next,
                JobFailure::MaxRetriesExceeded {
                    retries: current.job.retry_count,
                },
            )
            .on_agent(current.agent.clone(), current.started_at);
            return Ok(Some((RequeueOutcome::Failed, Some(failed))));
        }

        let retry_count = next.retry_count;
        if let Err(e) = self.queue.add_first(&QueueEntry::new(next)).await {
            // Keep the job visible as running so the next sweep retries it.
            if let Err(restore) = self.running.put(id.clone(), &current).await {
                warn!(job = %id, error = %restore, "job lost: neither queued nor running");
            }
            return Err(e.into());
        }
        Ok(Some((RequeueOutcome::Requeued { retry_count }, None)))
    }
}

#[cfg(test)]
mod tests {
    use lci_grid::LocalProvider;

    use super::*;
    use crate::{
        config::QueueConfig,
        queue::tests::{job, queue_on},
    };

    #[tokio::test]
    async fn lost_agent_jobs_return_to_head_with_incremented_retry() {
        let grid = LocalProvider::default();
        let q = queue_on(&grid);
        let j = job("c");
        q.enqueue(j.clone()).await.unwrap();
        let dead = AgentId::from("dead");
        q.claim_next(&dead, 1).await.unwrap();

        let later = job("c");
        q.enqueue(later.clone()).await.unwrap();

        let report = q.requeue_on_agent_loss(&dead).await.unwrap();
        assert_eq!(report.requeued, vec![j.id.clone()]);
        assert!(q.running_job(&j.id).await.unwrap().is_none());

        let queued = q.queued_jobs().await.unwrap();
        assert_eq!(queued[0].job.id, j.id);
        assert_eq!(queued[0].job.retry_count, 1);
        assert_eq!(queued[1].job.id, later.id);
    }

    #[tokio::test]
    async fn requeue_leaves_other_agents_alone() {
        let grid = LocalProvider::default();
        let q = queue_on(&grid);
        q.enqueue(job("c")).await.unwrap();
        q.claim_next(&AgentId::from("alive"), 1).await.unwrap();

        let report = q.requeue_on_agent_loss(&AgentId::from("dead")).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(q.running_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retry_limit_moves_job_to_failed_instead_of_queue() {
        let grid = LocalProvider::default();
        let q = BuildJobQueue::new(
            &grid,
            QueueConfig {
                max_retries: 2,
                ..QueueConfig::default()
            },
        );
        let j = job("c");
        q.enqueue(j.clone()).await.unwrap();
        let agent = AgentId::from("flaky");

        for expected in 1..=2 {
            q.claim_next(&agent, 1).await.unwrap();
            let report = q.requeue_on_agent_loss(&agent).await.unwrap();
            assert_eq!(report.requeued, vec![j.id.clone()]);
            assert_eq!(q.queued_jobs().await.unwrap()[0].job.retry_count, expected);
        }

        q.claim_next(&agent, 1).await.unwrap();
        let report = q.requeue_on_agent_loss(&agent).await.unwrap();
        assert_eq!(report.failed, vec![j.id.clone()]);
        assert!(q.queued_jobs().await.unwrap().is_empty());
        assert!(q.running_jobs().await.unwrap().is_empty());

        let history = q.history().for_agent(&agent).await.unwrap();
        assert_eq!(history[0].status, JobStatus::Failed);
        assert_eq!(
            history[0].failure,
            Some(JobFailure::MaxRetriesExceeded { retries: 2 })
        );
    }

    #[tokio::test]
    async fn released_claim_goes_back_to_head() {
        let grid = LocalProvider::default();
        let q = queue_on(&grid);
        q.enqueue(job("c")).await.unwrap();
        let agent = AgentId::from("busy");
        let claimed = q.claim_next(&agent, 1).await.unwrap().remove(0);

        let outcome = q.release_claim(&claimed).await.unwrap();
        assert_eq!(outcome, Some(RequeueOutcome::Requeued { retry_count: 0 }));
        assert!(q.running_jobs().await.unwrap().is_empty());

        // Released twice: no longer owned, nothing happens.
        assert_eq!(q.release_claim(&claimed).await.unwrap(), None);
        assert_eq!(q.queued_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_rejections_never_exhaust_retries() {
        let grid = LocalProvider::default();
        let q = BuildJobQueue::new(
            &grid,
            QueueConfig {
                max_retries: 1,
                ..QueueConfig::default()
            },
        );
        let j = job("c");
        q.enqueue(j.clone()).await.unwrap();
        let agent = AgentId::from("full");

        for _ in 0..5 {
            let claimed = q.claim_next(&agent, 1).await.unwrap().remove(0);
            assert_eq!(
                q.release_claim(&claimed).await.unwrap(),
                Some(RequeueOutcome::Requeued { retry_count: 0 })
            );
        }
        let queued = q.queued_jobs().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].job.id, j.id);
        assert_eq!(queued[0].job.retry_count, 0);
    }
}
