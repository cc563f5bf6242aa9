use lci_model::{CourseId, FinishedJob, JobDescriptor, JobId, JobStatus, QueueEntry, RegistryEvent};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::{BuildJobQueue, QUEUE_SOURCE};
use crate::error::CoreResult;

/// How a cancel request was applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CancelOutcome {
    /// The running entry is flagged; its agent stops the sandbox.
    Flagged,
    /// The job was still queued and has been removed.
    Dequeued,
    /// Nothing to cancel (already finished, cancelled or never existed).
    NotFound,
}

enum Cancelled {
    Flagged,
    Dequeued(JobDescriptor),
    NotFound,
}

impl BuildJobQueue {
    /// Cancel one job wherever it is. Idempotent.
    ///
    /// Runs under the job's key lock, the same lock a claim holds while moving
    /// the job from the queue to the running map.
    pub async fn cancel_build_job(&self, id: &JobId) -> CoreResult<CancelOutcome> {
        self.cancel_scoped(id, None).await
    }

    /// Like [`BuildJobQueue::cancel_build_job`], but a job of another course
    /// is left alone and reported as [`CancelOutcome::NotFound`].
    pub async fn cancel_course_build_job(&self, course: &CourseId, id: &JobId) -> CoreResult<CancelOutcome> {
        self.cancel_scoped(id, Some(course)).await
    }

    #[instrument(level = "debug", skip(self, id, course), fields(job = %id))]
    async fn cancel_scoped(&self, id: &JobId, course: Option<&CourseId>) -> CoreResult<CancelOutcome> {
        let guard = self.running.lock(id).await?;
        let outcome = self.cancel_locked(id, course).await;
        guard.unlock().await?;

        match outcome? {
            Cancelled::Flagged => Ok(CancelOutcome::Flagged),
            Cancelled::Dequeued(job) => {
                info!("queued job cancelled");
                self.metrics
                    .record_job_finished(QUEUE_SOURCE, JobStatus::Cancelled, 0);
                self.publish(RegistryEvent::QueueChanged).await;
                self.record_terminal(FinishedJob::cancelled(job)).await;
                Ok(CancelOutcome::Dequeued)
            }
            Cancelled::NotFound => {
                debug!("nothing to cancel");
                Ok(CancelOutcome::NotFound)
            }
        }
    }

    async fn cancel_locked(&self, id: &JobId, course: Option<&CourseId>) -> CoreResult<Cancelled> {
        let in_course = |c: &CourseId| course.is_none_or(|wanted| wanted == c);

        if let Some(mut running) = self.running.get(id).await? {
            if !in_course(&running.job.course) {
                return Ok(Cancelled::NotFound);
            }
            if !running.cancelled {
                running.cancelled = true;
                self.running.put(id.clone(), &running).await?;
                info!(agent = %running.agent, "running job flagged for cancellation");
            }
            return Ok(Cancelled::Flagged);
        }

        let matching: Vec<QueueEntry> = self
            .queue
            .snapshot()
            .await?
            .into_iter()
            .filter(|e| &e.job.id == id && in_course(&e.job.course))
            .collect();
        let Some(entry) = matching.first() else {
            return Ok(Cancelled::NotFound);
        };
        if self.queue.remove_all(&matching).await? == 0 {
            return Ok(Cancelled::NotFound);
        }
        Ok(Cancelled::Dequeued(entry.job.clone()))
    }

    /// Cancel every queued job of `course`; returns how many were removed.
    pub async fn cancel_all_queued_build_jobs_for_course(&self, course: &CourseId) -> CoreResult<usize> {
        let ids: Vec<JobId> = self
            .get_queued_jobs_for_course(course)
            .await?
            .into_iter()
            .map(|j| j.id)
            .collect();
        Ok(self.cancel_each(ids, course).await)
    }

    /// Flag every running job of `course`; returns how many were flagged.
    pub async fn cancel_all_running_build_jobs_for_course(&self, course: &CourseId) -> CoreResult<usize> {
        let ids: Vec<JobId> = self
            .get_processing_jobs_for_course(course)
            .await?
            .into_iter()
            .map(|r| r.job.id)
            .collect();
        Ok(self.cancel_each(ids, course).await)
    }

    async fn cancel_each(&self, ids: Vec<JobId>, course: &CourseId) -> usize {
        let mut cancelled = 0;
        for id in ids {
            match self.cancel_course_build_job(course, &id).await {
                Ok(CancelOutcome::NotFound) => {}
                Ok(_) => cancelled += 1,
                Err(e) => warn!(job = %id, course = %course, error = %e, "cancel failed"),
            }
        }
        cancelled
    }
}
