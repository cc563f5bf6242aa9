use lci_grid::GridError;
use lci_model::{AgentId, FinishedJob, QueueEntry, RegistryEvent, RunningJob};
use tracing::{debug, instrument, trace, warn};

use super::BuildJobQueue;
use crate::error::CoreResult;

/// Result of binding the queue head to an agent.
enum Bind {
    Claimed(RunningJob),
    /// The head was taken or cancelled before its lock was acquired.
    Gone,
    /// Another agent already runs this job; the queued copy is dropped.
    Duplicate,
}

impl BuildJobQueue {
    /// Take up to `free_slots` jobs from the head of the queue for `agent`.
    ///
    /// The head is locked by job id before it leaves the queue, so a job is
    /// never outside both the queue and the running map while unlocked. At
    /// most one running entry ever exists per job id. A losing claim is silent.
    #[instrument(level = "debug", skip(self, agent), fields(agent = %agent))]
    pub async fn claim_next(&self, agent: &AgentId, free_slots: usize) -> CoreResult<Vec<RunningJob>> {
        let mut claimed = Vec::new();
        for _ in 0..free_slots {
            let Some(head) = self.queue.peek().await? else {
                break;
            };
            match self.bind(head, agent).await {
                Ok(Some(Bind::Claimed(running))) => claimed.push(running),
                Ok(Some(Bind::Gone | Bind::Duplicate)) => {}
                // Contended head stays where it is; peeking again would spin on it.
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "claim aborted");
                    break;
                }
            }
        }

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "jobs claimed");
            for running in &claimed {
                self.publish(RegistryEvent::Claimed {
                    job: running.job.id.clone(),
                    agent: agent.clone(),
                })
                .await;
            }
            self.publish(RegistryEvent::QueueChanged).await;
        }
        Ok(claimed)
    }

    /// `Ok(None)` when the job lock was contended.
    async fn bind(&self, head: QueueEntry, agent: &AgentId) -> CoreResult<Option<Bind>> {
        let id = head.job.id.clone();
        let guard = match self.running.lock(&id).await {
            Ok(g) => g,
            Err(GridError::LockTimeout { .. }) => {
                debug!(job = %id, "job lock contended; leaving it queued");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let bound = self.bind_locked(head, agent).await;
        guard.unlock().await?;
        bound.map(Some)
    }

    async fn bind_locked(&self, head: QueueEntry, agent: &AgentId) -> CoreResult<Bind> {
        let id = head.job.id.clone();
        if self.queue.remove_all(std::slice::from_ref(&head)).await? == 0 {
            trace!(job = %id, "queue head taken before it was locked");
            return Ok(Bind::Gone);
        }
        if let Some(existing) = self.running.get(&id).await? {
            trace!(job = %id, owner = %existing.agent, "job already running elsewhere");
            return Ok(Bind::Duplicate);
        }
        let running = RunningJob::new(head.job.clone(), agent.clone());
        if let Err(e) = self.running.put(id, &running).await {
            self.restore(&head).await;
            return Err(e.into());
        }
        Ok(Bind::Claimed(running))
    }

    /// Best effort: put a dequeued entry back after a failed claim.
    async fn restore(&self, entry: &QueueEntry) {
        if let Err(e) = self.queue.add_first(entry).await {
            warn!(job = %entry.job.id, error = %e, "could not return polled job to the queue");
        }
    }

    /// Record the terminal state reported by the executing agent.
    ///
    /// Returns `false` when the report is stale: the running entry is gone or
    /// belongs to another agent (the job was requeued meanwhile). Stale reports
    /// are dropped.
    #[instrument(level = "debug", skip(self, finished), fields(job = %finished.job.id, status = %finished.status))]
    pub async fn finish_job(&self, finished: FinishedJob) -> CoreResult<bool> {
        let id = finished.job.id.clone();
        let guard = self.running.lock(&id).await?;
        let removed = self.remove_if_owned(&finished).await;
        guard.unlock().await?;

        if !removed? {
            debug!("dropping stale job result");
            return Ok(false);
        }
        self.record_terminal(finished).await;
        Ok(true)
    }

    async fn remove_if_owned(&self, finished: &FinishedJob) -> CoreResult<bool> {
        let Some(current) = self.running.get(&finished.job.id).await? else {
            return Ok(false);
        };
        if finished.agent.as_ref() != Some(&current.agent) {
            return Ok(false);
        }
        self.running.remove(&finished.job.id).await?;
        Ok(true)
    }
}
