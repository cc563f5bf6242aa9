use std::collections::BTreeSet;

use lci_model::{AgentId, JobId};
use serde::Serialize;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::LivenessConfig, error::CoreResult, queue::BuildJobQueue, registry::AgentRegistry,
};

/// Outcome of one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub evicted: Vec<AgentId>,
    pub requeued: Vec<JobId>,
    pub failed: Vec<JobId>,
}

/// Evicts agents whose heartbeat went stale and hands their jobs back.
///
/// Every node may run a sweeper; requeue re-checks ownership under the job
/// lock, so concurrent sweeps of the same agent are harmless.
#[derive(Clone)]
pub struct LivenessSweeper {
    queue: BuildJobQueue,
    registry: AgentRegistry,
    config: LivenessConfig,
}

impl LivenessSweeper {
    pub fn new(queue: BuildJobQueue, registry: AgentRegistry, config: LivenessConfig) -> Self {
        Self {
            queue,
            registry,
            config,
        }
    }

    pub async fn sweep(&self) -> CoreResult<SweepReport> {
        self.sweep_at(OffsetDateTime::now_utc()).await
    }

    /// Sweep as if the clock read `now`.
    pub async fn sweep_at(&self, now: OffsetDateTime) -> CoreResult<SweepReport> {
        let timeout = self.config.timeout();
        let mut report = SweepReport::default();

        for agent in self.registry.list().await? {
            if !agent.is_stale(now, timeout) {
                continue;
            }
            warn!(
                agent = %agent.id,
                last_heartbeat = %agent.last_heartbeat,
                "agent missed its heartbeat deadline"
            );
            let handed_back = self.queue.requeue_on_agent_loss(&agent.id).await?;
            // Keep the entry while some jobs could not be handed back; the next sweep retries.
            if handed_back.errors == 0 {
                self.registry.evict(&agent.id).await?;
                report.evicted.push(agent.id);
            }
            report.requeued.extend(handed_back.requeued);
            report.failed.extend(handed_back.failed);
        }

        for agent in self.orphan_owners().await? {
            info!(agent = %agent, "running jobs owned by an unregistered agent");
            let handed_back = self.queue.requeue_on_agent_loss(&agent).await?;
            report.requeued.extend(handed_back.requeued);
            report.failed.extend(handed_back.failed);
        }

        if report != SweepReport::default() {
            info!(
                evicted = report.evicted.len(),
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                "liveness sweep"
            );
        }
        Ok(report)
    }

    /// Owners of running jobs that have no registry entry.
    async fn orphan_owners(&self) -> CoreResult<BTreeSet<AgentId>> {
        let owners: BTreeSet<AgentId> = self
            .queue
            .running_jobs()
            .await?
            .into_iter()
            .map(|r| r.agent)
            .collect();
        let mut orphans = BTreeSet::new();
        for agent in owners {
            if !self.registry.contains(&agent).await? {
                orphans.insert(agent);
            }
        }
        Ok(orphans)
    }

    /// Sweep every `sweep_interval` until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.config.sweep_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(timeout_ms = self.config.timeout_ms, "liveness sweeper started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    match self.sweep().await {
                        Ok(_) => {}
                        Err(e) if e.is_grid_unavailable() => debug!(error = %e, "grid unavailable; sweep skipped"),
                        Err(e) => warn!(error = %e, "liveness sweep failed"),
                    }
                }
            }
        }
        info!("liveness sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lci_grid::LocalProvider;
    use lci_model::AgentInfo;

    use super::*;
    use crate::queue::tests::{job, queue_on};

    fn sweeper(grid: &LocalProvider) -> (LivenessSweeper, BuildJobQueue, AgentRegistry) {
        let queue = queue_on(grid);
        let registry = AgentRegistry::new(grid, queue.history().clone());
        let sweeper = LivenessSweeper::new(
            queue.clone(),
            registry.clone(),
            LivenessConfig {
                timeout_ms: 1_000,
                sweep_interval_ms: 100,
            },
        );
        (sweeper, queue, registry)
    }

    #[tokio::test]
    async fn silent_agent_jobs_return_to_head_after_timeout() {
        let grid = LocalProvider::default();
        let (sweeper, queue, registry) = sweeper(&grid);

        let a = AgentInfo::new(AgentId::from("a"), 1);
        registry.register(&a).await.unwrap();
        let j = job("c");
        queue.enqueue(j.clone()).await.unwrap();
        queue.claim_next(&a.id, 1).await.unwrap();
        queue.enqueue(job("c")).await.unwrap();

        let before = sweeper.sweep_at(a.last_heartbeat + Duration::from_millis(500)).await.unwrap();
        assert_eq!(before, SweepReport::default());

        let after = sweeper.sweep_at(a.last_heartbeat + Duration::from_secs(2)).await.unwrap();
        assert_eq!(after.evicted, vec![a.id.clone()]);
        assert_eq!(after.requeued, vec![j.id.clone()]);

        assert!(queue.running_job(&j.id).await.unwrap().is_none());
        let head = &queue.queued_jobs().await.unwrap()[0];
        assert_eq!(head.job.id, j.id);
        assert_eq!(head.job.retry_count, 1);
        assert!(!registry.contains(&a.id).await.unwrap());
    }

    #[tokio::test]
    async fn jobs_of_unregistered_agents_are_requeued() {
        let grid = LocalProvider::default();
        let (sweeper, queue, _registry) = sweeper(&grid);
        let j = job("c");
        queue.enqueue(j.clone()).await.unwrap();
        queue.claim_next(&AgentId::from("ghost"), 1).await.unwrap();

        let report = sweeper.sweep().await.unwrap();
        assert!(report.evicted.is_empty());
        assert_eq!(report.requeued, vec![j.id]);
        assert!(queue.running_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn live_agents_are_untouched() {
        let grid = LocalProvider::default();
        let (sweeper, queue, registry) = sweeper(&grid);
        let a = AgentInfo::new(AgentId::from("a"), 1);
        registry.register(&a).await.unwrap();
        queue.enqueue(job("c")).await.unwrap();
        queue.claim_next(&a.id, 1).await.unwrap();

        assert_eq!(sweeper.sweep().await.unwrap(), SweepReport::default());
        assert_eq!(queue.running_jobs().await.unwrap().len(), 1);
    }
}
