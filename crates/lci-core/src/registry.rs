//! Cluster-wide registry of build agents.
//!
//! Each agent owns its [`AgentInfo`] entry and refreshes it on every
//! heartbeat. Other nodes only read it, except the liveness sweep which
//! evicts entries of dead agents.
use lci_grid::{DataProviderExt, DistributedDataProvider, DistributedMap, DistributedTopic};
use lci_model::{AGENT_INFO_MAP, AgentId, AgentInfo, FinishedJob, REGISTRY_EVENTS_TOPIC, RegistryEvent};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    error::{CoreError, CoreResult},
    history::RecentJobs,
};

/// Agent entry together with its recent history, as shown to administrators.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentView {
    #[serde(flatten)]
    pub info: AgentInfo,
    pub recent_jobs: Vec<FinishedJob>,
}

#[derive(Clone)]
pub struct AgentRegistry {
    agents: DistributedMap<AgentId, AgentInfo>,
    events: DistributedTopic<RegistryEvent>,
    history: RecentJobs,
}

impl AgentRegistry {
    pub fn new(provider: &dyn DistributedDataProvider, history: RecentJobs) -> Self {
        Self {
            agents: provider.map(AGENT_INFO_MAP),
            events: provider.topic(REGISTRY_EVENTS_TOPIC),
            history,
        }
    }

    /// Raw map handle, for entry listeners.
    #[inline]
    pub fn agents(&self) -> &DistributedMap<AgentId, AgentInfo> {
        &self.agents
    }

    /// Create or replace the entry of `info.id`.
    pub async fn register(&self, info: &AgentInfo) -> CoreResult<()> {
        let guard = self.agents.lock(&info.id).await?;
        let put = self.agents.put(info.id.clone(), info).await;
        guard.unlock().await?;
        put?;
        info!(agent = %info.id, max = info.max_concurrent_jobs, "agent registered");
        self.publish().await;
        Ok(())
    }

    /// Refresh the heartbeat of `info.id` with its current slot count and status.
    ///
    /// An agent evicted while still alive (missed heartbeats under load)
    /// registers itself again.
    pub async fn heartbeat(&self, info: &AgentInfo) -> CoreResult<()> {
        let mut fresh = info.clone();
        fresh.last_heartbeat = OffsetDateTime::now_utc();

        let guard = self.agents.lock(&fresh.id).await?;
        let previous = self.agents.put(fresh.id.clone(), &fresh).await;
        guard.unlock().await?;

        match previous? {
            None => {
                warn!(agent = %fresh.id, "heartbeat from unregistered agent; registering again");
                self.publish().await;
            }
            Some(old) if old.status != fresh.status || old.running_jobs != fresh.running_jobs => {
                debug!(agent = %fresh.id, status = %fresh.status, running = fresh.running_jobs, "agent state changed");
                self.publish().await;
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Remove the agent on clean shutdown, including its history.
    pub async fn deregister(&self, agent: &AgentId) -> CoreResult<()> {
        if self.evict(agent).await?.is_some() {
            info!(agent = %agent, "agent deregistered");
        }
        self.history.forget(agent).await?;
        Ok(())
    }

    /// Drop the entry of `agent`, returning it. History is kept for inspection.
    pub async fn evict(&self, agent: &AgentId) -> CoreResult<Option<AgentInfo>> {
        let guard = self.agents.lock(agent).await?;
        let removed = self.agents.remove(agent).await;
        guard.unlock().await?;
        let removed = removed?;
        if removed.is_some() {
            self.publish().await;
        }
        Ok(removed)
    }

    pub async fn get(&self, agent: &AgentId) -> CoreResult<AgentInfo> {
        self.agents
            .get(agent)
            .await?
            .ok_or_else(|| CoreError::UnknownAgent(agent.clone()))
    }

    pub async fn contains(&self, agent: &AgentId) -> CoreResult<bool> {
        Ok(self.agents.contains_key(agent).await?)
    }

    /// Snapshot of all agents, ordered by id.
    pub async fn list(&self) -> CoreResult<Vec<AgentInfo>> {
        Ok(self.agents.local_copy().await?.into_values().collect())
    }

    pub async fn recent_jobs(&self, agent: &AgentId) -> CoreResult<Vec<FinishedJob>> {
        self.history.for_agent(agent).await
    }

    /// Agents with their recent jobs.
    pub async fn views(&self) -> CoreResult<Vec<AgentView>> {
        let mut views = Vec::new();
        for info in self.list().await? {
            let recent_jobs = self.history.for_agent(&info.id).await?;
            views.push(AgentView { info, recent_jobs });
        }
        Ok(views)
    }

    async fn publish(&self) {
        if let Err(e) = self.events.publish(&RegistryEvent::AgentsChanged).await {
            warn!(error = %e, "failed to publish agent change");
        }
    }
}
