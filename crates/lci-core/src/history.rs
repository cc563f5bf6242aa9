use std::sync::Arc;

use lci_grid::{CacheEntry, CacheFactory, CacheHandler, DataProviderExt, DistributedDataProvider};
use lci_model::{AgentId, FinishedJob, RECENT_JOBS_MAP};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::CoreResult;

/// Newest-first list of an agent's finished jobs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecentJobList(pub Vec<FinishedJob>);

impl CacheEntry for RecentJobList {
    fn release(&mut self) {
        self.0.clear();
    }
}

struct EmptyHistory;

impl CacheFactory<AgentId, RecentJobList> for EmptyHistory {
    fn create_for(&self, _: &AgentId) -> RecentJobList {
        RecentJobList::default()
    }

    fn empty_value_for(&self, _: &AgentId) -> RecentJobList {
        RecentJobList::default()
    }
}

/// Bounded per-agent history of finished jobs.
///
/// Stored entries carry no log lines; logs only travel with the finish event.
#[derive(Clone)]
pub struct RecentJobs {
    cache: Arc<CacheHandler<AgentId, RecentJobList, EmptyHistory>>,
    capacity: usize,
}

impl RecentJobs {
    pub fn new(provider: &dyn DistributedDataProvider, capacity: usize) -> Self {
        Self {
            cache: Arc::new(CacheHandler::new(
                provider.map(RECENT_JOBS_MAP),
                EmptyHistory,
            )),
            capacity,
        }
    }

    pub async fn record(&self, agent: &AgentId, job: &FinishedJob) -> CoreResult<()> {
        let mut entry = job.clone();
        entry.dropped_log_lines += entry.logs.len() as u64;
        entry.logs.clear();

        let capacity = self.capacity;
        self.cache
            .perform_cache_write(agent, move |mut list| {
                list.0.insert(0, entry);
                list.0.truncate(capacity);
                list
            })
            .await?;
        trace!(agent = %agent, job = %job.job.id, "recorded finished job");
        Ok(())
    }

    pub async fn for_agent(&self, agent: &AgentId) -> CoreResult<Vec<FinishedJob>> {
        Ok(self.cache.get_read_cache_for(agent).await?.0)
    }

    pub async fn forget(&self, agent: &AgentId) -> CoreResult<()> {
        self.cache.remove_and_clear(agent).await?;
        Ok(())
    }
}
