use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{AgentId, JobDescriptor};

/// A job waiting in the distributed queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub job: JobDescriptor,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
    #[serde(default)]
    pub estimated_duration_secs: u64,
}

impl QueueEntry {
    pub fn new(job: JobDescriptor) -> Self {
        Self {
            job,
            enqueued_at: OffsetDateTime::now_utc(),
            estimated_duration_secs: 0,
        }
    }

    pub fn with_estimate(mut self, secs: u64) -> Self {
        self.estimated_duration_secs = secs;
        self
    }
}

/// A job bound to the agent executing it.
///
/// Only the owning agent acts on `cancelled`; any node may set it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningJob {
    pub job: JobDescriptor,
    pub agent: AgentId,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(default)]
    pub cancelled: bool,
}

impl RunningJob {
    pub fn new(job: JobDescriptor, agent: AgentId) -> Self {
        Self {
            job,
            agent,
            started_at: OffsetDateTime::now_utc(),
            cancelled: false,
        }
    }

    pub fn is_owned_by(&self, agent: &AgentId) -> bool {
        &self.agent == agent
    }
}
