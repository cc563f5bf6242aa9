use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{AgentId, error::ModelError};

/// Scheduling state an agent reports about itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Active,
    Paused,
}

impl AgentStatus {
    pub fn as_label(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Active => "active",
            AgentStatus::Paused => "paused",
        }
    }

    /// Status derived from the occupied slots unless the agent is paused.
    pub fn derive(paused: bool, running_jobs: usize) -> Self {
        if paused {
            AgentStatus::Paused
        } else if running_jobs > 0 {
            AgentStatus::Active
        } else {
            AgentStatus::Idle
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

impl FromStr for AgentStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(AgentStatus::Idle),
            "active" => Ok(AgentStatus::Active),
            "paused" => Ok(AgentStatus::Paused),
            other => Err(ModelError::UnknownAgentStatus(other.to_string())),
        }
    }
}

/// Registry entry of one worker node.
///
/// Written only by the owning agent; read by every node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub id: AgentId,
    #[serde(default)]
    pub display_name: String,
    /// Member address of the node hosting the agent.
    #[serde(default)]
    pub address: String,
    pub max_concurrent_jobs: usize,
    #[serde(default)]
    pub running_jobs: usize,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub last_heartbeat: OffsetDateTime,
    /// OpenSSH style `SHA256:...` fingerprint of the agent's public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_fingerprint: Option<String>,
}

impl AgentInfo {
    pub fn new(id: AgentId, max_concurrent_jobs: usize) -> Self {
        Self {
            display_name: id.to_string(),
            id,
            address: String::new(),
            max_concurrent_jobs,
            running_jobs: 0,
            status: AgentStatus::Idle,
            last_heartbeat: OffsetDateTime::now_utc(),
            public_key_fingerprint: None,
        }
    }

    pub fn free_slots(&self) -> usize {
        self.max_concurrent_jobs.saturating_sub(self.running_jobs)
    }

    /// True when the last heartbeat is older than `timeout` at `now`.
    pub fn is_stale(&self, now: OffsetDateTime, timeout: std::time::Duration) -> bool {
        now - self.last_heartbeat > timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn derive_status() {
        assert_eq!(AgentStatus::derive(false, 0), AgentStatus::Idle);
        assert_eq!(AgentStatus::derive(false, 2), AgentStatus::Active);
        assert_eq!(AgentStatus::derive(true, 2), AgentStatus::Paused);
    }

    #[test]
    fn staleness_is_strictly_after_timeout() {
        let mut info = AgentInfo::new(AgentId::from("a"), 2);
        let now = OffsetDateTime::now_utc();
        info.last_heartbeat = now - Duration::from_secs(60);

        assert!(!info.is_stale(now, Duration::from_secs(60)));
        assert!(info.is_stale(now, Duration::from_secs(59)));
    }

    #[test]
    fn free_slots_saturates() {
        let mut info = AgentInfo::new(AgentId::from("a"), 1);
        info.running_jobs = 3;
        assert_eq!(info.free_slots(), 0);
    }
}
