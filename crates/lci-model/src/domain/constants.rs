//! Names of the cluster-wide structures shared by every node.
//!
//! All nodes must agree on these names: a node that used a different queue name
//! would silently form its own private queue.

/// Distributed queue holding [`crate::QueueEntry`] items waiting for an agent.
pub const BUILD_JOB_QUEUE: &str = "build-job-queue";

/// Distributed map `JobId -> RunningJob` of jobs currently executing somewhere.
pub const RUNNING_JOBS_MAP: &str = "running-jobs";

/// Distributed map `AgentId -> AgentInfo` of live agents.
pub const AGENT_INFO_MAP: &str = "build-agents";

/// Distributed map `AgentId -> recent finished jobs` backing the per-agent history cache.
pub const RECENT_JOBS_MAP: &str = "recent-jobs";

/// Topic carrying [`crate::RegistryEvent`] updates for dashboards.
pub const REGISTRY_EVENTS_TOPIC: &str = "registry-events";

/// Topic carrying the id of an agent that should pause.
pub const PAUSE_AGENT_TOPIC: &str = "pause-agent";

/// Topic carrying the id of an agent that should resume.
pub const RESUME_AGENT_TOPIC: &str = "resume-agent";
