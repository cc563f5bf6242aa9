mod domain;
pub use domain::{
    AGENT_INFO_MAP, BUILD_JOB_QUEUE, PAUSE_AGENT_TOPIC, RECENT_JOBS_MAP, REGISTRY_EVENTS_TOPIC,
    RESUME_AGENT_TOPIC, RUNNING_JOBS_MAP,
};
pub use domain::{AgentId, CourseId, Env, EnvVar, JobId};

mod error;
pub use error::{ModelError, ModelResult};

mod job;
pub use job::{
    BuildLogEntry, FinishedJob, JobDescriptor, JobFailure, JobStatus, LogStream, QueueEntry,
    ResourceRequirements, RunningJob,
};

mod agent;
pub use agent::{AgentInfo, AgentStatus};

mod event;
pub use event::RegistryEvent;
