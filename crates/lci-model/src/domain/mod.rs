mod ids;
pub use ids::{AgentId, CourseId, JobId};

mod env;
pub use env::{Env, EnvVar};

mod constants;
pub use constants::{
    AGENT_INFO_MAP, BUILD_JOB_QUEUE, PAUSE_AGENT_TOPIC, RECENT_JOBS_MAP, REGISTRY_EVENTS_TOPIC,
    RESUME_AGENT_TOPIC, RUNNING_JOBS_MAP,
};
