pub mod admission;
pub mod config;
pub mod error;
pub mod history;
pub mod liveness;
pub mod metrics;
pub mod queue;
pub mod registry;

pub use admission::{AgentAdmission, Identity, StaticUserKeys, UserKeyStore, fingerprint_blob, fingerprint_openssh};
pub use config::{LivenessConfig, QueueConfig};
pub use error::{CoreError, CoreResult};
pub use history::RecentJobs;
pub use liveness::{LivenessSweeper, SweepReport};
pub use metrics::{MetricsBackend, MetricsHandle, NoOpMetrics, RequeueReason, noop_metrics};
pub use queue::{BuildJobQueue, CancelOutcome, RequeueOutcome, RequeueReport};
pub use registry::{AgentRegistry, AgentView};

pub mod prelude {
    pub use crate::error::CoreError;
    pub use crate::queue::BuildJobQueue;
    pub use crate::registry::AgentRegistry;
}
