mod error;
pub use error::ExecError;

mod utils;
pub use utils::*;

mod config;
pub use config::AgentSettings;

mod limits;
pub use limits::{ContainerLimits, MaxLimits};

mod logs;
pub use logs::{LogBuffer, LogConfig};

mod pool;
pub use pool::{ExecutionPool, derived_pool_size};

pub mod sandbox;
pub use sandbox::{DockerSandbox, ProcessSandbox, Sandbox, SandboxKind, SandboxLaunch};

mod runner;
pub use runner::{JobRunner, RunOutcome};

mod agent;
pub use agent::BuildAgent;
