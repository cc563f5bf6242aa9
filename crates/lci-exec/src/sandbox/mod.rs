//! Isolated execution of one job script.
//!
//! A [`Sandbox`] turns a [`SandboxLaunch`] into a ready-to-spawn command and
//! knows how to tear the sandbox down. Spawning, output capture and waiting
//! are done by the job runner.
mod docker;
pub use docker::DockerSandbox;

mod process;
pub use process::ProcessSandbox;

use async_trait::async_trait;
use lci_model::{Env, JobDescriptor};
use serde::Deserialize;
use tokio::process::{Child, Command};

use crate::{ContainerLimits, ExecError};

/// Which sandbox implementation a node uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxKind {
    #[default]
    Docker,
    Process,
}

/// Everything needed to start one job.
#[derive(Clone, Debug)]
pub struct SandboxLaunch {
    /// Unique per run; used as container / cgroup name.
    pub name: String,
    pub image: String,
    pub script: String,
    pub env: Env,
    pub network_disabled: bool,
    pub limits: ContainerLimits,
}

impl SandboxLaunch {
    pub fn for_job(name: impl Into<String>, job: &JobDescriptor, limits: ContainerLimits) -> Self {
        Self {
            name: name.into(),
            image: job.resources.image.clone(),
            script: job.resources.joined_script(),
            env: job.resources.env.clone(),
            network_disabled: job.resources.network_disabled,
            limits,
        }
    }
}

#[async_trait]
pub trait Sandbox: Send + Sync + 'static {
    /// Metrics label, e.g. `"docker"`.
    fn kind(&self) -> &'static str;

    /// Command that runs the script; stdout and stderr are piped by the caller.
    fn command(&self, launch: &SandboxLaunch) -> Result<Command, ExecError>;

    /// Forcibly stop a running sandbox.
    async fn kill(&self, launch: &SandboxLaunch, child: &mut Child) -> Result<(), ExecError>;

    /// Release leftovers once the sandbox process exited.
    async fn cleanup(&self, _launch: &SandboxLaunch) {}

    /// Exit codes that mean the sandbox never started the script.
    fn is_launch_failure(&self, _exit_code: i32) -> bool {
        false
    }
}
