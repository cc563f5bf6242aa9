use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::{Sandbox, SandboxLaunch};
use crate::ExecError;

/// `docker run` exits with 125 when the daemon could not create the container,
/// 126/127 when the entrypoint could not be invoked.
const DOCKER_LAUNCH_FAILURES: [i32; 3] = [125, 126, 127];

/// Runs the script in a throw-away container (`docker run --rm`).
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    binary: String,
}

impl Default for DockerSandbox {
    fn default() -> Self {
        Self {
            binary: "docker".into(),
        }
    }
}

impl DockerSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another CLI binary (e.g. `podman`).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Arguments of `docker run` for `launch`.
    pub fn run_args(&self, launch: &SandboxLaunch) -> Result<Vec<String>, ExecError> {
        if launch.image.trim().is_empty() {
            return Err(ExecError::Launch("job has no container image".into()));
        }
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            launch.name.clone(),
        ];
        if launch.network_disabled {
            args.push("--network=none".into());
        }
        args.extend(launch.limits.docker_args());
        for var in launch.env.iter() {
            args.push("--env".into());
            args.push(var.to_assignment());
        }
        args.push(launch.image.clone());
        args.extend(["sh".to_string(), "-c".to_string(), launch.script.clone()]);
        Ok(args)
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn kind(&self) -> &'static str {
        "docker"
    }

    fn command(&self, launch: &SandboxLaunch) -> Result<Command, ExecError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.run_args(launch)?);
        cmd.kill_on_drop(true);
        Ok(cmd)
    }

    async fn kill(&self, launch: &SandboxLaunch, child: &mut Child) -> Result<(), ExecError> {
        // Killing the CLI alone would leave the container running.
        let out = Command::new(&self.binary)
            .args(["kill", &launch.name])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !out.status.success() {
            warn!(
                container = %launch.name,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "docker kill failed"
            );
        }
        child.start_kill()?;
        Ok(())
    }

    async fn cleanup(&self, launch: &SandboxLaunch) {
        // `--rm` removes finished containers; this only catches ones that never started.
        let res = Command::new(&self.binary)
            .args(["rm", "--force", &launch.name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = res {
            debug!(container = %launch.name, error = %e, "docker rm failed");
        }
    }

    fn is_launch_failure(&self, exit_code: i32) -> bool {
        DOCKER_LAUNCH_FAILURES.contains(&exit_code)
    }
}
