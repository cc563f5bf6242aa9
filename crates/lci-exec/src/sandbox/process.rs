use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, trace};

use super::{Sandbox, SandboxLaunch};
use crate::{ExecError, attach_cgroup, cleanup_cgroup};

/// Runs the script with `sh -c` directly on the host.
///
/// The image is ignored and the network cannot be disabled. Resource limits
/// apply through cgroup v2 when `cgroups` is set.
#[derive(Debug, Clone, Default)]
pub struct ProcessSandbox {
    cgroups: bool,
}

impl ProcessSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cgroups(mut self, enabled: bool) -> Self {
        self.cgroups = enabled;
        self
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    fn kind(&self) -> &'static str {
        "process"
    }

    fn command(&self, launch: &SandboxLaunch) -> Result<Command, ExecError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&launch.script);
        for var in launch.env.iter() {
            cmd.env(var.name(), var.value());
        }
        if launch.network_disabled {
            debug!(sandbox = %launch.name, "process sandbox cannot disable the network");
        }
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.kill_on_drop(true);

        if self.cgroups {
            attach_cgroup(&mut cmd, &launch.name, &launch.limits.cgroup())?;
        }
        Ok(cmd)
    }

    async fn kill(&self, launch: &SandboxLaunch, child: &mut Child) -> Result<(), ExecError> {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // The script runs in its own process group; take its children down too.
            let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
            if rc == 0 {
                trace!(sandbox = %launch.name, pid, "process group killed");
                return Ok(());
            }
        }
        trace!(sandbox = %launch.name, "killing sandbox process");
        child.start_kill()?;
        Ok(())
    }

    async fn cleanup(&self, launch: &SandboxLaunch) {
        if self.cgroups {
            cleanup_cgroup(&launch.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::process::Stdio;

    use lci_model::Env;

    use super::*;
    use crate::ContainerLimits;

    fn launch(script: &str) -> SandboxLaunch {
        let mut env = Env::new();
        env.set("GREETING", "hi").unwrap();
        SandboxLaunch {
            name: "test".into(),
            image: String::new(),
            script: script.into(),
            env,
            network_disabled: true,
            limits: ContainerLimits::default(),
        }
    }

    #[tokio::test]
    async fn runs_script_with_job_env() {
        let sandbox = ProcessSandbox::new();
        let out = sandbox
            .command(&launch("echo $GREETING"))
            .unwrap()
            .stdout(Stdio::piped())
            .output()
            .await
            .unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hi");
    }

    #[tokio::test]
    async fn kill_stops_the_whole_group() {
        let sandbox = ProcessSandbox::new();
        let l = launch("sleep 30 & sleep 30; wait");
        let mut child = sandbox.command(&l).unwrap().spawn().unwrap();
        sandbox.kill(&l, &mut child).await.unwrap();
        let status = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }
}
