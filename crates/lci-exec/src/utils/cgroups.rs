//! cgroup v2 limits for process sandboxes.
//!
//! On Linux with cgroup v2 the child creates its own cgroup under
//! `/sys/fs/cgroup` in a `pre_exec` hook, writes the limits and moves itself
//! into it. Elsewhere limits are ignored with a warning.
use tokio::process::Command;

use crate::ExecError;

/// CPU limit (`cpu.max`): `quota` microseconds per `period`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuMax {
    /// `None` is unlimited.
    pub quota: Option<u64>,
    pub period: u64,
}

impl Default for CpuMax {
    fn default() -> Self {
        Self {
            quota: None,
            period: 100_000,
        }
    }
}

/// `None` fields are left unlimited.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CgroupLimits {
    pub cpu: Option<CpuMax>,
    /// `memory.max` in bytes.
    pub memory: Option<u64>,
    /// `memory.swap.max` in bytes.
    pub swap: Option<u64>,
    /// `pids.max`.
    pub pids: Option<u64>,
}

impl CgroupLimits {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none() && self.swap.is_none() && self.pids.is_none()
    }
}

/// Place the child spawned from `cmd` into a fresh cgroup named `cgroup_name`.
///
/// Failures inside the child are reported on its stderr and the process
/// runs without limits. Use [`cleanup_cgroup`] once it exited.
pub fn attach_cgroup(cmd: &mut Command, cgroup_name: &str, limits: &CgroupLimits) -> Result<(), ExecError> {
    if limits.is_empty() {
        return Ok(());
    }
    if cgroup_name.is_empty() || cgroup_name.contains('/') || cgroup_name.starts_with('.') {
        return Err(ExecError::InvalidConfig(format!("invalid cgroup name '{cgroup_name}'")));
    }

    #[cfg(target_os = "linux")]
    {
        linux_impl::attach(cmd, cgroup_name, limits);
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = cmd;
        tracing::warn!(
            cgroup = cgroup_name,
            os = std::env::consts::OS,
            "cgroup limits are not supported on this OS; ignoring them"
        );
    }
    Ok(())
}

/// Best-effort removal of a sandbox cgroup.
#[cfg(target_os = "linux")]
pub fn cleanup_cgroup(cgroup_name: &str) {
    use std::path::Path;

    let path = Path::new("/sys/fs/cgroup").join(cgroup_name);
    match std::fs::remove_dir(&path) {
        Ok(()) => tracing::debug!(cgroup = cgroup_name, "removed cgroup"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {
            tracing::debug!(cgroup = cgroup_name, "cgroup still busy; leaving it to the kernel")
        }
        Err(e) => tracing::warn!(cgroup = cgroup_name, error = %e, "failed to remove cgroup"),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn cleanup_cgroup(_cgroup_name: &str) {}

/// `lci-{agent}-{job}-{timestamp:x}`.
pub fn build_cgroup_name(agent: &str, job: &str, timestamp: u64) -> String {
    format!("lci-{agent}-{job}-{timestamp:x}")
}

#[cfg(target_os = "linux")]
mod linux_impl {
    use std::{
        fs,
        io::{self, Write},
        path::{Path, PathBuf},
    };

    use tokio::process::Command;

    use super::{CgroupLimits, CpuMax};
    use crate::utils::log::{pre_exec_log, pre_exec_log_errno};

    const CONTROLLERS_FILE: &str = "cgroup.controllers";
    const CGROUP_ROOT: &str = "/sys/fs/cgroup";

    pub fn attach(cmd: &mut Command, cgroup_name: &str, limits: &CgroupLimits) {
        let cgroup_name = cgroup_name.to_string();
        let limits = limits.clone();

        unsafe {
            cmd.pre_exec(move || {
                if !Path::new(CGROUP_ROOT).join(CONTROLLERS_FILE).is_file() {
                    pre_exec_log(b"lci-exec: cgroup v2 not mounted; sandbox runs without limits\n");
                    return Ok(());
                }

                let dir = Path::new(CGROUP_ROOT).join(&cgroup_name);
                if let Err(e) = fs::create_dir_all(&dir) {
                    pre_exec_log(b"lci-exec: cannot create cgroup; sandbox runs without limits\n");
                    if let Some(code) = e.raw_os_error() {
                        pre_exec_log_errno(code);
                    }
                    return Ok(());
                }
                if let Err(e) = apply_limits(&dir, &limits) {
                    pre_exec_log(b"lci-exec: cannot write cgroup limits; sandbox runs without limits\n");
                    if let Some(code) = e.raw_os_error() {
                        pre_exec_log_errno(code);
                    }
                    return Ok(());
                }
                // EINVAL/ESRCH here mean the child state changed under us.
                if let Err(e) = add_self(&dir) {
                    pre_exec_log(b"lci-exec: cannot join cgroup; sandbox runs without limits\n");
                    if let Some(code) = e.raw_os_error() {
                        pre_exec_log_errno(code);
                    }
                }
                Ok(())
            });
        }
    }

    fn apply_limits(dir: &Path, limits: &CgroupLimits) -> io::Result<()> {
        if let Some(cpu) = limits.cpu {
            write_cpu_max(dir.join("cpu.max"), cpu)?;
        }
        if let Some(mem) = limits.memory {
            write_limit(dir.join("memory.max"), mem)?;
        }
        if let Some(swap) = limits.swap {
            write_limit(dir.join("memory.swap.max"), swap)?;
        }
        if let Some(pids) = limits.pids {
            write_limit(dir.join("pids.max"), pids)?;
        }
        Ok(())
    }

    fn write_cpu_max(path: PathBuf, limit: CpuMax) -> io::Result<()> {
        let content = match limit.quota {
            None => format!("max {}\n", limit.period),
            Some(q) => format!("{q} {}\n", limit.period),
        };
        fs::write(path, content)
    }

    fn write_limit(path: PathBuf, val: u64) -> io::Result<()> {
        fs::write(path, format!("{val}\n"))
    }

    fn add_self(dir: &Path) -> io::Result<()> {
        let mut f = fs::OpenOptions::new().write(true).open(dir.join("cgroup.procs"))?;
        let pid = unsafe { libc::getpid() };
        writeln!(f, "{pid}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_limits_are_noop() {
        let mut cmd = Command::new("sh");
        assert!(attach_cgroup(&mut cmd, "ignored", &CgroupLimits::default()).is_ok());
    }

    #[test]
    fn names_must_stay_below_the_root() {
        let limits = CgroupLimits {
            pids: Some(8),
            ..CgroupLimits::default()
        };
        let mut cmd = Command::new("true");
        assert!(attach_cgroup(&mut cmd, "../escape", &limits).is_err());
        assert!(attach_cgroup(&mut cmd, "", &limits).is_err());
    }

    #[test]
    fn cgroup_name_layout() {
        assert_eq!(build_cgroup_name("agent-1", "job", 255), "lci-agent-1-job-ff");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn attach_and_cleanup_do_not_error() {
        let limits = CgroupLimits {
            cpu: Some(CpuMax::default()),
            memory: Some(128 * 1024 * 1024),
            swap: Some(0),
            pids: Some(32),
        };
        let name = build_cgroup_name("test", "job", 1);
        let mut cmd = Command::new("true");
        assert!(attach_cgroup(&mut cmd, &name, &limits).is_ok());
        cleanup_cgroup(&name);
    }
}
