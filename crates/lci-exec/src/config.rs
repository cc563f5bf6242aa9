use std::{path::PathBuf, time::Duration};

use lci_core::fingerprint_openssh;
use serde::Deserialize;

use crate::{ContainerLimits, ExecError, LogConfig, MaxLimits, derived_pool_size, sandbox::SandboxKind};

/// Settings of the build agent hosted by a node.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub enabled: bool,
    /// Agent id; lowercase letters, digits and dashes.
    pub name: String,
    pub display_name: Option<String>,
    /// Concurrent jobs; derived from the CPU count when absent.
    pub pool_size: Option<usize>,
    pub queue_capacity: usize,
    /// Docker-style resource flags applied to every sandbox.
    pub container_flags: Vec<String>,
    pub max_limits: MaxLimits,
    pub sandbox: SandboxKind,
    /// Put process sandboxes into cgroup v2 groups.
    pub cgroups: bool,
    pub heartbeat_interval_ms: u64,
    pub claim_interval_ms: u64,
    pub cancel_poll_interval_ms: u64,
    pub pause_grace_period_ms: u64,
    /// `authorized_keys` style public key of this agent.
    pub public_key_path: Option<PathBuf>,
    pub max_log_lines: usize,
    pub max_line_length: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "build-agent".into(),
            display_name: None,
            pool_size: None,
            queue_capacity: 1,
            container_flags: Vec::new(),
            max_limits: MaxLimits::default(),
            sandbox: SandboxKind::Docker,
            cgroups: false,
            heartbeat_interval_ms: 5_000,
            claim_interval_ms: 1_000,
            cancel_poll_interval_ms: 1_000,
            pause_grace_period_ms: 30_000,
            public_key_path: None,
            max_log_lines: 10_000,
            max_line_length: 4096,
        }
    }
}

impl AgentSettings {
    /// Check the name and resolve the container flags.
    pub fn validate(&self) -> Result<ContainerLimits, ExecError> {
        let valid_name = !self.name.is_empty()
            && self
                .name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        if !valid_name {
            return Err(ExecError::InvalidConfig(format!(
                "agent name '{}' must match ^[a-z0-9-]+$",
                self.name
            )));
        }
        ContainerLimits::from_flags(&self.container_flags)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size.filter(|n| *n > 0).unwrap_or_else(derived_pool_size)
    }

    pub fn display_name(&self) -> String {
        self.display_name.clone().unwrap_or_else(|| self.name.clone())
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            max_lines: self.max_log_lines,
            max_line_length: self.max_line_length.max(1),
            ..LogConfig::default()
        }
    }

    /// Fingerprint of the configured public key, if any.
    pub fn public_key_fingerprint(&self) -> Result<Option<String>, ExecError> {
        let Some(path) = &self.public_key_path else {
            return Ok(None);
        };
        let line = std::fs::read_to_string(path)?;
        Ok(Some(fingerprint_openssh(line.trim())?))
    }

    #[inline]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    #[inline]
    pub fn claim_interval(&self) -> Duration {
        Duration::from_millis(self.claim_interval_ms.max(1))
    }

    #[inline]
    pub fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_interval_ms.max(1))
    }

    #[inline]
    pub fn pause_grace_period(&self) -> Duration {
        Duration::from_millis(self.pause_grace_period_ms)
    }
}
