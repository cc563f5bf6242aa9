use std::{
    collections::HashMap,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use lci_core::{LivenessConfig, QueueConfig};
use lci_exec::AgentSettings;
use lci_grid::{DEFAULT_LOCK_LEASE, DEFAULT_LOCK_WAIT, LockSettings};
use lci_observe::LoggerConfig;
use serde::Deserialize;

/// Environment variable naming the config file when no argument is given.
pub const CONFIG_ENV: &str = "LCI_CONFIG";

/// Whole node configuration, one TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub logger: LoggerConfig,
    pub grid: GridSettings,
    pub agent: AgentSettings,
    pub queue: QueueConfig,
    pub liveness: LivenessConfig,
    pub api: ApiSettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridMode {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    pub mode: GridMode,
    /// Grid host, for `remote` mode.
    pub url: String,
    /// Serve the local grid to other nodes on the API listener.
    pub serve: bool,
    pub lock_lease_ms: u64,
    pub lock_wait_ms: u64,
    pub event_log_capacity: usize,
    /// Address other members and dashboards see for this node. Defaults to
    /// `api.bind`, which must then name a concrete interface in remote mode.
    pub advertise_address: Option<String>,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            mode: GridMode::Local,
            url: "http://127.0.0.1:7070".into(),
            serve: false,
            lock_lease_ms: DEFAULT_LOCK_LEASE.as_millis() as u64,
            lock_wait_ms: DEFAULT_LOCK_WAIT.as_millis() as u64,
            event_log_capacity: 4096,
            advertise_address: None,
        }
    }
}

impl GridSettings {
    /// Member address of a node whose API listens on `bind`.
    pub fn member_address(&self, bind: SocketAddr) -> String {
        match self.advertise_address.as_deref().map(str::trim) {
            Some(addr) if !addr.is_empty() => addr.to_string(),
            _ => bind.to_string(),
        }
    }

    pub fn locks(&self) -> LockSettings {
        LockSettings {
            lease: Duration::from_millis(self.lock_lease_ms.max(1)),
            wait: Duration::from_millis(self.lock_wait_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub enabled: bool,
    pub bind: SocketAddr,
    /// Skip authorization; every identified caller is admin.
    pub allow_all: bool,
    pub admins: Vec<String>,
    /// Course id to instructor user names.
    pub instructors: HashMap<String, Vec<String>>,
    pub metrics: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([0, 0, 0, 0], 7070)),
            allow_all: false,
            admins: Vec::new(),
            instructors: HashMap::new(),
            metrics: true,
        }
    }
}

impl NodeConfig {
    /// Path from the first argument, else from `LCI_CONFIG`.
    pub fn path_from_env() -> Option<PathBuf> {
        std::env::args_os()
            .nth(1)
            .or_else(|| std::env::var_os(CONFIG_ENV))
            .map(PathBuf::from)
    }

    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let cfg: NodeConfig = toml::from_str(raw)?;
        cfg.check()?;
        Ok(cfg)
    }

    /// Startup checks that serde cannot express.
    fn check(&self) -> anyhow::Result<()> {
        if self.agent.enabled {
            self.agent.validate().context("invalid [agent] section")?;
        }
        if self.grid.serve && self.grid.mode == GridMode::Remote {
            anyhow::bail!("grid.serve needs grid.mode = \"local\"");
        }
        if self.grid.serve && !self.api.enabled {
            anyhow::bail!("grid.serve needs the api listener");
        }
        if self.grid.mode == GridMode::Remote
            && self.api.bind.ip().is_unspecified()
            && self.grid.advertise_address.as_deref().is_none_or(|a| a.trim().is_empty())
        {
            anyhow::bail!(
                "grid.mode = \"remote\" with api.bind on {} needs grid.advertise_address",
                self.api.bind.ip()
            );
        }
        Ok(())
    }
}
