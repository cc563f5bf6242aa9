//! Container resource limits.
//!
//! Node defaults come from a docker-style flag list resolved once at
//! startup. Only `--cpus`, `--memory`, `--memory-swap` and `--pids-limit`
//! are recognised; anything else is a configuration error, since silently
//! skipping a flag would leave sandboxes under-constrained.
use lci_model::ResourceRequirements;
use serde::Deserialize;

use crate::{CgroupLimits, CpuMax, ExecError};

const MIB: u64 = 1024 * 1024;
const CPU_PERIOD_US: u64 = 100_000;

/// Upper bounds applied to what a job may request.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MaxLimits {
    pub cpus: Option<f64>,
    pub memory_mb: Option<u64>,
    pub memory_swap_mb: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContainerLimits {
    pub cpus: Option<f64>,
    pub memory_bytes: Option<u64>,
    /// Memory plus swap. `None` is docker's default (twice the memory).
    pub memory_swap_bytes: Option<u64>,
    pub pids_limit: Option<u64>,
}

impl ContainerLimits {
    /// Parse a flag list such as `["--cpus=2", "--memory", "4g"]`.
    pub fn from_flags<S: AsRef<str>>(flags: &[S]) -> Result<Self, ExecError> {
        let mut limits = ContainerLimits::default();
        let mut args = flags.iter().map(|f| f.as_ref().trim()).filter(|f| !f.is_empty());

        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag, Some(value)),
                None => (arg, None),
            };
            if !matches!(flag, "--cpus" | "--memory" | "-m" | "--memory-swap" | "--pids-limit") {
                return Err(ExecError::UnknownFlag(flag.to_string()));
            }
            let value = match inline {
                Some(v) => v,
                None => args.next().ok_or_else(|| ExecError::MissingFlagValue {
                    flag: flag.to_string(),
                })?,
            };
            let invalid = || ExecError::InvalidFlagValue {
                flag: flag.to_string(),
                value: value.to_string(),
            };

            match flag {
                "--cpus" => {
                    let cpus: f64 = value.parse().map_err(|_| invalid())?;
                    if !cpus.is_finite() || cpus <= 0.0 {
                        return Err(invalid());
                    }
                    limits.cpus = Some(cpus);
                }
                "--memory" | "-m" => {
                    limits.memory_bytes = Some(parse_bytes(value).ok_or_else(invalid)?);
                }
                "--memory-swap" => {
                    limits.memory_swap_bytes = if value == "-1" {
                        None
                    } else {
                        Some(parse_bytes(value).ok_or_else(invalid)?)
                    };
                }
                _ => {
                    let pids: u64 = value.parse().map_err(|_| invalid())?;
                    if pids == 0 {
                        return Err(invalid());
                    }
                    limits.pids_limit = Some(pids);
                }
            }
        }

        if let (Some(mem), Some(swap)) = (limits.memory_bytes, limits.memory_swap_bytes) {
            if swap < mem {
                return Err(ExecError::InvalidFlagValue {
                    flag: "--memory-swap".into(),
                    value: format!("{swap} bytes is below --memory {mem} bytes"),
                });
            }
        }
        Ok(limits)
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_none()
            && self.memory_bytes.is_none()
            && self.memory_swap_bytes.is_none()
            && self.pids_limit.is_none()
    }

    /// Limits for one job: its own requests clamped to `max`, node defaults otherwise.
    pub fn for_job(&self, req: &ResourceRequirements, max: &MaxLimits) -> ContainerLimits {
        let cpus = match req.cpus {
            Some(c) if c.is_finite() && c > 0.0 => Some(max.cpus.map_or(c, |m| c.min(m))),
            _ => self.cpus,
        };
        let memory_bytes = req
            .memory_mb
            .map(|mb| clamp(mb, max.memory_mb).saturating_mul(MIB))
            .or(self.memory_bytes);
        let mut memory_swap_bytes = req
            .memory_swap_mb
            .map(|mb| clamp(mb, max.memory_swap_mb).saturating_mul(MIB))
            .or(self.memory_swap_bytes);
        if let (Some(mem), Some(swap)) = (memory_bytes, memory_swap_bytes) {
            memory_swap_bytes = Some(swap.max(mem));
        }

        ContainerLimits {
            cpus,
            memory_bytes,
            memory_swap_bytes,
            pids_limit: self.pids_limit,
        }
    }

    /// `docker run` arguments.
    pub fn docker_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(cpus) = self.cpus {
            args.push(format!("--cpus={cpus}"));
        }
        if let Some(mem) = self.memory_bytes {
            args.push(format!("--memory={mem}b"));
        }
        if let Some(swap) = self.memory_swap_bytes {
            args.push(format!("--memory-swap={swap}b"));
        }
        if let Some(pids) = self.pids_limit {
            args.push(format!("--pids-limit={pids}"));
        }
        args
    }

    /// Equivalent cgroup v2 limits for process sandboxes.
    pub fn cgroup(&self) -> CgroupLimits {
        CgroupLimits {
            cpu: self.cpus.map(|c| CpuMax {
                quota: Some(((c * CPU_PERIOD_US as f64).round() as u64).max(1000)),
                period: CPU_PERIOD_US,
            }),
            memory: self.memory_bytes,
            // cgroup v2 accounts swap separately from memory.
            swap: match (self.memory_swap_bytes, self.memory_bytes) {
                (Some(swap), Some(mem)) => Some(swap.saturating_sub(mem)),
                _ => None,
            },
            pids: self.pids_limit,
        }
    }
}

fn clamp(requested: u64, max: Option<u64>) -> u64 {
    max.map_or(requested, |m| requested.min(m))
}

/// Docker byte sizes: plain bytes or a `b`, `k`, `m`, `g` suffix.
fn parse_bytes(value: &str) -> Option<u64> {
    let value = value.trim().to_ascii_lowercase();
    let (digits, unit) = match value.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((i, _)) => value.split_at(i),
        None => (value.as_str(), ""),
    };
    let n: u64 = digits.parse().ok()?;
    let factor = match unit {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => MIB,
        "g" | "gb" => 1024 * MIB,
        _ => return None,
    };
    n.checked_mul(factor).filter(|b| *b > 0)
}
