use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::LoggerError;

/// A validated `EnvFilter` expression such as `"info"` or `"lci_core=debug,info"`.
///
/// The raw string is kept so the config can be serialized back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LoggerLevel(String);

impl LoggerLevel {
    pub fn new(s: impl Into<String>) -> Result<Self, LoggerError> {
        Self::try_from(s.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Builds a fresh filter; `EnvFilter` is not `Clone`.
    pub fn to_env_filter(&self) -> Result<EnvFilter, LoggerError> {
        EnvFilter::try_new(&self.0).map_err(|e| LoggerError::InvalidLevel(format!("{}: {e}", self.0)))
    }
}

impl Default for LoggerLevel {
    fn default() -> Self {
        LoggerLevel("info".into())
    }
}

impl FromStr for LoggerLevel {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl TryFrom<String> for LoggerLevel {
    type Error = LoggerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let level = LoggerLevel(s);
        level.to_env_filter()?;
        Ok(level)
    }
}

impl From<LoggerLevel> for String {
    fn from(level: LoggerLevel) -> Self {
        level.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_per_target_levels() {
        for ok in ["info", "warn", "trace", "lci_exec=trace,lci_grid=debug,info"] {
            assert!(ok.parse::<LoggerLevel>().is_ok(), "{ok} should parse");
        }
    }

    #[test]
    fn rejects_unknown_level_names() {
        for bad in ["lci_exec=verbose", "lci_core=lol,info"] {
            assert!(
                matches!(bad.parse::<LoggerLevel>(), Err(LoggerError::InvalidLevel(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn invalid_level_fails_deserialization() {
        assert!(serde_json::from_str::<LoggerLevel>(r#""lci_exec=verbose""#).is_err());
        let lvl: LoggerLevel = serde_json::from_str(r#""lci_core=debug,info""#).unwrap();
        assert_eq!(lvl.as_str(), "lci_core=debug,info");
        assert_eq!(serde_json::to_string(&lvl).unwrap(), r#""lci_core=debug,info""#);
    }

    #[test]
    fn default_is_info() {
        assert_eq!(LoggerLevel::default().as_str(), "info");
        assert!(LoggerLevel::default().to_env_filter().is_ok());
    }
}
