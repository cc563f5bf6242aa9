use lci_core::CoreError;
use lci_grid::GridError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unknown container flag '{0}'")]
    UnknownFlag(String),

    #[error("container flag '{flag}' needs a value")]
    MissingFlagValue { flag: String },

    #[error("invalid value '{value}' for container flag '{flag}'")]
    InvalidFlagValue { flag: String, value: String },

    #[error("invalid agent configuration: {0}")]
    InvalidConfig(String),

    #[error("execution pool is full ({in_flight} in flight)")]
    PoolFull { in_flight: usize },

    #[error("sandbox launch failed: {0}")]
    Launch(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Grid(#[from] GridError),
}
