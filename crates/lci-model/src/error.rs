use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("identifier must not be empty: {0}")]
    EmptyId(&'static str),

    #[error("unknown job status: {0}")]
    UnknownJobStatus(String),

    #[error("unknown agent status: {0}")]
    UnknownAgentStatus(String),

    #[error("invalid environment variable name: {0:?}")]
    InvalidEnvName(String),

    #[error("invalid model: {0}")]
    Invalid(String),
}

pub type ModelResult<T> = Result<T, ModelError>;
