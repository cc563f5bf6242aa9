use thiserror::Error;

/// Failures of the distributed primitives.
#[derive(Debug, Error)]
pub enum GridError {
    /// The grid instance backing this node is shut down or unreachable.
    #[error("grid instance is not active")]
    NotActive,

    #[error("timed out waiting for lock on {map}[{key}]")]
    LockTimeout { map: String, key: String },

    #[error("lock on {map}[{key}] is not held by this owner")]
    NotLockOwner { map: String, key: String },

    #[error("invalid map key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("grid transport failed: {0}")]
    Transport(String),

    #[error("grid host rejected request: {0}")]
    Remote(String),
}

impl GridError {
    /// `true` for the "instance not active" condition.
    #[inline]
    pub fn is_not_active(&self) -> bool {
        matches!(self, GridError::NotActive)
    }
}

pub type GridResult<T> = Result<T, GridError>;
