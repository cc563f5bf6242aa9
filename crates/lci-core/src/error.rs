use lci_grid::GridError;
use lci_model::{AgentId, ModelError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("grid error: {0}")]
    Grid(#[from] GridError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("invalid public key: {0}")]
    InvalidKey(String),
}

impl CoreError {
    /// `true` when the grid itself is unavailable, as opposed to a bad request.
    pub fn is_grid_unavailable(&self) -> bool {
        matches!(
            self,
            CoreError::Grid(GridError::NotActive | GridError::Transport(_))
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
