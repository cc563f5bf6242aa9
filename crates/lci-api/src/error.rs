use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lci_core::CoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing caller identity")]
    Unauthenticated,

    #[error("{0} is not allowed to do this")]
    Forbidden(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The grid cannot be reached; the caller may retry.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        if e.is_grid_unavailable() {
            return ApiError::Unavailable(e.to_string());
        }
        match e {
            CoreError::UnknownAgent(id) => ApiError::NotFound(format!("agent {id}")),
            CoreError::InvalidKey(_) | CoreError::Model(_) => ApiError::InvalidRequest(e.to_string()),
            CoreError::Grid(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, "api request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use lci_grid::GridError;
    use lci_model::AgentId;

    use super::*;

    #[test]
    fn core_errors_map_to_status_codes() {
        let unavailable = ApiError::from(CoreError::Grid(GridError::NotActive));
        assert_eq!(unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let unknown = ApiError::from(CoreError::UnknownAgent(AgentId::from("a")));
        assert_eq!(unknown.status_code(), StatusCode::NOT_FOUND);

        let key = ApiError::from(CoreError::InvalidKey("garbage".into()));
        assert_eq!(key.status_code(), StatusCode::BAD_REQUEST);
    }
}
