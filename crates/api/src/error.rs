use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use extract::ExtractError;
use graph::GraphError;
use versioning::VersionError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

impl From<GraphError> for ApiError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::EntityNotFound(_) | GraphError::RelationshipNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            GraphError::Validation(_) => Self::Validation(err.to_string()),
            GraphError::Concurrency(_) => Self::Conflict(err.to_string()),
            GraphError::Serialization(_) | GraphError::Io(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Graph(e) => e.into(),
            ExtractError::JobNotFound(_) => Self::NotFound(err.to_string()),
            ExtractError::NotCancellable { .. } => Self::Conflict(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl From<VersionError> for ApiError {
    fn from(err: VersionError) -> Self {
        match err {
            VersionError::Graph(e) => e.into(),
            VersionError::CheckpointNotFound(_) => Self::NotFound(err.to_string()),
            VersionError::Io(_) | VersionError::Serialization(_) => Self::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph::EntityId;
    use versioning::CheckpointId;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (GraphError::EntityNotFound(EntityId::new()).into(), StatusCode::NOT_FOUND),
            (GraphError::validation("bad").into(), StatusCode::UNPROCESSABLE_ENTITY),
            (GraphError::Concurrency("busy".into()).into(), StatusCode::CONFLICT),
            (VersionError::CheckpointNotFound(CheckpointId::new()).into(), StatusCode::NOT_FOUND),
            (
                VersionError::Graph(GraphError::validation("dangling")).into(),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (ExtractError::malformed("nope").into(), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err}");
        }
    }
}
