use explorer_vision::ClassifyError;
use poem::{Response, error::ResponseError, http::StatusCode};
use thiserror::Error;

use crate::{dataset::QueryError, storage::StorageError};

/// Why a request could not be answered.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("query failed: {0}")]
    QueryFailed(#[from] QueryError),
    #[error("storage failed: {0}")]
    StorageFailed(#[from] StorageError),
    #[error("classification failed: {0}")]
    ClassifyFailed(#[from] ClassifyError),
    #[error("invalid request: {0}")]
    ValidationFailed(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::QueryFailed(_) => "QueryFailed",
            AppError::StorageFailed(_) => "StorageFailed",
            AppError::ClassifyFailed(_) => "ClassifyFailed",
            AppError::ValidationFailed(_) => "ValidationFailed",
        }
    }
}

impl ResponseError for AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::QueryFailed(_) | AppError::StorageFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::ClassifyFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn as_response(&self) -> Response
    where
        Self: std::error::Error + Send + Sync + 'static,
    {
        tracing::error!("{}: {self}", self.kind());

        let body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });

        Response::builder()
            .status(self.status())
            .content_type("application/json; charset=utf-8")
            .body(body.to_string())
    }
}
