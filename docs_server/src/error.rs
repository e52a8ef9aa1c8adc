//! Queue errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

/// Failures surfaced by a [`BuildQueue`](crate::services::queue::BuildQueue).
///
/// `NotFound` and `Conflict` are kept apart so a late or duplicate report
/// (conflict) is never mistaken for a missing job.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("build {0} is not in running state")]
    Conflict(i64),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Error returned from route handlers, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "missing or invalid token")
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match &err {
            QueueError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            QueueError::Conflict(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            QueueError::AlreadyExists(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            QueueError::Database(_) | QueueError::Pool(_) => {
                tracing::error!(error = %err, "Queue storage failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "database error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}
