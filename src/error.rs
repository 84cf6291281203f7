use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub type InboxResult<T> = Result<T, InboxError>;

#[derive(Debug, Error)]
pub enum InboxError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("processing timed out after {0} ms")]
    Timeout(u64),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl InboxError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            InboxError::Unauthorized => StatusCode::UNAUTHORIZED,
            InboxError::Forbidden => StatusCode::FORBIDDEN,
            InboxError::NotFound => StatusCode::NOT_FOUND,
            InboxError::BadRequest(_) => StatusCode::BAD_REQUEST,
            InboxError::Provider(_) => StatusCode::BAD_GATEWAY,
            InboxError::Timeout(_) | InboxError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for InboxError {
    fn from(err: reqwest::Error) -> Self {
        InboxError::Provider(err.to_string())
    }
}

impl IntoResponse for InboxError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
