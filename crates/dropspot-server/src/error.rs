use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use dropspot_store::StoreError;
use thiserror::Error;

/// Request-level failures. Responses never include paths or OS errors; peers
/// get a short plain-text line, the details go to the log.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Payload too large (max {max} bytes)")]
    PayloadTooLarge { max: usize },

    #[error("Storage error: {0}")]
    Storage(#[source] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => ServerError::NotFound(name),
            StoreError::Validation(msg) => ServerError::BadRequest(msg),
            StoreError::InvalidName(_) => ServerError::BadRequest("invalid file name".to_string()),
            other => ServerError::Storage(other),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match &self {
            // missing things send the peer back to the landing page
            ServerError::NotFound(_) => Redirect::to("/").into_response(),
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()).into_response(),
            ServerError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "message too large").into_response()
            }
            ServerError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "storage error").into_response()
            }
            ServerError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}
