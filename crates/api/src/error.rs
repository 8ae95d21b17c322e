use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use detector_cluster::SubmitError;
use serde_json::json;

/// Message returned when the file was stored but no worker job started.
pub const SUBMIT_FAILED_MESSAGE: &str = "File uploaded but failed to start processing job.";

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The worker job for a stored upload could not be submitted.
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Submit(err) => {
                tracing::error!(job_name = %err.job_name, error = %err.source, "Job submission failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "JOB_SUBMIT_FAILED",
                    SUBMIT_FAILED_MESSAGE.to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
