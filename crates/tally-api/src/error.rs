//! Tally — API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tally_core::error::PipelineError;
use tally_generator::BatchSummary;
use thiserror::Error;

/// Startup and runtime errors for the server and forwarder processes.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A pipeline component could not be constructed.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    /// Tracing or span export could not be initialized.
    #[error("telemetry error: {0}")]
    Telemetry(String),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// JSON body returned when a batch was only partly published.
#[derive(Debug, Serialize)]
pub struct PublishFailedBody {
    /// Always `"publish_failed"`.
    pub error: &'static str,
    /// The first publish failure in planning order.
    pub message: String,
    /// Events that reached the transport and stay there.
    pub published: usize,
    /// Events that did not.
    pub failed: usize,
}

/// HTTP-layer error implementing `IntoResponse`.
#[derive(Debug)]
pub enum ApiError {
    /// A pipeline error raised before anything was published.
    Pipeline(PipelineError),
    /// At least one publish of a batch failed.
    PublishFailed {
        /// First failure in planning order.
        first: PipelineError,
        /// Counts for the whole batch.
        summary: BatchSummary,
    },
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self::Pipeline(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Pipeline(err) => {
                let (status, error_code) = match &err {
                    PipelineError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                    PipelineError::Decode(_) => (StatusCode::BAD_REQUEST, "decode_error"),
                    PipelineError::Transport(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "transport_error")
                    }
                    PipelineError::Oracle(_) => (StatusCode::INTERNAL_SERVER_ERROR, "oracle_error"),
                    PipelineError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
                    PipelineError::Internal(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                    }
                };
                let body = ErrorBody {
                    error: error_code,
                    message: err.to_string(),
                };
                (status, Json(body)).into_response()
            }
            Self::PublishFailed { first, summary } => {
                let body = PublishFailedBody {
                    error: "publish_failed",
                    message: first.to_string(),
                    published: summary.published,
                    failed: summary.failed,
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn status_of(err: PipelineError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_validation_maps_to_400() {
        assert_eq!(
            status_of(PipelineError::Validation("events must be at least 1".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_decode_maps_to_400() {
        assert_eq!(
            status_of(PipelineError::Decode("expected value".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_transport_maps_to_500() {
        assert_eq!(
            status_of(PipelineError::Transport("broker down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_maps_to_500() {
        assert_eq!(
            status_of(PipelineError::Internal("RNG mutex poisoned".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_publish_failed_maps_to_500() {
        let response = ApiError::PublishFailed {
            first: PipelineError::Transport("delivery failed for evt2".into()),
            summary: BatchSummary {
                total: 5,
                published: 4,
                failed: 1,
            },
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
