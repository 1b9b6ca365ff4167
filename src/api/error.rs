use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::services::pipeline::{ErrorKind, PipelineError};

/// Error body returned by `POST /upscale`
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Always "error"
    pub status: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl AppError {
    /// Classifies the failure and logs it once
    pub fn classify(&self) -> (StatusCode, ErrorResponse) {
        let AppError::Pipeline(err) = self;
        let kind = err.kind();

        let (status, message) = match kind {
            ErrorKind::Validation => {
                tracing::warn!("Invalid request: {}", err);
                (StatusCode::BAD_REQUEST, format!("Invalid request: {}", err))
            }
            ErrorKind::TooLarge | ErrorKind::TransferFailed => {
                tracing::warn!("Processing failed ({}): {}", kind, err);
                (StatusCode::BAD_REQUEST, format!("Processing failed: {}", err))
            }
            ErrorKind::Storage | ErrorKind::Transform => {
                tracing::error!("Processing failed ({}): {:?}", kind, err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Processing failed: {}", err),
                )
            }
            ErrorKind::Internal => {
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (
            status,
            ErrorResponse {
                status: "error".to_string(),
                kind,
                message,
            },
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.classify();
        (status, Json(body)).into_response()
    }
}

/// Plain-text rendering used by the event ingress
pub fn event_error_message(err: &PipelineError) -> String {
    match err.kind() {
        ErrorKind::Internal => {
            tracing::error!("Internal error: {:?}", err);
            "Error: Internal error".to_string()
        }
        kind => {
            tracing::warn!("Event failed ({}): {}", kind, err);
            format!("Error: {}", err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::transfer::TransferError;
    use crate::utils::validation::ValidationError;

    #[test]
    fn test_classification_table() {
        let cases: Vec<(PipelineError, StatusCode, &str)> = vec![
            (
                ValidationError::new("NOT_JSON", "Request must be JSON").into(),
                StatusCode::BAD_REQUEST,
                "Invalid request: Request must be JSON",
            ),
            (
                TransferError::TooLarge {
                    limit: 10,
                    declared: Some(11),
                }
                .into(),
                StatusCode::BAD_REQUEST,
                "Processing failed: File too large: 11 bytes (limit 10 bytes)",
            ),
            (
                PipelineError::Internal("scratch dir missing".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
            ),
        ];

        for (err, status, message) in cases {
            let (got_status, body) = AppError::from(err).classify();
            assert_eq!(got_status, status);
            assert_eq!(body.message, message);
            assert_eq!(body.status, "error");
        }
    }

    #[test]
    fn test_event_messages() {
        let err = PipelineError::TooLarge(
            "File too large (3000.00MB). Maximum allowed: 2000MB".to_string(),
        );
        assert_eq!(
            event_error_message(&err),
            "Error: File too large (3000.00MB). Maximum allowed: 2000MB"
        );
        let err = PipelineError::Internal("boom".to_string());
        assert_eq!(event_error_message(&err), "Error: Internal error");
    }
}
