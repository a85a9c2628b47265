use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::gadget::GadgetStatus;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration not supported: {0}")]
    NotSupported(String),

    #[error("Gadget not pulled up within {0:?}")]
    Timeout(Duration),

    #[error("Invalid request: {0}")]
    CallerMisuse(String),

    #[error("Gadget cannot be pulled down")]
    PullDown,

    #[error("Gadget cannot be pulled up")]
    PullUp,

    #[error("Callback delivery failed: {0}")]
    Callback(String),
}

impl AppError {
    /// Status code reported to gadget callbacks for this error
    pub fn status(&self) -> GadgetStatus {
        match self {
            AppError::NotSupported(_) => GadgetStatus::ConfigurationNotSupported,
            _ => GadgetStatus::Error,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::CallerMisuse(_) => StatusCode::BAD_REQUEST,
            AppError::NotSupported(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub status: GadgetStatus,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            status: self.status(),
            message: self.to_string(),
        };

        tracing::error!(
            error_type = std::any::type_name_of_val(&self),
            error_message = %body.message,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::NotSupported("uvc".to_string()).status(),
            GadgetStatus::ConfigurationNotSupported
        );
        assert_eq!(
            AppError::Timeout(Duration::from_millis(10)).status(),
            GadgetStatus::Error
        );
        assert_eq!(AppError::PullUp.status(), GadgetStatus::Error);
    }

    #[test]
    fn test_pull_errors_are_distinct() {
        assert_eq!(AppError::PullDown.to_string(), "Gadget cannot be pulled down");
        assert_eq!(AppError::PullUp.to_string(), "Gadget cannot be pulled up");
    }
}
