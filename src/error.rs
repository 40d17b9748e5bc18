//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::{DomainError, FaultKind};
use crate::handlers::{FieldError, ValidationErrors};
use crate::messaging::BrokerError;
use crate::repository::RepositoryError;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("Credit not found: {0}")]
    CreditNotFound(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Infrastructure errors
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl AppError {
    /// Classify the error for retry and settlement decisions.
    pub fn kind(&self) -> FaultKind {
        match self {
            AppError::InvalidRequest(_) | AppError::Validation(_) | AppError::CreditNotFound(_) => {
                FaultKind::Validation
            }
            AppError::Domain(e) => e.kind(),
            AppError::Repository(e) => e.kind(),
            AppError::Broker(e) => e.kind(),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

fn infrastructure_status(kind: FaultKind) -> StatusCode {
    match kind {
        FaultKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        FaultKind::Duplicate => StatusCode::CONFLICT,
        FaultKind::Validation => StatusCode::BAD_REQUEST,
        FaultKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut errors = None;

        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::Validation(validation) => {
                errors = Some(validation.errors.clone());
                (StatusCode::BAD_REQUEST, "validation_failed", None)
            }

            // 404 Not Found
            AppError::CreditNotFound(number) => {
                (StatusCode::NOT_FOUND, "credit_not_found", Some(number.clone()))
            }

            AppError::Domain(domain_err) => match domain_err {
                DomainError::InvalidValue(e) => {
                    (StatusCode::BAD_REQUEST, "invalid_value", Some(e.to_string()))
                }
                DomainError::Invariant(e) => {
                    (StatusCode::BAD_REQUEST, "invalid_credit", Some(e.to_string()))
                }
            },

            AppError::Repository(e) => {
                tracing::error!(error = %e, kind = %e.kind(), "Repository error");
                (infrastructure_status(e.kind()), "repository_error", None)
            }
            AppError::Broker(e) => {
                tracing::error!(error = %e, kind = %e.kind(), "Broker error");
                (infrastructure_status(e.kind()), "broker_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
            errors,
        };

        (status, Json(body)).into_response()
    }
}
