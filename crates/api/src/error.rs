//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, OrderError};
use saga::{InvalidSignalKind, SagaError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Request conflicts with the saga's current state.
    Conflict(String),
    /// Domain validation error.
    Domain(DomainError),
    /// Saga error.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    match &err {
        DomainError::Order(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        _ => {
            tracing::error!(error = %err, "domain error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        SagaError::Signal(_) | SagaError::AlreadyRunning(_) | SagaError::AlreadyExists(_) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        SagaError::Domain(DomainError::Order(_)) => (StatusCode::BAD_REQUEST, err.to_string()),
        _ => {
            tracing::error!(error = %err, "saga error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Domain(err.into())
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<InvalidSignalKind> for ApiError {
    fn from(err: InvalidSignalKind) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}
