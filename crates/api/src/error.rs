//! API error types with HTTP response mapping.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use engine::ReservationError;
use reservation_store::StoreError;
use thiserror::Error;

/// Seconds a client should wait before retrying a transient failure.
const RETRY_AFTER_SECS: &str = "1";

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input rejected before reaching the engine.
    #[error("{0}")]
    BadRequest(String),
    /// Missing or malformed caller identity.
    #[error("{0}")]
    Unauthorized(String),
    /// An event or user looked up through the admin path does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Reservation engine error.
    #[error(transparent)]
    Reservation(#[from] ReservationError),
    /// Admin store error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Reservation(err) => match err {
                ReservationError::NotFound(_) => StatusCode::NOT_FOUND,
                ReservationError::CapacityExceeded { .. } => StatusCode::BAD_REQUEST,
                ReservationError::DuplicateReservation { .. } => StatusCode::CONFLICT,
                ReservationError::Forbidden { .. } => StatusCode::FORBIDDEN,
                ReservationError::LockTimeout | ReservationError::StoreUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                ReservationError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Store(err) => match err {
                StoreError::InvalidResource(_) | StoreError::InvalidPrincipal(_) => {
                    StatusCode::BAD_REQUEST
                }
                StoreError::Conflict(_) | StoreError::DuplicateReservation { .. } => {
                    StatusCode::CONFLICT
                }
                StoreError::LockTimeout | StoreError::Unavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            ApiError::Reservation(err) => err.is_retryable(),
            ApiError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retryable = self.is_retryable();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal server error");
            "Internal server error".to_string()
        } else {
            if retryable {
                tracing::warn!(error = %self, "transient failure, client may retry");
            }
            self.to_string()
        };

        let body = serde_json::json!({ "error": message });
        let mut response = (status, axum::Json(body)).into_response();
        if retryable {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(RETRY_AFTER_SECS),
            );
        }
        response
    }
}
