//! # API Error Mapping
//!
//! Translates the engine's error taxonomy into HTTP statuses and a JSON
//! body the dashboard can branch on.
//!
//! ## Status Mapping
//! ```text
//! UnknownDevice / UnknownCommand / UnknownPackage  → 404
//! InvalidCredential                                → 401
//! WrongDevice                                      → 403
//! CommandNotDelivered / PackageNotFetched          → 409 (desync)
//! QueueFull                                        → 409
//! Validation                                       → 422
//! RateLimited                                      → 429
//! Config / Storage                                 → 500
//! ```
//!
//! Benign duplicates never reach this module - they are 200s with
//! `duplicate: true` in the ack body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use drophub_engine::HubError;

/// JSON error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    /// Stable machine-readable code ("unknown_device", ...).
    error: &'static str,
    /// Human-readable detail.
    message: String,
}

/// An error as the HTTP layer reports it.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        let (status, code) = match &err {
            HubError::UnknownDevice(_) => (StatusCode::NOT_FOUND, "unknown_device"),
            HubError::UnknownCommand(_) => (StatusCode::NOT_FOUND, "unknown_command"),
            HubError::UnknownPackage(_) => (StatusCode::NOT_FOUND, "unknown_package"),
            HubError::InvalidCredential(_) => (StatusCode::UNAUTHORIZED, "invalid_credential"),
            HubError::WrongDevice { .. } => (StatusCode::FORBIDDEN, "wrong_device"),
            HubError::CommandNotDelivered(_) => (StatusCode::CONFLICT, "command_not_delivered"),
            HubError::PackageNotFetched(_) => (StatusCode::CONFLICT, "package_not_fetched"),
            HubError::QueueFull(_) => (StatusCode::CONFLICT, "queue_full"),
            HubError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed"),
            HubError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            HubError::InvalidConfig(_) | HubError::ConfigLoadFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
            }
            HubError::ChannelError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            HubError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        };

        if status.is_server_error() {
            error!(?err, "Internal error surfaced to API");
        }

        ApiError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err: ApiError = HubError::UnknownDevice("esp001".to_string()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "unknown_device");

        let err: ApiError = HubError::InvalidCredential("esp001".to_string()).into();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let err: ApiError = HubError::RateLimited("esp001".to_string()).into();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);

        let err: ApiError = HubError::CommandNotDelivered("c1".to_string()).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }
}
