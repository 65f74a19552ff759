//! HTTP error types for `CredVault` server.
//!
//! Maps domain errors from `credvault-core` into appropriate HTTP responses.
//! Every error variant produces a JSON body with a machine-readable `error`
//! field and a human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use credvault_core::VaultError;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// No caller identity, or one that names no account.
    Unauthorized(String),
    /// The caller is known but may not perform the operation.
    Forbidden(String),
    /// Requested resource not found.
    NotFound(String),
    /// Client sent invalid input.
    BadRequest(String),
    /// A uniqueness or dependency conflict.
    Conflict(String),
    /// Internal server error. The message is logged, never returned.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_owned(),
                )
            }
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::NotFound { .. } => Self::NotFound(err.to_string()),

            VaultError::DuplicateMembership { .. }
            | VaultError::DuplicateGrant { .. }
            | VaultError::Conflict { .. }
            | VaultError::KeyRotationConflict { .. }
            | VaultError::GroupInUse { .. }
            | VaultError::ServiceInUse { .. } => Self::Conflict(err.to_string()),

            VaultError::PartialRotationFailure { .. } | VaultError::Invalid { .. } => {
                Self::BadRequest(err.to_string())
            }

            VaultError::Serialization { .. } | VaultError::Audit(_) | VaultError::Storage(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::body::to_bytes;
    use credvault_core::AuditError;
    use credvault_core::ids::{AccountId, GroupId};

    use super::*;

    async fn body_of(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn duplicates_are_conflicts() {
        let err = VaultError::DuplicateMembership {
            account: AccountId::generate(),
            group: GroupId::generate(),
        };
        let (status, body) = body_of(err.into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");
    }

    #[tokio::test]
    async fn rotation_mismatch_is_bad_request() {
        let err = VaultError::PartialRotationFailure {
            reason: "missing member".to_owned(),
        };
        let (status, body) = body_of(err.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("missing member"));
    }

    #[tokio::test]
    async fn internal_details_are_hidden() {
        let err = VaultError::Audit(AuditError::AllBackendsFailed);
        let (status, body) = body_of(err.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "internal server error");
    }
}
