//! Unified error type and HTTP mapping.
//!
//! Every handler and engine returns [`AppResult`]. The `IntoResponse` impl
//! renders the wire error envelope `{"error": <message>, "code": <kind>}`
//! with the status code of the error kind. Internal detail is logged, never
//! sent to the client.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Error kinds of the public API surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed body, failed field validation, bad enum value (400)
    InvalidInput,
    /// Missing or expired credential (401)
    Unauthenticated,
    /// Role-gated or otherwise forbidden (403)
    Unauthorized,
    /// Row absent (404)
    NotFound,
    /// FK restrict, duplicate key, refused state transition,
    /// insufficient stock, double inspection (409)
    Conflict,
    /// Operation precondition not met, e.g. "RFQ must be draft" (400)
    Precondition,
    /// Unexpected database or I/O error (500)
    Internal,
    /// Deliberately unimplemented operation (501)
    NotImplemented,
    /// Too many requests for this credential or address (429)
    RateLimited,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Unauthorized => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Precondition => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Stable wire string for the `code` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::Unauthenticated => "unauthenticated",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Precondition => "precondition",
            Self::Internal => "internal",
            Self::NotImplemented => "not_implemented",
            Self::RateLimited => "rate_limited",
        }
    }
}

/// Application error: an [`ErrorCode`] plus a stable human-readable message.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, msg)
    }

    /// Several field validation failures reported together.
    pub fn validation_all(errors: Vec<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, errors.join("; "))
    }

    pub fn unauthenticated() -> Self {
        Self::new(ErrorCode::Unauthenticated, "Authentication required")
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, msg)
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, format!("{} not found", resource.into()))
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, msg)
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Precondition, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, msg)
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotImplemented, msg)
    }

    pub fn rate_limited() -> Self {
        Self::new(ErrorCode::RateLimited, "Too many requests")
    }
}

/// Constraint violations surface as conflicts; everything else from the
/// store is internal and only logged.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::RowNotFound = err {
            return Self::new(ErrorCode::NotFound, "Record not found");
        }
        if let Some(db_err) = err.as_database_error() {
            use sqlx::error::ErrorKind;
            match db_err.kind() {
                ErrorKind::UniqueViolation => {
                    return Self::conflict("A record with this key already exists");
                }
                ErrorKind::ForeignKeyViolation => {
                    return Self::conflict("Record is referenced by other records");
                }
                ErrorKind::CheckViolation => {
                    return Self::conflict("Change violates a data constraint");
                }
                _ => {}
            }
        }
        tracing::error!(error = %err, "Database error");
        Self::new(ErrorCode::Internal, "Internal server error")
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!(error = %err, "JSON serialization error");
        Self::new(ErrorCode::Internal, "Internal server error")
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.code == ErrorCode::Internal {
            tracing::error!(message = %self.message, "Internal server error");
        }
        let status = self.code.status();
        let body = ErrorBody {
            // Internal detail stays in the logs.
            error: if self.code == ErrorCode::Internal {
                "Internal server error".to_string()
            } else {
                self.message
            },
            code: self.code.as_str(),
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ErrorCode::InvalidInput.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::Unauthorized.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::Precondition.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorCode::NotImplemented.status(),
            StatusCode::NOT_IMPLEMENTED
        );
    }

    #[test]
    fn not_found_message() {
        let err = AppError::not_found("Vendor V-001");
        assert_eq!(err.message, "Vendor V-001 not found");
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[test]
    fn validation_accumulates() {
        let err = AppError::validation_all(vec![
            "name must not be empty".to_string(),
            "qty must be positive".to_string(),
        ]);
        assert!(err.message.contains("name must not be empty"));
        assert!(err.message.contains("qty must be positive"));
    }
}
