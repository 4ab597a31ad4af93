/// Unified error types for the Keystone CRM auth service
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum CrmError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Authentication errors (bad credentials, bad/expired token)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Authorization errors
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Account is locked until the given time
    #[error("Account is temporarily locked")]
    AccountLocked { locked_until: DateTime<Utc> },

    /// Account is deactivated (also surfaced for unverified email)
    #[error("Account is deactivated")]
    AccountDeactivated,

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., duplicate email)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JWT errors
    #[error("JWT error: {0}")]
    Jwt(String),
}

/// JSON error response format shared by all endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(rename = "lockedUntil", skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    pub fn new(error: &str, message: String) -> Self {
        Self {
            error: error.to_string(),
            message,
            locked_until: None,
            retry_after: None,
        }
    }
}

/// Convert CrmError to HTTP response
impl IntoResponse for CrmError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            CrmError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("INVALID_TOKEN", self.to_string()),
            ),
            CrmError::Authorization(_) => (
                StatusCode::FORBIDDEN,
                ErrorResponse::new("FORBIDDEN", self.to_string()),
            ),
            CrmError::AccountLocked { locked_until } => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    locked_until: Some(*locked_until),
                    ..ErrorResponse::new(
                        "ACCOUNT_LOCKED",
                        "Account is temporarily locked due to repeated failed logins".to_string(),
                    )
                },
            ),
            CrmError::AccountDeactivated => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("ACCOUNT_DEACTIVATED", "Account is deactivated".to_string()),
            ),
            CrmError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("INVALID_REQUEST", self.to_string()),
            ),
            CrmError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new("NOT_FOUND", self.to_string()),
            ),
            CrmError::Conflict(_) => (
                StatusCode::CONFLICT,
                ErrorResponse::new("CONFLICT", self.to_string()),
            ),
            CrmError::RateLimitExceeded { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorResponse {
                    retry_after: Some(retry_after.as_secs()),
                    ..ErrorResponse::new(
                        "RATE_LIMITED",
                        "Too many requests, please try again later".to_string(),
                    )
                },
            ),
            CrmError::Jwt(_) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("INVALID_TOKEN", "Invalid or expired token".to_string()),
            ),
            // Don't leak details for infrastructure failures
            CrmError::Database(_) | CrmError::Internal(_) | CrmError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("INTERNAL_SERVER_ERROR", "Internal server error".to_string()),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for service operations
pub type CrmResult<T> = Result<T, CrmError>;
