//! Error taxonomy for the authentication service
//!
//! Service operations fail with [`AuthError`]; the HTTP layer maps each
//! variant to a fixed status and stable machine-readable code. Token
//! verification failures keep their cause in [`TokenError`] for logging but
//! surface to clients as a generic authentication failure.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, warn};

use crate::repositories::StoreError;

/// Unique index guarding registered email addresses
const EMAIL_CONSTRAINT: &str = "uq_users_email";

/// Why a token failed verification
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token is malformed")]
    Malformed,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            _ => TokenError::Malformed,
        }
    }
}

/// Authentication service error
#[derive(Error, Debug)]
pub enum AuthError {
    /// Bad credentials, invalid or expired token, locked/inactive/unverified account
    #[error("{0}")]
    Authentication(String),

    /// Input rejected by policy (password strength, expired reset token, malformed body)
    #[error("{message}")]
    Validation { message: String, details: Value },

    /// Unknown verification or reset token, unknown email
    #[error("{0}")]
    NotFound(String),

    /// Duplicate email
    #[error("{0}")]
    Conflict(String),

    /// Anything unexpected; never shown to the client
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Type alias for service results
pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    pub fn authentication(message: impl Into<String>) -> Self {
        AuthError::Authentication(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AuthError::Validation {
            message: message.into(),
            details: json!({}),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AuthError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        AuthError::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        AuthError::Internal(message.into())
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AuthError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::Conflict(_) => StatusCode::CONFLICT,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Authentication(_) => "AUTHENTICATION_ERROR",
            AuthError::Validation { .. } => "VALIDATION_ERROR",
            AuthError::NotFound(_) => "NOT_FOUND",
            AuthError::Conflict(_) => "CONFLICT_ERROR",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(constraint) if constraint == EMAIL_CONSTRAINT => {
                warn!(constraint = %constraint, "Unique constraint violated");
                AuthError::conflict("Email address already registered")
            }
            // Token and slug collisions are not the caller's fault.
            StoreError::Conflict(constraint) => {
                AuthError::internal(format!("unique constraint {constraint} violated"))
            }
            StoreError::Database(e) => AuthError::internal(e.to_string()),
            StoreError::Corrupt(msg) => AuthError::internal(msg),
        }
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        AuthError::Internal(format!("{err:#}"))
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        warn!(reason = %err, "Token verification failed");
        AuthError::authentication("Invalid token")
    }
}

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        AuthError::Validation {
            message: "Request validation failed".to_string(),
            details: json!({ "errors": [rejection.body_text()] }),
        }
    }
}

/// Error payload placed in response extensions so the envelope middleware can
/// add the request path and method.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub details: Value,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let (message, details) = match self {
            AuthError::Internal(detail) => {
                error!(error = %detail, "Unexpected error while handling request");
                ("An unexpected error occurred".to_string(), json!({}))
            }
            AuthError::Validation { message, details } => (message, details),
            other => (other.to_string(), json!({})),
        };

        let body = ErrorBody {
            code,
            message,
            details,
        };

        let mut response = (status, Json(json!({ "error": &body }))).into_response();
        response.extensions_mut().insert(body);
        response
    }
}
