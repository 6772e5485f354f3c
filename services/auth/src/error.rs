//! Error taxonomy for the authentication service

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::error::DatabaseError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Custom error type for authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("{0} required")]
    MissingField(&'static str),

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    #[error("refresh token expired")]
    RefreshTokenExpired,

    #[error("refresh token revoked")]
    RefreshTokenRevoked,

    #[error("missing or invalid Authorization header")]
    MissingToken,

    #[error("malformed token")]
    TokenMalformed,

    #[error("token expired")]
    TokenExpired,

    #[error("invalid token signature")]
    BadSignature,

    #[error("forbidden")]
    Forbidden,

    #[error("too many login attempts")]
    TooManyAttempts,

    #[error("{0}")]
    Validation(String),

    #[error("email already exists")]
    EmailTaken,

    /// Persisted-store failure; details are logged, never returned
    #[error("storage failure: {0}")]
    StorageFailure(#[from] DatabaseError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable code returned alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::MissingField(_) => "missing_field",
            AuthError::InvalidRefreshToken => "invalid_refresh_token",
            AuthError::RefreshTokenExpired => "refresh_token_expired",
            AuthError::RefreshTokenRevoked => "refresh_token_revoked",
            AuthError::MissingToken => "missing_token",
            AuthError::TokenMalformed => "token_malformed",
            AuthError::TokenExpired => "token_expired",
            AuthError::BadSignature => "bad_signature",
            AuthError::Forbidden => "forbidden",
            AuthError::TooManyAttempts => "too_many_attempts",
            AuthError::Validation(_) => "validation",
            AuthError::EmailTaken => "email_taken",
            AuthError::StorageFailure(_) | AuthError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingField(_) | AuthError::Validation(_) | AuthError::EmailTaken => {
                StatusCode::BAD_REQUEST
            }
            AuthError::InvalidCredentials
            | AuthError::InvalidRefreshToken
            | AuthError::RefreshTokenExpired
            | AuthError::RefreshTokenRevoked
            | AuthError::MissingToken
            | AuthError::TokenMalformed
            | AuthError::TokenExpired
            | AuthError::BadSignature => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            AuthError::StorageFailure(_) | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AuthError::StorageFailure(e) => {
                error!("Storage failure: {}", e);
                "Internal server error".to_string()
            }
            AuthError::Internal(e) => {
                error!("Internal error: {}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

/// Type alias for authentication results
pub type AuthResult<T> = Result<T, AuthError>;
