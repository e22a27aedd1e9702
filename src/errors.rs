// ABOUTME: OAuth 2.0 error types surfaced by the token authority
// ABOUTME: Maps error kinds to wire codes, HTTP statuses, and response bodies
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by token-authority operations.
///
/// Every variant corresponds to a standard OAuth 2.0 error code that the
/// HTTP layer can forward verbatim. Persistence failures that cannot be
/// hidden (the fast store is authoritative for token state) surface as
/// `ServerError`; everything else in the storage layer degrades and is
/// logged instead of reaching callers.
#[derive(Debug, Clone, Error)]
pub enum OAuthError {
    /// Malformed or already-consumed pending flow state
    #[error("invalid_request: {0}")]
    InvalidRequest(String),
    /// Consent was requested before a subject was attached
    #[error("login_required: {0}")]
    LoginRequired(String),
    /// Bad authorization code, failed PKCE, or a bad/expired/mismatched
    /// refresh token
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),
    /// Refresh requested scopes outside the originally granted set
    #[error("invalid_scope: {0}")]
    InvalidScope(String),
    /// Unknown or expired access token
    #[error("invalid_token: {0}")]
    InvalidToken(String),
    /// Internal failure (storage, serialization, randomness)
    #[error("server_error: {0}")]
    ServerError(String),
}

impl OAuthError {
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::InvalidRequest(description.into())
    }

    pub fn login_required(description: impl Into<String>) -> Self {
        Self::LoginRequired(description.into())
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::InvalidGrant(description.into())
    }

    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::InvalidScope(description.into())
    }

    pub fn invalid_token(description: impl Into<String>) -> Self {
        Self::InvalidToken(description.into())
    }

    pub fn server_error(description: impl Into<String>) -> Self {
        Self::ServerError(description.into())
    }

    /// OAuth 2.0 wire code for the `error` field
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::LoginRequired(_) => "login_required",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::InvalidScope(_) => "invalid_scope",
            Self::InvalidToken(_) => "invalid_token",
            Self::ServerError(_) => "server_error",
        }
    }

    /// HTTP status the error maps to
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) | Self::InvalidGrant(_) | Self::InvalidScope(_) => 400,
            Self::LoginRequired(_) | Self::InvalidToken(_) => 401,
            Self::ServerError(_) => 500,
        }
    }

    /// Build the standard `error`/`error_description` response body
    #[must_use]
    pub fn to_response(&self) -> ErrorResponse {
        let description = match self {
            Self::InvalidRequest(d)
            | Self::LoginRequired(d)
            | Self::InvalidGrant(d)
            | Self::InvalidScope(d)
            | Self::InvalidToken(d)
            | Self::ServerError(d) => d.clone(),
        };
        let error_uri = match self {
            Self::InvalidRequest(_) => {
                Some("https://datatracker.ietf.org/doc/html/rfc6749#section-4.1.2.1".to_string())
            }
            Self::InvalidGrant(_) | Self::InvalidScope(_) => {
                Some("https://datatracker.ietf.org/doc/html/rfc6749#section-5.2".to_string())
            }
            Self::InvalidToken(_) => {
                Some("https://datatracker.ietf.org/doc/html/rfc6750#section-3.1".to_string())
            }
            Self::LoginRequired(_) | Self::ServerError(_) => None,
        };
        ErrorResponse {
            error: self.error_code().to_string(),
            error_description: Some(description),
            error_uri,
        }
    }
}

impl From<anyhow::Error> for OAuthError {
    fn from(error: anyhow::Error) -> Self {
        Self::ServerError(format!("{error:#}"))
    }
}

/// Result type alias for token-authority operations
pub type OAuthResult<T> = Result<T, OAuthError>;

/// OAuth 2.0 error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code
    pub error: String,
    /// Human-readable error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    /// URI for error information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}
