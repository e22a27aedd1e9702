// ABOUTME: OAuth 2.0 request/response shapes used by the token authority
// ABOUTME: Includes the process-local pending-authorization record
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use serde::{Deserialize, Serialize};

/// Parameters of an authorization request, parsed by the HTTP layer
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationParams {
    /// Redirect URI the code (or error) will be delivered to
    pub redirect_uri: String,
    /// Opaque client state echoed back on the redirect
    pub state: Option<String>,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// PKCE challenge, `"<method>=<value>"` or a raw value from a
    /// non-conforming upstream
    pub code_challenge: String,
    /// Optional resource indicator (RFC 8707)
    pub resource: Option<String>,
}

/// Pending authorization, held in process memory between `authorize`
/// and `approve`/`deny`.
///
/// Never persisted: a crash simply drops the login attempt. Once
/// consumed the record stays in the table with `used = true` so replays
/// are rejected idempotently.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    /// Random request id carried through the login surface
    pub request_id: String,
    /// Client that initiated the flow
    pub client_id: String,
    /// Redirect URI bound to this request
    pub redirect_uri: String,
    /// Opaque client state
    pub state: Option<String>,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// PKCE challenge as received
    pub code_challenge: String,
    /// Optional resource indicator
    pub resource: Option<String>,
    /// Authenticated subject, set by the login surface
    pub subject: Option<String>,
    /// Opaque claims attached alongside the subject
    pub extra: Option<serde_json::Value>,
    /// Creation time, Unix seconds
    pub created_at: i64,
    /// Whether approve/deny already consumed this request
    pub used: bool,
}

/// Verified access-token introspection result
#[derive(Debug, Clone, Serialize)]
pub struct AuthInfo {
    /// Client the token was issued to
    pub client_id: String,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Absolute expiry, Unix seconds
    pub expires_at: i64,
    /// Resource the token is bound to, if any
    pub resource: Option<String>,
    /// Opaque claims carried from the authorization
    pub extra: Option<serde_json::Value>,
}

/// Token revocation request (RFC 7009)
#[derive(Debug, Clone, Deserialize)]
pub struct RevocationRequest {
    /// The token to revoke
    pub token: String,
    /// Optional hint: `access_token` or `refresh_token`
    pub token_type_hint: Option<String>,
}
