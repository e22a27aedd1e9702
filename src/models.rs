// ABOUTME: Serializable record types for codes, tokens, reuse markers, and clients
// ABOUTME: These shapes travel as JSON through Redis, the replication channel, and SQLite
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use serde::{Deserialize, Serialize};

/// Single-use authorization code issued by `approve`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCodeRecord {
    /// Code value (primary key)
    pub code: String,
    /// Client the code was issued to
    pub client_id: String,
    /// Redirect URI bound at authorization time
    pub redirect_uri: String,
    /// PKCE challenge, `"<method>=<value>"` or a raw upstream value
    pub code_challenge: String,
    /// Scopes granted by the end user
    pub scopes: Vec<String>,
    /// Optional resource indicator (RFC 8707)
    pub resource: Option<String>,
    /// Authenticated subject captured at consent
    pub subject: String,
    /// Opaque claims attached by the login surface
    pub extra: Option<serde_json::Value>,
    /// Absolute expiry, Unix seconds
    pub expires_at: i64,
}

/// Access or refresh token record; both share the same shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Token value (key)
    pub token: String,
    /// Owning client
    pub client_id: String,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Optional resource indicator
    pub resource: Option<String>,
    /// Authenticated subject
    pub subject: String,
    /// Opaque claims carried through from the authorization
    pub extra: Option<serde_json::Value>,
    /// Absolute expiry, Unix seconds
    pub expires_at: i64,
}

/// Replay-tolerance marker keyed by a rotated-away refresh token.
///
/// Lives only for the short reuse window so a burst of concurrent
/// refresh calls presenting the same (now-deleted) token all receive
/// the same new pair instead of erroring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenReuseRecord {
    /// The refresh token that was rotated away (key)
    pub old_refresh_token: String,
    /// Client that performed the rotation
    pub client_id: String,
    /// Resource the rotation was bound to, if any
    pub resource: Option<String>,
    /// Sorted space-joined scopes of the rotated grant
    pub scope_key: String,
    /// The token pair the rotation produced
    pub tokens: TokenResponse,
    /// Absolute expiry of the reuse window, Unix seconds
    pub expires_at: i64,
}

/// Registered OAuth client. Registered out-of-band; read-only to the
/// token authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Client identifier (key)
    pub client_id: String,
    /// Client secret; empty for public clients
    pub client_secret: String,
    /// Display name
    pub client_name: String,
    /// Allowed redirect URIs
    pub redirect_uris: Vec<String>,
    /// Token endpoint auth method (`none`, `client_secret_post`, ...)
    pub token_endpoint_auth_method: String,
    /// Grant types the client may use
    pub grant_types: Vec<String>,
    /// Response types the client may use
    pub response_types: Vec<String>,
    /// When the client id was issued, Unix seconds
    pub client_id_issued_at: Option<i64>,
    /// When the client secret expires, Unix seconds (0 = never)
    pub client_secret_expires_at: Option<i64>,
}

/// OAuth 2.0 token response as returned by both exchange operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Opaque access token
    pub access_token: String,
    /// Token type (always "bearer")
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    /// Opaque refresh token paired with the access token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Space-joined granted scopes
    pub scope: String,
}

/// Canonical key for comparing scope sets regardless of order
#[must_use]
pub fn scope_key(scopes: &[String]) -> String {
    let mut sorted = scopes.to_vec();
    sorted.sort();
    sorted.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_key_is_order_independent() {
        let a = vec!["write".to_string(), "read".to_string()];
        let b = vec!["read".to_string(), "write".to_string()];
        assert_eq!(scope_key(&a), scope_key(&b));
        assert_eq!(scope_key(&a), "read write");
    }

    #[test]
    fn test_token_response_omits_absent_refresh_token() {
        let response = TokenResponse {
            access_token: "at".to_string(),
            token_type: "bearer".to_string(),
            expires_in: 3600,
            refresh_token: None,
            scope: "mcp".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("refresh_token"));
    }
}
