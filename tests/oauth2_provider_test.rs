// ABOUTME: Integration tests for the OAuth 2.0 token authority flows
// ABOUTME: Covers PKCE, one-time codes, refresh rotation, scopes, and revocation
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use anyhow::Result;
use mcp_oauth_authority::config::AuthorityConfig;
use mcp_oauth_authority::errors::OAuthError;
use mcp_oauth_authority::models::ClientRecord;
use mcp_oauth_authority::oauth2::models::{AuthorizationParams, RevocationRequest};
use mcp_oauth_authority::oauth2::{s256_challenge, OAuthProvider};
use mcp_oauth_authority::persistence::factory::Store;
use mcp_oauth_authority::persistence::memory::MemoryStore;
use std::sync::Arc;
use url::Url;

// RFC 7636 Appendix B test vector
const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

/// Helper: in-memory provider with default TTLs
fn memory_provider() -> OAuthProvider {
    OAuthProvider::new(
        Arc::new(Store::Memory(MemoryStore::new())),
        AuthorityConfig::default(),
    )
}

/// Helper: registered test client
fn test_client(client_id: &str) -> ClientRecord {
    ClientRecord {
        client_id: client_id.to_string(),
        client_secret: String::new(),
        client_name: "Test Client".to_string(),
        redirect_uris: vec!["https://cb".to_string()],
        token_endpoint_auth_method: "none".to_string(),
        grant_types: vec![
            "authorization_code".to_string(),
            "refresh_token".to_string(),
        ],
        response_types: vec!["code".to_string()],
        client_id_issued_at: None,
        client_secret_expires_at: None,
    }
}

fn authorization_params(challenge: &str, state: Option<&str>) -> AuthorizationParams {
    AuthorizationParams {
        redirect_uri: "https://cb".to_string(),
        state: state.map(ToString::to_string),
        scopes: vec!["mcp".to_string()],
        code_challenge: challenge.to_string(),
        resource: None,
    }
}

fn query_param(url: &str, name: &str) -> Option<String> {
    let parsed = Url::parse(url).expect("redirect should be a valid URL");
    parsed
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Helper: drive authorize -> login -> approve, returning the issued code
async fn issue_code(
    provider: &OAuthProvider,
    client: &ClientRecord,
    params: AuthorizationParams,
) -> Result<String> {
    let login = provider.authorize(client, params)?;
    let rid = query_param(login.as_str(), "rid").expect("login URL should carry rid");
    provider.set_subject(&rid, "user-1", None)?;
    let redirect = provider.approve(&rid).await?;
    Ok(query_param(&redirect, "code").expect("approve redirect should carry code"))
}

#[tokio::test]
async fn test_code_flow_with_rfc7636_vector() -> Result<()> {
    let provider = memory_provider();
    let client = test_client("c1");
    let code = issue_code(
        &provider,
        &client,
        authorization_params(&format!("S256={CHALLENGE}"), Some("xyz")),
    )
    .await?;

    let stored = provider.challenge_for_authorization_code(&code).await?;
    assert_eq!(stored, format!("S256={CHALLENGE}"));
    assert_eq!(s256_challenge(VERIFIER), CHALLENGE);

    let tokens = provider
        .exchange_authorization_code(&client, &code, Some(VERIFIER), Some("https://cb"), None)
        .await?;
    assert_eq!(tokens.token_type, "bearer");
    assert_eq!(tokens.scope, "mcp");
    assert!(tokens.refresh_token.is_some());
    assert!(tokens.expires_in > 0);

    let info = provider.verify_access_token(&tokens.access_token).await?;
    assert_eq!(info.client_id, "c1");
    assert_eq!(info.scopes, vec!["mcp".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_exchange_with_wrong_verifier_fails() -> Result<()> {
    let provider = memory_provider();
    let client = test_client("c1");
    let code = issue_code(
        &provider,
        &client,
        authorization_params(&format!("S256={CHALLENGE}"), None),
    )
    .await?;

    let result = provider
        .exchange_authorization_code(&client, &code, Some("wrong"), None, None)
        .await;
    assert!(matches!(result, Err(OAuthError::InvalidGrant(_))));
    Ok(())
}

#[tokio::test]
async fn test_exchange_requires_verifier_for_s256() -> Result<()> {
    let provider = memory_provider();
    let client = test_client("c1");
    let code = issue_code(
        &provider,
        &client,
        authorization_params(&format!("S256={CHALLENGE}"), None),
    )
    .await?;

    let result = provider
        .exchange_authorization_code(&client, &code, None, None, None)
        .await;
    assert!(matches!(result, Err(OAuthError::InvalidGrant(_))));
    Ok(())
}

#[tokio::test]
async fn test_one_time_code_use() -> Result<()> {
    let provider = memory_provider();
    let client = test_client("c1");
    let code = issue_code(
        &provider,
        &client,
        authorization_params(&format!("S256={CHALLENGE}"), None),
    )
    .await?;

    provider
        .exchange_authorization_code(&client, &code, Some(VERIFIER), None, None)
        .await?;
    let replay = provider
        .exchange_authorization_code(&client, &code, Some(VERIFIER), None, None)
        .await;
    assert!(matches!(replay, Err(OAuthError::InvalidGrant(_))));
    Ok(())
}

#[tokio::test]
async fn test_upstream_challenge_skips_pkce() -> Result<()> {
    let provider = memory_provider();
    let client = test_client("c1");
    // non-S256 challenge from an upstream identity provider: accepted
    // without a verifier
    let code = issue_code(&provider, &client, authorization_params("github=abc123", None)).await?;

    let tokens = provider
        .exchange_authorization_code(&client, &code, None, None, None)
        .await?;
    assert!(!tokens.access_token.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_exchange_validates_client_redirect_and_resource() -> Result<()> {
    let provider = memory_provider();
    let client = test_client("c1");

    let code = issue_code(
        &provider,
        &client,
        AuthorizationParams {
            redirect_uri: "https://cb".to_string(),
            state: None,
            scopes: vec!["mcp".to_string()],
            code_challenge: format!("S256={CHALLENGE}"),
            resource: Some("https://mcp.example.com".to_string()),
        },
    )
    .await?;

    let other_client = test_client("c2");
    let result = provider
        .exchange_authorization_code(&other_client, &code, Some(VERIFIER), None, None)
        .await;
    assert!(matches!(result, Err(OAuthError::InvalidGrant(_))));

    let result = provider
        .exchange_authorization_code(&client, &code, Some(VERIFIER), Some("https://evil"), None)
        .await;
    assert!(matches!(result, Err(OAuthError::InvalidGrant(_))));

    let result = provider
        .exchange_authorization_code(
            &client,
            &code,
            Some(VERIFIER),
            None,
            Some("https://other.example.com"),
        )
        .await;
    assert!(matches!(result, Err(OAuthError::InvalidGrant(_))));

    // the failed attempts never consumed the code
    let tokens = provider
        .exchange_authorization_code(
            &client,
            &code,
            Some(VERIFIER),
            Some("https://cb"),
            Some("https://mcp.example.com"),
        )
        .await?;
    assert!(!tokens.access_token.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unknown_code_fails() {
    let provider = memory_provider();
    let client = test_client("c1");
    let result = provider
        .exchange_authorization_code(&client, "no-such-code", Some(VERIFIER), None, None)
        .await;
    assert!(matches!(result, Err(OAuthError::InvalidGrant(_))));

    let challenge = provider.challenge_for_authorization_code("no-such-code").await;
    assert!(matches!(challenge, Err(OAuthError::InvalidGrant(_))));
}

#[tokio::test]
async fn test_approve_requires_subject() -> Result<()> {
    let provider = memory_provider();
    let client = test_client("c1");
    let login = provider.authorize(&client, authorization_params("S256=x", None))?;
    let rid = query_param(login.as_str(), "rid").unwrap();

    let result = provider.approve(&rid).await;
    assert!(matches!(result, Err(OAuthError::LoginRequired(_))));
    Ok(())
}

#[tokio::test]
async fn test_approve_is_single_use() -> Result<()> {
    let provider = memory_provider();
    let client = test_client("c1");
    let login = provider.authorize(&client, authorization_params("S256=x", None))?;
    let rid = query_param(login.as_str(), "rid").unwrap();
    provider.set_subject(&rid, "user-1", None)?;

    provider.approve(&rid).await?;
    let replay = provider.approve(&rid).await;
    assert!(matches!(replay, Err(OAuthError::InvalidRequest(_))));
    Ok(())
}

#[tokio::test]
async fn test_set_subject_unknown_request() {
    let provider = memory_provider();
    let result = provider.set_subject("nope", "user-1", None);
    assert!(matches!(result, Err(OAuthError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_deny_builds_error_redirect() -> Result<()> {
    let provider = memory_provider();
    let client = test_client("c1");
    let login = provider.authorize(&client, authorization_params("S256=x", Some("abc")))?;
    let rid = query_param(login.as_str(), "rid").unwrap();

    let redirect = provider.deny(&rid, None, Some("user said no"))?;
    assert_eq!(query_param(&redirect, "error").as_deref(), Some("access_denied"));
    assert_eq!(
        query_param(&redirect, "error_description").as_deref(),
        Some("user said no")
    );
    assert_eq!(query_param(&redirect, "state").as_deref(), Some("abc"));
    Ok(())
}

#[tokio::test]
async fn test_refresh_rotation_and_reuse_window() -> Result<()> {
    let provider = memory_provider();
    let client = test_client("c1");
    let code = issue_code(
        &provider,
        &client,
        authorization_params(&format!("S256={CHALLENGE}"), None),
    )
    .await?;
    let initial = provider
        .exchange_authorization_code(&client, &code, Some(VERIFIER), None, None)
        .await?;
    let old_refresh = initial.refresh_token.clone().unwrap();

    let rotated = provider
        .exchange_refresh_token(&client, &old_refresh, None, None)
        .await?;
    assert_ne!(rotated.access_token, initial.access_token);
    assert_ne!(rotated.refresh_token, initial.refresh_token);

    // replay within the reuse window returns the identical pair, not a
    // fresh rotation
    let replayed = provider
        .exchange_refresh_token(&client, &old_refresh, None, None)
        .await?;
    assert_eq!(replayed.access_token, rotated.access_token);
    assert_eq!(replayed.refresh_token, rotated.refresh_token);

    // the rotated-in refresh token works as normal
    let next = provider
        .exchange_refresh_token(&client, &rotated.refresh_token.clone().unwrap(), None, None)
        .await?;
    assert_ne!(next.access_token, rotated.access_token);
    Ok(())
}

#[tokio::test]
async fn test_scope_narrowing_and_escalation() -> Result<()> {
    let provider = memory_provider();
    let client = test_client("c1");
    let code = issue_code(
        &provider,
        &client,
        AuthorizationParams {
            redirect_uri: "https://cb".to_string(),
            state: None,
            scopes: vec!["mcp".to_string(), "profile".to_string()],
            code_challenge: format!("S256={CHALLENGE}"),
            resource: None,
        },
    )
    .await?;
    let initial = provider
        .exchange_authorization_code(&client, &code, Some(VERIFIER), None, None)
        .await?;
    let refresh = initial.refresh_token.unwrap();

    // escalation is rejected
    let escalated = provider
        .exchange_refresh_token(
            &client,
            &refresh,
            Some(&["mcp".to_string(), "admin".to_string()]),
            None,
        )
        .await;
    assert!(matches!(escalated, Err(OAuthError::InvalidScope(_))));

    // narrowing succeeds and the new access token carries exactly the
    // requested subset
    let narrowed = provider
        .exchange_refresh_token(&client, &refresh, Some(&["mcp".to_string()]), None)
        .await?;
    assert_eq!(narrowed.scope, "mcp");
    let info = provider.verify_access_token(&narrowed.access_token).await?;
    assert_eq!(info.scopes, vec!["mcp".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_refresh_with_wrong_client_fails() -> Result<()> {
    let provider = memory_provider();
    let client = test_client("c1");
    let code = issue_code(
        &provider,
        &client,
        authorization_params(&format!("S256={CHALLENGE}"), None),
    )
    .await?;
    let tokens = provider
        .exchange_authorization_code(&client, &code, Some(VERIFIER), None, None)
        .await?;

    let other = test_client("c2");
    let result = provider
        .exchange_refresh_token(&other, &tokens.refresh_token.unwrap(), None, None)
        .await;
    assert!(matches!(result, Err(OAuthError::InvalidGrant(_))));
    Ok(())
}

#[tokio::test]
async fn test_unknown_refresh_token_fails() {
    let provider = memory_provider();
    let client = test_client("c1");
    let result = provider
        .exchange_refresh_token(&client, "no-such-token", None, None)
        .await;
    assert!(matches!(result, Err(OAuthError::InvalidGrant(_))));
}

#[tokio::test]
async fn test_verify_unknown_token_fails() {
    let provider = memory_provider();
    let result = provider.verify_access_token("no-such-token").await;
    assert!(matches!(result, Err(OAuthError::InvalidToken(_))));
}

#[tokio::test]
async fn test_revocation_is_client_scoped_and_silent() -> Result<()> {
    let provider = memory_provider();
    let client = test_client("c1");
    let code = issue_code(
        &provider,
        &client,
        authorization_params(&format!("S256={CHALLENGE}"), None),
    )
    .await?;
    let tokens = provider
        .exchange_authorization_code(&client, &code, Some(VERIFIER), None, None)
        .await?;

    // another client revoking the token is a silent no-op
    let other = test_client("c2");
    provider
        .revoke_token(
            &other,
            &RevocationRequest {
                token: tokens.access_token.clone(),
                token_type_hint: None,
            },
        )
        .await?;
    assert!(provider.verify_access_token(&tokens.access_token).await.is_ok());

    // the owner revokes it for real
    provider
        .revoke_token(
            &client,
            &RevocationRequest {
                token: tokens.access_token.clone(),
                token_type_hint: Some("access_token".to_string()),
            },
        )
        .await?;
    let verify = provider.verify_access_token(&tokens.access_token).await;
    assert!(matches!(verify, Err(OAuthError::InvalidToken(_))));

    // revoking an unknown token never errors
    provider
        .revoke_token(
            &client,
            &RevocationRequest {
                token: "no-such-token".to_string(),
                token_type_hint: None,
            },
        )
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_revoke_refresh_token_by_hint() -> Result<()> {
    let provider = memory_provider();
    let client = test_client("c1");
    let code = issue_code(
        &provider,
        &client,
        authorization_params(&format!("S256={CHALLENGE}"), None),
    )
    .await?;
    let tokens = provider
        .exchange_authorization_code(&client, &code, Some(VERIFIER), None, None)
        .await?;
    let refresh = tokens.refresh_token.unwrap();

    provider
        .revoke_token(
            &client,
            &RevocationRequest {
                token: refresh.clone(),
                token_type_hint: Some("refresh_token".to_string()),
            },
        )
        .await?;
    let result = provider
        .exchange_refresh_token(&client, &refresh, None, None)
        .await;
    assert!(matches!(result, Err(OAuthError::InvalidGrant(_))));
    Ok(())
}
