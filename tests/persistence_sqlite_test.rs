// ABOUTME: Integration tests for the SQLite durable store adapter
// ABOUTME: Tests CRUD per kind, read-only enforcement, cleanup, and crash durability
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use anyhow::Result;
use chrono::Utc;
use mcp_oauth_authority::config::AuthorityConfig;
use mcp_oauth_authority::models::{
    AuthorizationCodeRecord, ClientRecord, RefreshTokenReuseRecord, TokenRecord, TokenResponse,
};
use mcp_oauth_authority::oauth2::{s256_challenge, OAuthProvider};
use mcp_oauth_authority::oauth2::models::AuthorizationParams;
use mcp_oauth_authority::persistence::factory::Store;
use mcp_oauth_authority::persistence::sqlite::SqliteStore;
use mcp_oauth_authority::persistence::Persistence;
use std::sync::Arc;
use tempfile::TempDir;
use url::Url;

fn db_path(dir: &TempDir) -> String {
    dir.path().join("oauth.db").to_str().unwrap().to_string()
}

fn code_record(code: &str, expires_at: i64) -> AuthorizationCodeRecord {
    AuthorizationCodeRecord {
        code: code.to_string(),
        client_id: "c1".to_string(),
        redirect_uri: "https://cb".to_string(),
        code_challenge: "S256=abc".to_string(),
        scopes: vec!["mcp".to_string(), "profile".to_string()],
        resource: Some("https://mcp.example.com".to_string()),
        subject: "user-1".to_string(),
        extra: Some(serde_json::json!({"email": "user@example.com"})),
        expires_at,
    }
}

fn token_record(token: &str, expires_at: i64) -> TokenRecord {
    TokenRecord {
        token: token.to_string(),
        client_id: "c1".to_string(),
        scopes: vec!["mcp".to_string()],
        resource: None,
        subject: "user-1".to_string(),
        extra: None,
        expires_at,
    }
}

#[tokio::test]
async fn test_code_roundtrip_preserves_all_fields() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SqliteStore::open(&db_path(&dir), false).await?;
    let record = code_record("abc", Utc::now().timestamp() + 300);

    store.set_code("abc", &record).await?;
    let loaded = store.get_code("abc").await?.unwrap();
    assert_eq!(loaded.code, "abc");
    assert_eq!(loaded.scopes, record.scopes);
    assert_eq!(loaded.resource, record.resource);
    assert_eq!(loaded.extra, record.extra);
    assert_eq!(loaded.expires_at, record.expires_at);

    store.delete_code("abc").await?;
    assert!(store.get_code("abc").await?.is_none());
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn test_token_and_reuse_marker_roundtrip() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SqliteStore::open(&db_path(&dir), false).await?;
    let expires_at = Utc::now().timestamp() + 3600;

    store
        .set_access_token("at", &token_record("at", expires_at))
        .await?;
    store
        .set_refresh_token("rt", &token_record("rt", expires_at))
        .await?;
    assert!(store.get_access_token("at").await?.is_some());
    assert!(store.get_refresh_token("rt").await?.is_some());

    let marker = RefreshTokenReuseRecord {
        old_refresh_token: "rt-old".to_string(),
        client_id: "c1".to_string(),
        resource: None,
        scope_key: "mcp".to_string(),
        tokens: TokenResponse {
            access_token: "at2".to_string(),
            token_type: "bearer".to_string(),
            expires_in: 3600,
            refresh_token: Some("rt2".to_string()),
            scope: "mcp".to_string(),
        },
        expires_at: Utc::now().timestamp() + 60,
    };
    store.set_refresh_token_reuse("rt-old", &marker).await?;
    let loaded = store.get_refresh_token_reuse("rt-old").await?.unwrap();
    assert_eq!(loaded.tokens.access_token, "at2");
    assert_eq!(loaded.tokens.refresh_token.as_deref(), Some("rt2"));
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn test_client_roundtrip() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SqliteStore::open(&db_path(&dir), false).await?;
    let client = ClientRecord {
        client_id: "c1".to_string(),
        client_secret: "secret".to_string(),
        client_name: "Test".to_string(),
        redirect_uris: vec!["https://cb".to_string()],
        token_endpoint_auth_method: "client_secret_post".to_string(),
        grant_types: vec!["authorization_code".to_string()],
        response_types: vec!["code".to_string()],
        client_id_issued_at: Some(1_700_000_000),
        client_secret_expires_at: None,
    };

    store.set_client("c1", &client).await?;
    let loaded = store.get_client("c1").await?.unwrap();
    assert_eq!(loaded.redirect_uris, client.redirect_uris);
    assert_eq!(loaded.client_id_issued_at, Some(1_700_000_000));
    assert!(store.get_client("missing").await?.is_none());
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn test_consume_refresh_token_deletes_row() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SqliteStore::open(&db_path(&dir), false).await?;
    store
        .set_refresh_token("rt", &token_record("rt", Utc::now().timestamp() + 60))
        .await?;

    assert!(store.consume_refresh_token("rt").await?.is_some());
    assert!(store.consume_refresh_token("rt").await?.is_none());
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn test_read_only_handle_rejects_writes() -> Result<()> {
    let dir = TempDir::new()?;
    let path = db_path(&dir);

    // create and populate read-write, then reopen read-only
    let writer = SqliteStore::open(&path, false).await?;
    writer
        .set_code("abc", &code_record("abc", Utc::now().timestamp() + 300))
        .await?;
    writer.close().await;

    let reader = SqliteStore::open(&path, true).await?;
    assert!(reader.is_read_only());
    assert!(reader.get_code("abc").await?.is_some());
    assert!(reader
        .set_code("def", &code_record("def", Utc::now().timestamp() + 300))
        .await
        .is_err());
    assert!(reader.delete_code("abc").await.is_err());
    assert!(reader.cleanup().await.is_err());
    reader.close().await;
    Ok(())
}

#[tokio::test]
async fn test_read_only_open_fails_without_database() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.db");
    let result = SqliteStore::open(missing.to_str().unwrap(), true).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cleanup_returns_removed_count() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SqliteStore::open(&db_path(&dir), false).await?;
    let now = Utc::now().timestamp();

    store.set_code("live", &code_record("live", now + 300)).await?;
    store.set_code("dead", &code_record("dead", now - 300)).await?;
    store
        .set_access_token("dead", &token_record("dead", now - 300))
        .await?;
    store
        .set_refresh_token("dead", &token_record("dead", now - 300))
        .await?;

    let removed = store.cleanup().await?;
    assert_eq!(removed, 3);
    assert!(store.get_code("live").await?.is_some());
    assert!(store.get_code("dead").await?.is_none());
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn test_durability_across_handles() -> Result<()> {
    let dir = TempDir::new()?;
    let path = db_path(&dir);

    let first = SqliteStore::open(&path, false).await?;
    first
        .set_code("abc", &code_record("abc", Utc::now().timestamp() + 300))
        .await?;
    first.stop().await?;

    let second = SqliteStore::open(&path, false).await?;
    let loaded = second.get_code("abc").await?;
    assert!(loaded.is_some());
    second.close().await;
    Ok(())
}

/// A code issued through provider A is exchangeable through provider B
/// pointed at the same durable store.
#[tokio::test]
async fn test_code_survives_process_restart() -> Result<()> {
    let dir = TempDir::new()?;
    let path = db_path(&dir);
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let client = ClientRecord {
        client_id: "c1".to_string(),
        client_secret: String::new(),
        client_name: "Test".to_string(),
        redirect_uris: vec!["https://cb".to_string()],
        token_endpoint_auth_method: "none".to_string(),
        grant_types: vec!["authorization_code".to_string()],
        response_types: vec!["code".to_string()],
        client_id_issued_at: None,
        client_secret_expires_at: None,
    };

    let code = {
        let store = Arc::new(Store::Sqlite(SqliteStore::open(&path, false).await?));
        let provider = OAuthProvider::new(store, AuthorityConfig::default());
        let login = provider.authorize(
            &client,
            AuthorizationParams {
                redirect_uri: "https://cb".to_string(),
                state: None,
                scopes: vec!["mcp".to_string()],
                code_challenge: format!("S256={}", s256_challenge(verifier)),
                resource: None,
            },
        )?;
        let rid = Url::parse(login.as_str())?
            .query_pairs()
            .find(|(key, _)| key == "rid")
            .map(|(_, value)| value.into_owned())
            .unwrap();
        provider.set_subject(&rid, "user-1", None)?;
        let redirect = provider.approve(&rid).await?;
        let code = Url::parse(&redirect)?
            .query_pairs()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value.into_owned())
            .unwrap();
        provider.stop().await?;
        code
    };

    let store = Arc::new(Store::Sqlite(SqliteStore::open(&path, false).await?));
    let provider = OAuthProvider::new(store, AuthorityConfig::default());
    let tokens = provider
        .exchange_authorization_code(&client, &code, Some(verifier), None, None)
        .await?;
    assert_eq!(tokens.scope, "mcp");
    provider.stop().await?;
    Ok(())
}
