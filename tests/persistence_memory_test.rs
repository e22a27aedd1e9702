// ABOUTME: Unit tests for the in-memory persistence backend
// ABOUTME: Tests expiry-on-read eviction, atomic consume, and the cleanup sweep
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use anyhow::Result;
use chrono::Utc;
use mcp_oauth_authority::models::{AuthorizationCodeRecord, TokenRecord};
use mcp_oauth_authority::persistence::memory::MemoryStore;
use mcp_oauth_authority::persistence::Persistence;

fn code_record(code: &str, expires_at: i64) -> AuthorizationCodeRecord {
    AuthorizationCodeRecord {
        code: code.to_string(),
        client_id: "c1".to_string(),
        redirect_uri: "https://cb".to_string(),
        code_challenge: "S256=abc".to_string(),
        scopes: vec!["mcp".to_string()],
        resource: None,
        subject: "user-1".to_string(),
        extra: None,
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
async fn test_code_roundtrip_and_delete() -> Result<()> {
    let store = MemoryStore::new();
    let record = code_record("abc", Utc::now().timestamp() + 60);

    store.set_code("abc", &record).await?;
    let loaded = store.get_code("abc").await?.unwrap();
    assert_eq!(loaded.client_id, "c1");

    store.delete_code("abc").await?;
    assert!(store.get_code("abc").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_expired_records_are_evicted_on_read() -> Result<()> {
    let store = MemoryStore::new();
    let past = Utc::now().timestamp() - 10;

    store.set_code("stale", &code_record("stale", past)).await?;
    store
        .set_access_token("stale", &token_record("stale", past))
        .await?;
    store
        .set_refresh_token("stale", &token_record("stale", past))
        .await?;

    assert!(store.get_code("stale").await?.is_none());
    assert!(store.get_access_token("stale").await?.is_none());
    assert!(store.get_refresh_token("stale").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_consume_refresh_token_is_one_shot() -> Result<()> {
    let store = MemoryStore::new();
    let record = token_record("rt", Utc::now().timestamp() + 60);
    store.set_refresh_token("rt", &record).await?;

    let first = store.consume_refresh_token("rt").await?;
    assert!(first.is_some());
    let second = store.consume_refresh_token("rt").await?;
    assert!(second.is_none());
    assert!(store.get_refresh_token("rt").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_consume_expired_refresh_token_misses() -> Result<()> {
    let store = MemoryStore::new();
    let record = token_record("rt", Utc::now().timestamp() - 10);
    store.set_refresh_token("rt", &record).await?;

    assert!(store.consume_refresh_token("rt").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_cleanup_counts_expired_records() -> Result<()> {
    let store = MemoryStore::new();
    let now = Utc::now().timestamp();

    store.set_code("live", &code_record("live", now + 60)).await?;
    store.set_code("dead", &code_record("dead", now - 60)).await?;
    store
        .set_access_token("dead", &token_record("dead", now - 60))
        .await?;
    store
        .set_refresh_token("dead", &token_record("dead", now - 60))
        .await?;

    let removed = store.cleanup().await?;
    assert_eq!(removed, 3);
    assert!(store.get_code("live").await?.is_some());
    Ok(())
}
