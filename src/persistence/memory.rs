// ABOUTME: In-memory persistence implementation with expiry-on-read eviction
// ABOUTME: Test substitute and zero-dependency fallback; offers no durability
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::Persistence;
use crate::models::{
    AuthorizationCodeRecord, ClientRecord, RefreshTokenReuseRecord, TokenRecord,
};
use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;

/// In-memory store backed by concurrent maps.
///
/// Expired records are evicted on read so callers observe the same
/// miss behavior the TTL-native backend produces. `DashMap::remove`
/// gives the atomic get-and-delete that refresh-token consumption
/// requires within a single process.
#[derive(Clone, Default)]
pub struct MemoryStore {
    codes: Arc<DashMap<String, AuthorizationCodeRecord>>,
    access_tokens: Arc<DashMap<String, TokenRecord>>,
    refresh_tokens: Arc<DashMap<String, TokenRecord>>,
    reuse_markers: Arc<DashMap<String, RefreshTokenReuseRecord>>,
    clients: Arc<DashMap<String, ClientRecord>>,
}

impl MemoryStore {
    /// Create an empty in-memory store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    /// Read an entry, evicting it instead when its expiry has passed.
    /// The read guard must be released before the eviction touches the
    /// same shard again.
    fn get_live<V: Clone>(
        map: &DashMap<String, V>,
        key: &str,
        expires_at: impl Fn(&V) -> i64,
    ) -> Option<V> {
        if let Some(entry) = map.get(key) {
            if expires_at(entry.value()) > Self::now() {
                return Some(entry.value().clone());
            }
        }
        map.remove_if(key, |_, value| expires_at(value) <= Self::now());
        None
    }

    /// Remove entries whose expiry has passed, returning the count removed
    fn prune<V>(map: &DashMap<String, V>, expires_at: impl Fn(&V) -> i64) -> u64 {
        let now = Self::now();
        let before = map.len();
        map.retain(|_, value| expires_at(value) > now);
        (before - map.len()) as u64
    }
}

#[async_trait::async_trait]
impl Persistence for MemoryStore {
    async fn get_code(&self, code: &str) -> Result<Option<AuthorizationCodeRecord>> {
        Ok(Self::get_live(&self.codes, code, |record| {
            record.expires_at
        }))
    }

    async fn set_code(&self, code: &str, value: &AuthorizationCodeRecord) -> Result<()> {
        self.codes.insert(code.to_string(), value.clone());
        Ok(())
    }

    async fn delete_code(&self, code: &str) -> Result<()> {
        self.codes.remove(code);
        Ok(())
    }

    async fn get_access_token(&self, token: &str) -> Result<Option<TokenRecord>> {
        Ok(Self::get_live(&self.access_tokens, token, |record| {
            record.expires_at
        }))
    }

    async fn set_access_token(&self, token: &str, value: &TokenRecord) -> Result<()> {
        self.access_tokens.insert(token.to_string(), value.clone());
        Ok(())
    }

    async fn delete_access_token(&self, token: &str) -> Result<()> {
        self.access_tokens.remove(token);
        Ok(())
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<TokenRecord>> {
        Ok(Self::get_live(&self.refresh_tokens, token, |record| {
            record.expires_at
        }))
    }

    async fn set_refresh_token(&self, token: &str, value: &TokenRecord) -> Result<()> {
        self.refresh_tokens.insert(token.to_string(), value.clone());
        Ok(())
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<()> {
        self.refresh_tokens.remove(token);
        Ok(())
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<Option<TokenRecord>> {
        match self.refresh_tokens.remove(token) {
            Some((_, record)) if record.expires_at > Self::now() => Ok(Some(record)),
            _ => Ok(None),
        }
    }

    async fn get_refresh_token_reuse(
        &self,
        old_refresh_token: &str,
    ) -> Result<Option<RefreshTokenReuseRecord>> {
        Ok(Self::get_live(
            &self.reuse_markers,
            old_refresh_token,
            |record| record.expires_at,
        ))
    }

    async fn set_refresh_token_reuse(
        &self,
        old_refresh_token: &str,
        value: &RefreshTokenReuseRecord,
    ) -> Result<()> {
        self.reuse_markers
            .insert(old_refresh_token.to_string(), value.clone());
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRecord>> {
        Ok(self
            .clients
            .get(client_id)
            .map(|entry| entry.value().clone()))
    }

    async fn set_client(&self, client_id: &str, value: &ClientRecord) -> Result<()> {
        self.clients.insert(client_id.to_string(), value.clone());
        Ok(())
    }

    async fn cleanup(&self) -> Result<u64> {
        let mut removed = 0;
        removed += Self::prune(&self.codes, |record| record.expires_at);
        removed += Self::prune(&self.access_tokens, |record| record.expires_at);
        removed += Self::prune(&self.refresh_tokens, |record| record.expires_at);
        removed += Self::prune(&self.reuse_markers, |record| record.expires_at);
        if removed > 0 {
            tracing::debug!("cleaned up {removed} expired in-memory records");
        }
        Ok(removed)
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}
