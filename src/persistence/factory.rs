// ABOUTME: Store factory for configuration-based backend selection
// ABOUTME: Picks Redis projection, plain SQLite, or in-memory and delegates the contract
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::memory::MemoryStore;
use super::redis::RedisProjectionStore;
use super::sqlite::SqliteStore;
use super::Persistence;
use crate::config::StoreConfig;
use crate::models::{
    AuthorizationCodeRecord, ClientRecord, RefreshTokenReuseRecord, TokenRecord,
};
use anyhow::Result;
use tracing::info;

/// Unified store over the pluggable persistence backends
pub enum Store {
    /// In-memory store, no durability
    Memory(MemoryStore),
    /// Single-process durable SQLite store
    Sqlite(SqliteStore),
    /// Multi-process Redis store with SQLite projection
    Redis(RedisProjectionStore),
}

impl Store {
    /// Create a store instance based on configuration.
    ///
    /// A configured Redis URL selects the replicated backend; otherwise
    /// a database path selects plain SQLite; with neither, records live
    /// in process memory only.
    ///
    /// # Errors
    ///
    /// Returns an error if the selected backend fails to initialize
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        if config.redis_url.is_some() {
            info!("initializing Redis store with durable projection");
            return Ok(Self::Redis(RedisProjectionStore::connect(config).await?));
        }
        if let Some(path) = config.database_path.as_deref() {
            info!("initializing single-process SQLite store at {path}");
            return Ok(Self::Sqlite(SqliteStore::open(path, false).await?));
        }
        info!("initializing in-memory store (records will not survive restarts)");
        Ok(Self::Memory(MemoryStore::new()))
    }

    /// Create a store from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if the selected backend fails to initialize
    pub async fn from_env() -> Result<Self> {
        Self::connect(&StoreConfig::from_env()).await
    }
}

#[async_trait::async_trait]
impl Persistence for Store {
    async fn get_code(&self, code: &str) -> Result<Option<AuthorizationCodeRecord>> {
        match self {
            Self::Memory(store) => store.get_code(code).await,
            Self::Sqlite(store) => store.get_code(code).await,
            Self::Redis(store) => store.get_code(code).await,
        }
    }

    async fn set_code(&self, code: &str, value: &AuthorizationCodeRecord) -> Result<()> {
        match self {
            Self::Memory(store) => store.set_code(code, value).await,
            Self::Sqlite(store) => store.set_code(code, value).await,
            Self::Redis(store) => store.set_code(code, value).await,
        }
    }

    async fn delete_code(&self, code: &str) -> Result<()> {
        match self {
            Self::Memory(store) => store.delete_code(code).await,
            Self::Sqlite(store) => store.delete_code(code).await,
            Self::Redis(store) => store.delete_code(code).await,
        }
    }

    async fn get_access_token(&self, token: &str) -> Result<Option<TokenRecord>> {
        match self {
            Self::Memory(store) => store.get_access_token(token).await,
            Self::Sqlite(store) => store.get_access_token(token).await,
            Self::Redis(store) => store.get_access_token(token).await,
        }
    }

    async fn set_access_token(&self, token: &str, value: &TokenRecord) -> Result<()> {
        match self {
            Self::Memory(store) => store.set_access_token(token, value).await,
            Self::Sqlite(store) => store.set_access_token(token, value).await,
            Self::Redis(store) => store.set_access_token(token, value).await,
        }
    }

    async fn delete_access_token(&self, token: &str) -> Result<()> {
        match self {
            Self::Memory(store) => store.delete_access_token(token).await,
            Self::Sqlite(store) => store.delete_access_token(token).await,
            Self::Redis(store) => store.delete_access_token(token).await,
        }
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<TokenRecord>> {
        match self {
            Self::Memory(store) => store.get_refresh_token(token).await,
            Self::Sqlite(store) => store.get_refresh_token(token).await,
            Self::Redis(store) => store.get_refresh_token(token).await,
        }
    }

    async fn set_refresh_token(&self, token: &str, value: &TokenRecord) -> Result<()> {
        match self {
            Self::Memory(store) => store.set_refresh_token(token, value).await,
            Self::Sqlite(store) => store.set_refresh_token(token, value).await,
            Self::Redis(store) => store.set_refresh_token(token, value).await,
        }
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<()> {
        match self {
            Self::Memory(store) => store.delete_refresh_token(token).await,
            Self::Sqlite(store) => store.delete_refresh_token(token).await,
            Self::Redis(store) => store.delete_refresh_token(token).await,
        }
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<Option<TokenRecord>> {
        match self {
            Self::Memory(store) => store.consume_refresh_token(token).await,
            Self::Sqlite(store) => store.consume_refresh_token(token).await,
            Self::Redis(store) => store.consume_refresh_token(token).await,
        }
    }

    async fn get_refresh_token_reuse(
        &self,
        old_refresh_token: &str,
    ) -> Result<Option<RefreshTokenReuseRecord>> {
        match self {
            Self::Memory(store) => store.get_refresh_token_reuse(old_refresh_token).await,
            Self::Sqlite(store) => store.get_refresh_token_reuse(old_refresh_token).await,
            Self::Redis(store) => store.get_refresh_token_reuse(old_refresh_token).await,
        }
    }

    async fn set_refresh_token_reuse(
        &self,
        old_refresh_token: &str,
        value: &RefreshTokenReuseRecord,
    ) -> Result<()> {
        match self {
            Self::Memory(store) => {
                store.set_refresh_token_reuse(old_refresh_token, value).await
            }
            Self::Sqlite(store) => {
                store.set_refresh_token_reuse(old_refresh_token, value).await
            }
            Self::Redis(store) => {
                store.set_refresh_token_reuse(old_refresh_token, value).await
            }
        }
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRecord>> {
        match self {
            Self::Memory(store) => store.get_client(client_id).await,
            Self::Sqlite(store) => store.get_client(client_id).await,
            Self::Redis(store) => store.get_client(client_id).await,
        }
    }

    async fn set_client(&self, client_id: &str, value: &ClientRecord) -> Result<()> {
        match self {
            Self::Memory(store) => store.set_client(client_id, value).await,
            Self::Sqlite(store) => store.set_client(client_id, value).await,
            Self::Redis(store) => store.set_client(client_id, value).await,
        }
    }

    async fn cleanup(&self) -> Result<u64> {
        match self {
            Self::Memory(store) => store.cleanup().await,
            Self::Sqlite(store) => store.cleanup().await,
            Self::Redis(store) => store.cleanup().await,
        }
    }

    async fn stop(&self) -> Result<()> {
        match self {
            Self::Memory(store) => store.stop().await,
            Self::Sqlite(store) => store.stop().await,
            Self::Redis(store) => store.stop().await,
        }
    }
}
