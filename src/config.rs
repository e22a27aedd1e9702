// ABOUTME: Configuration types for the token authority and persistence layer
// ABOUTME: Handles env-driven settings for TTLs, Redis connection, lock, and projection
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Async-IO.org

use crate::constants::{oauth, redis, store};
use serde::{Deserialize, Serialize};
use std::env;

/// Token authority configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// Login surface URL the authorize step redirects to; the pending
    /// request id is appended as the `rid` query parameter
    pub login_url: String,
    /// Access token lifetime in seconds
    pub access_token_ttl_secs: i64,
    /// Refresh token lifetime in seconds
    pub refresh_token_ttl_secs: i64,
    /// Authorization code lifetime in seconds
    pub auth_code_ttl_secs: i64,
    /// Refresh-token reuse window in seconds
    pub refresh_reuse_window_secs: i64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            login_url: oauth::DEFAULT_LOGIN_URL.to_string(),
            access_token_ttl_secs: oauth::DEFAULT_ACCESS_TOKEN_TTL_SECS,
            refresh_token_ttl_secs: oauth::DEFAULT_REFRESH_TOKEN_TTL_SECS,
            auth_code_ttl_secs: oauth::DEFAULT_AUTH_CODE_TTL_SECS,
            refresh_reuse_window_secs: oauth::DEFAULT_REFRESH_REUSE_WINDOW_SECS,
        }
    }
}

impl AuthorityConfig {
    /// Load authority configuration from environment
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            login_url: env::var("OAUTH_LOGIN_URL")
                .unwrap_or_else(|_| oauth::DEFAULT_LOGIN_URL.to_string()),
            access_token_ttl_secs: env::var("OAUTH_ACCESS_TOKEN_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(oauth::DEFAULT_ACCESS_TOKEN_TTL_SECS),
            refresh_token_ttl_secs: env::var("OAUTH_REFRESH_TOKEN_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(oauth::DEFAULT_REFRESH_TOKEN_TTL_SECS),
            auth_code_ttl_secs: env::var("OAUTH_AUTH_CODE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(oauth::DEFAULT_AUTH_CODE_TTL_SECS),
            refresh_reuse_window_secs: env::var("OAUTH_REFRESH_REUSE_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(oauth::DEFAULT_REFRESH_REUSE_WINDOW_SECS),
        }
    }
}

/// Persistence backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis URL for the authoritative store; when absent the factory
    /// falls back to a single-process backend
    pub redis_url: Option<String>,
    /// Namespace prefix for every Redis key
    pub key_prefix: String,
    /// SQLite path for the durable projection; `None` disables durability
    pub database_path: Option<String>,
    /// Whether this process competes for projection ownership
    pub enable_projection: bool,
    /// Redis key holding the projection-owner lock
    pub lock_key: String,
    /// Projection lock TTL in seconds
    pub lock_ttl_secs: u64,
    /// Pub/sub channel for projection mutations
    pub projection_channel: String,
    /// Redis connection and retry configuration
    pub redis_connection: RedisConnectionConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: store::DEFAULT_KEY_PREFIX.to_string(),
            database_path: Some(store::DEFAULT_DATABASE_PATH.to_string()),
            enable_projection: true,
            lock_key: store::DEFAULT_LOCK_KEY.to_string(),
            lock_ttl_secs: store::DEFAULT_LOCK_TTL_SECS,
            projection_channel: store::DEFAULT_PROJECTION_CHANNEL.to_string(),
            redis_connection: RedisConnectionConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Load store configuration from environment.
    ///
    /// Setting `OAUTH_DATABASE_PATH` to an empty string disables the
    /// durable tier entirely.
    #[must_use]
    pub fn from_env() -> Self {
        let database_path = match env::var("OAUTH_DATABASE_PATH") {
            Ok(path) if path.is_empty() => None,
            Ok(path) => Some(path),
            Err(_) => Some(store::DEFAULT_DATABASE_PATH.to_string()),
        };
        Self {
            redis_url: env::var("REDIS_URL").ok(),
            key_prefix: env::var("OAUTH_STORE_KEY_PREFIX")
                .unwrap_or_else(|_| store::DEFAULT_KEY_PREFIX.to_string()),
            database_path,
            enable_projection: env::var("OAUTH_ENABLE_PROJECTION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
            lock_key: env::var("OAUTH_PROJECTION_LOCK_KEY")
                .unwrap_or_else(|_| store::DEFAULT_LOCK_KEY.to_string()),
            lock_ttl_secs: env::var("OAUTH_PROJECTION_LOCK_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(store::DEFAULT_LOCK_TTL_SECS),
            projection_channel: env::var("OAUTH_PROJECTION_CHANNEL")
                .unwrap_or_else(|_| store::DEFAULT_PROJECTION_CHANNEL.to_string()),
            redis_connection: RedisConnectionConfig::from_env(),
        }
    }
}

/// Redis connection and retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConnectionConfig {
    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,
    /// Response/command timeout in seconds
    pub response_timeout_secs: u64,
    /// Number of reconnection retries after a connection drop
    pub reconnection_retries: usize,
    /// Exponential backoff base for retry delays
    pub retry_exponent_base: u64,
    /// Maximum retry delay in milliseconds
    pub max_retry_delay_ms: u64,
    /// Number of retries for the initial connection at startup
    pub initial_connection_retries: u32,
    /// Initial retry delay in milliseconds (doubles with exponential backoff)
    pub initial_retry_delay_ms: u64,
}

impl Default for RedisConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: redis::CONNECTION_TIMEOUT_SECS,
            response_timeout_secs: redis::RESPONSE_TIMEOUT_SECS,
            reconnection_retries: redis::RECONNECTION_RETRIES,
            retry_exponent_base: redis::RETRY_EXPONENT_BASE,
            max_retry_delay_ms: redis::MAX_RETRY_DELAY_MS,
            initial_connection_retries: redis::INITIAL_CONNECTION_RETRIES,
            initial_retry_delay_ms: redis::INITIAL_RETRY_DELAY_MS,
        }
    }
}

impl RedisConnectionConfig {
    /// Load Redis connection configuration from environment
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            connection_timeout_secs: env::var("REDIS_CONNECTION_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(redis::CONNECTION_TIMEOUT_SECS),
            response_timeout_secs: env::var("REDIS_RESPONSE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(redis::RESPONSE_TIMEOUT_SECS),
            reconnection_retries: env::var("REDIS_RECONNECTION_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(redis::RECONNECTION_RETRIES),
            retry_exponent_base: env::var("REDIS_RETRY_EXPONENT_BASE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(redis::RETRY_EXPONENT_BASE),
            max_retry_delay_ms: env::var("REDIS_MAX_RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(redis::MAX_RETRY_DELAY_MS),
            initial_connection_retries: env::var("REDIS_INITIAL_CONNECTION_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(redis::INITIAL_CONNECTION_RETRIES),
            initial_retry_delay_ms: env::var("REDIS_INITIAL_RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(redis::INITIAL_RETRY_DELAY_MS),
        }
    }
}
