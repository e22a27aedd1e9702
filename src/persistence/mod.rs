// ABOUTME: Persistence contract for the token authority and replication wire types
// ABOUTME: Pluggable backend support (in-memory, SQLite, Redis projection) behind one trait
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

/// Store factory for backend selection from configuration
pub mod factory;
/// In-memory store implementation
pub mod memory;
/// Redis authoritative store with SQLite projection
pub mod redis;
/// SQLite durable store adapter
pub mod sqlite;

use crate::models::{
    AuthorizationCodeRecord, ClientRecord, RefreshTokenReuseRecord, TokenRecord,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Storage contract consumed by the token authority.
///
/// The authority does not know whether it is talking to the replicated
/// Redis/SQLite layer or a simpler single-process store; this trait is
/// the seam for substituting persistence strategies (tests inject the
/// in-memory backend).
///
/// Every method that can touch the authoritative store may fail; those
/// failures abort the enclosing token operation because the fast store
/// is the source of truth for token state.
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    /// Look up an authorization code by value
    ///
    /// # Errors
    ///
    /// Returns an error if the authoritative store is unreachable
    async fn get_code(&self, code: &str) -> Result<Option<AuthorizationCodeRecord>>;

    /// Store an authorization code until its expiry
    ///
    /// # Errors
    ///
    /// Returns an error if the authoritative store rejects the write
    async fn set_code(&self, code: &str, value: &AuthorizationCodeRecord) -> Result<()>;

    /// Delete an authorization code (one-time-use consumption)
    ///
    /// # Errors
    ///
    /// Returns an error if the authoritative store is unreachable
    async fn delete_code(&self, code: &str) -> Result<()>;

    /// Look up an access token by value
    ///
    /// # Errors
    ///
    /// Returns an error if the authoritative store is unreachable
    async fn get_access_token(&self, token: &str) -> Result<Option<TokenRecord>>;

    /// Store an access token until its expiry
    ///
    /// # Errors
    ///
    /// Returns an error if the authoritative store rejects the write
    async fn set_access_token(&self, token: &str, value: &TokenRecord) -> Result<()>;

    /// Delete an access token (revocation or expiry eviction)
    ///
    /// # Errors
    ///
    /// Returns an error if the authoritative store is unreachable
    async fn delete_access_token(&self, token: &str) -> Result<()>;

    /// Look up a refresh token by value
    ///
    /// # Errors
    ///
    /// Returns an error if the authoritative store is unreachable
    async fn get_refresh_token(&self, token: &str) -> Result<Option<TokenRecord>>;

    /// Store a refresh token until its expiry
    ///
    /// # Errors
    ///
    /// Returns an error if the authoritative store rejects the write
    async fn set_refresh_token(&self, token: &str, value: &TokenRecord) -> Result<()>;

    /// Delete a refresh token
    ///
    /// # Errors
    ///
    /// Returns an error if the authoritative store is unreachable
    async fn delete_refresh_token(&self, token: &str) -> Result<()>;

    /// Atomically read and delete a refresh token.
    ///
    /// Two concurrent consumers of the same token must never both
    /// receive the record; rotation safety depends on this.
    ///
    /// # Errors
    ///
    /// Returns an error if the authoritative store is unreachable
    async fn consume_refresh_token(&self, token: &str) -> Result<Option<TokenRecord>>;

    /// Look up the reuse marker left behind by a rotation
    ///
    /// # Errors
    ///
    /// Returns an error if the authoritative store is unreachable
    async fn get_refresh_token_reuse(
        &self,
        old_refresh_token: &str,
    ) -> Result<Option<RefreshTokenReuseRecord>>;

    /// Store a reuse marker for the short replay window
    ///
    /// # Errors
    ///
    /// Returns an error if the authoritative store rejects the write
    async fn set_refresh_token_reuse(
        &self,
        old_refresh_token: &str,
        value: &RefreshTokenReuseRecord,
    ) -> Result<()>;

    /// Look up a registered client
    ///
    /// # Errors
    ///
    /// Returns an error if the authoritative store is unreachable
    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRecord>>;

    /// Store a registered client (no expiry)
    ///
    /// # Errors
    ///
    /// Returns an error if the authoritative store rejects the write
    async fn set_client(&self, client_id: &str, value: &ClientRecord) -> Result<()>;

    /// Sweep expired records, returning the count removed.
    ///
    /// Backends whose TTL mechanism is native (Redis) only sweep the
    /// durable tier; non-owners return 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the sweep fails
    async fn cleanup(&self) -> Result<u64>;

    /// Release background tasks, connections, and held locks
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to shut down cleanly
    async fn stop(&self) -> Result<()>;
}

/// Record kinds carried on the replication channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionEntity {
    /// Authorization codes
    Code,
    /// Access tokens
    AccessToken,
    /// Refresh tokens
    RefreshToken,
    /// Refresh-token reuse markers
    RefreshTokenReuse,
    /// Registered clients
    Client,
}

impl ProjectionEntity {
    /// All entities, in resync order
    pub const ALL: [Self; 5] = [
        Self::Code,
        Self::AccessToken,
        Self::RefreshToken,
        Self::RefreshTokenReuse,
        Self::Client,
    ];

    /// Key namespace segment used for this entity in the fast store
    #[must_use]
    pub const fn namespace(self) -> &'static str {
        match self {
            Self::Code => "codes",
            Self::AccessToken => "access_tokens",
            Self::RefreshToken => "refresh_tokens",
            Self::RefreshTokenReuse => "refresh_token_reuse",
            Self::Client => "clients",
        }
    }
}

/// Mutation operations carried on the replication channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOp {
    /// Upsert of a record
    Set,
    /// Removal of a record
    Delete,
}

/// Replication wire message published for every authoritative-store
/// mutation. JSON-encoded on a single named channel; no sequence
/// numbers are carried, so reapplication must be last-write-wins
/// idempotent per key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionMutation {
    /// Record kind
    pub entity: ProjectionEntity,
    /// Operation applied to the fast store
    pub operation: MutationOp,
    /// Record key within the entity namespace
    pub key: String,
    /// Record body for `set` operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Instance id of the publishing process, used to skip re-applying
    /// one's own mutations
    pub source_id: String,
}
