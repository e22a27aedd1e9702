// ABOUTME: SQLite durable store adapter for crash recovery and cross-process reads
// ABOUTME: Supports read-write (projection owner) and read-only (follower) handles
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::Persistence;
use crate::models::{
    AuthorizationCodeRecord, ClientRecord, RefreshTokenReuseRecord, TokenRecord,
};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// Durable store adapter over an embedded SQLite database.
///
/// SQLite has no native TTL, so expired rows linger until `cleanup`
/// sweeps them; readers must treat the record's own `expires_at` as
/// authoritative. The projection lock guarantees at most one process
/// ever holds a read-write handle; any number of processes may hold
/// read-only handles concurrently.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    read_only: bool,
}

impl SqliteStore {
    /// Open the database at `path`.
    ///
    /// Read-write mode creates the parent directory and the file if
    /// missing and runs migrations; read-only mode fails when the file
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated
    pub async fn open(path: &str, read_only: bool) -> Result<Self> {
        if !read_only {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
            }
        }

        let url = if read_only {
            format!("sqlite:{path}?mode=ro")
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .with_context(|| format!("failed to open durable store at {path}"))?;

        let store = Self { pool, read_only };
        if !read_only {
            store.migrate().await?;
        }
        Ok(store)
    }

    /// Whether this handle was opened read-only
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Close the underlying connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            bail!("durable store is read-only");
        }
        Ok(())
    }

    /// Create tables and indexes if they do not exist
    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS codes (
                code TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                redirect_uri TEXT NOT NULL,
                code_challenge TEXT NOT NULL,
                scopes TEXT NOT NULL, -- JSON array
                resource TEXT,
                subject TEXT NOT NULL,
                extra TEXT, -- JSON object
                expires_at BIGINT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS access_tokens (
                token TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                scopes TEXT NOT NULL, -- JSON array
                resource TEXT,
                subject TEXT NOT NULL,
                extra TEXT, -- JSON object
                expires_at BIGINT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS refresh_tokens (
                token TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                scopes TEXT NOT NULL, -- JSON array
                resource TEXT,
                subject TEXT NOT NULL,
                extra TEXT, -- JSON object
                expires_at BIGINT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS refresh_token_reuse (
                old_refresh_token TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                resource TEXT,
                scope_key TEXT NOT NULL,
                tokens TEXT NOT NULL, -- JSON token response
                expires_at BIGINT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS oauth_clients (
                client_id TEXT PRIMARY KEY,
                client_secret TEXT NOT NULL,
                client_name TEXT NOT NULL,
                redirect_uris TEXT NOT NULL, -- JSON array
                token_endpoint_auth_method TEXT NOT NULL,
                grant_types TEXT NOT NULL, -- JSON array
                response_types TEXT NOT NULL, -- JSON array
                client_id_issued_at BIGINT,
                client_secret_expires_at BIGINT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Expiry sweeps scan these
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_codes_expires_at ON codes(expires_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_access_tokens_expires_at ON access_tokens(expires_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_expires_at ON refresh_tokens(expires_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn token_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TokenRecord> {
        let scopes: String = row.try_get("scopes")?;
        let extra: Option<String> = row.try_get("extra")?;
        Ok(TokenRecord {
            token: row.try_get("token")?,
            client_id: row.try_get("client_id")?,
            scopes: serde_json::from_str(&scopes)?,
            resource: row.try_get("resource")?,
            subject: row.try_get("subject")?,
            extra: extra.map(|raw| serde_json::from_str(&raw)).transpose()?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    async fn get_token_row(&self, table: &str, token: &str) -> Result<Option<TokenRecord>> {
        let row = sqlx::query(&format!("SELECT * FROM {table} WHERE token = ?"))
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::token_from_row).transpose()
    }

    async fn set_token_row(&self, table: &str, value: &TokenRecord) -> Result<()> {
        self.ensure_writable()?;
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO {table} (token, client_id, scopes, resource, subject, extra, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&value.token)
        .bind(&value.client_id)
        .bind(serde_json::to_string(&value.scopes)?)
        .bind(&value.resource)
        .bind(&value.subject)
        .bind(
            value
                .extra
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(value.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_token_row(&self, table: &str, token: &str) -> Result<()> {
        self.ensure_writable()?;
        sqlx::query(&format!("DELETE FROM {table} WHERE token = ?"))
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Persistence for SqliteStore {
    async fn get_code(&self, code: &str) -> Result<Option<AuthorizationCodeRecord>> {
        let row = sqlx::query("SELECT * FROM codes WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let scopes: String = row.try_get("scopes")?;
        let extra: Option<String> = row.try_get("extra")?;
        Ok(Some(AuthorizationCodeRecord {
            code: row.try_get("code")?,
            client_id: row.try_get("client_id")?,
            redirect_uri: row.try_get("redirect_uri")?,
            code_challenge: row.try_get("code_challenge")?,
            scopes: serde_json::from_str(&scopes)?,
            resource: row.try_get("resource")?,
            subject: row.try_get("subject")?,
            extra: extra.map(|raw| serde_json::from_str(&raw)).transpose()?,
            expires_at: row.try_get("expires_at")?,
        }))
    }

    async fn set_code(&self, _code: &str, value: &AuthorizationCodeRecord) -> Result<()> {
        self.ensure_writable()?;
        sqlx::query(
            "INSERT OR REPLACE INTO codes (code, client_id, redirect_uri, code_challenge, scopes, resource, subject, extra, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&value.code)
        .bind(&value.client_id)
        .bind(&value.redirect_uri)
        .bind(&value.code_challenge)
        .bind(serde_json::to_string(&value.scopes)?)
        .bind(&value.resource)
        .bind(&value.subject)
        .bind(
            value
                .extra
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(value.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_code(&self, code: &str) -> Result<()> {
        self.ensure_writable()?;
        sqlx::query("DELETE FROM codes WHERE code = ?")
            .bind(code)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_access_token(&self, token: &str) -> Result<Option<TokenRecord>> {
        self.get_token_row("access_tokens", token).await
    }

    async fn set_access_token(&self, _token: &str, value: &TokenRecord) -> Result<()> {
        self.set_token_row("access_tokens", value).await
    }

    async fn delete_access_token(&self, token: &str) -> Result<()> {
        self.delete_token_row("access_tokens", token).await
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<TokenRecord>> {
        self.get_token_row("refresh_tokens", token).await
    }

    async fn set_refresh_token(&self, _token: &str, value: &TokenRecord) -> Result<()> {
        self.set_token_row("refresh_tokens", value).await
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<()> {
        self.delete_token_row("refresh_tokens", token).await
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<Option<TokenRecord>> {
        // get-then-delete is race-free here only because the projection
        // lock admits a single writer process
        let Some(existing) = self.get_refresh_token(token).await? else {
            return Ok(None);
        };
        self.delete_refresh_token(token).await?;
        Ok(Some(existing))
    }

    async fn get_refresh_token_reuse(
        &self,
        old_refresh_token: &str,
    ) -> Result<Option<RefreshTokenReuseRecord>> {
        let row = sqlx::query("SELECT * FROM refresh_token_reuse WHERE old_refresh_token = ?")
            .bind(old_refresh_token)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let tokens: String = row.try_get("tokens")?;
        Ok(Some(RefreshTokenReuseRecord {
            old_refresh_token: row.try_get("old_refresh_token")?,
            client_id: row.try_get("client_id")?,
            resource: row.try_get("resource")?,
            scope_key: row.try_get("scope_key")?,
            tokens: serde_json::from_str(&tokens)?,
            expires_at: row.try_get("expires_at")?,
        }))
    }

    async fn set_refresh_token_reuse(
        &self,
        old_refresh_token: &str,
        value: &RefreshTokenReuseRecord,
    ) -> Result<()> {
        self.ensure_writable()?;
        sqlx::query(
            "INSERT OR REPLACE INTO refresh_token_reuse (old_refresh_token, client_id, resource, scope_key, tokens, expires_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(old_refresh_token)
        .bind(&value.client_id)
        .bind(&value.resource)
        .bind(&value.scope_key)
        .bind(serde_json::to_string(&value.tokens)?)
        .bind(value.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRecord>> {
        let row = sqlx::query("SELECT * FROM oauth_clients WHERE client_id = ?")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let redirect_uris: String = row.try_get("redirect_uris")?;
        let grant_types: String = row.try_get("grant_types")?;
        let response_types: String = row.try_get("response_types")?;
        Ok(Some(ClientRecord {
            client_id: row.try_get("client_id")?,
            client_secret: row.try_get("client_secret")?,
            client_name: row.try_get("client_name")?,
            redirect_uris: serde_json::from_str(&redirect_uris)?,
            token_endpoint_auth_method: row.try_get("token_endpoint_auth_method")?,
            grant_types: serde_json::from_str(&grant_types)?,
            response_types: serde_json::from_str(&response_types)?,
            client_id_issued_at: row.try_get("client_id_issued_at")?,
            client_secret_expires_at: row.try_get("client_secret_expires_at")?,
        }))
    }

    async fn set_client(&self, _client_id: &str, value: &ClientRecord) -> Result<()> {
        self.ensure_writable()?;
        sqlx::query(
            "INSERT OR REPLACE INTO oauth_clients (
                 client_id,
                 client_secret,
                 client_name,
                 redirect_uris,
                 token_endpoint_auth_method,
                 grant_types,
                 response_types,
                 client_id_issued_at,
                 client_secret_expires_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&value.client_id)
        .bind(&value.client_secret)
        .bind(&value.client_name)
        .bind(serde_json::to_string(&value.redirect_uris)?)
        .bind(&value.token_endpoint_auth_method)
        .bind(serde_json::to_string(&value.grant_types)?)
        .bind(serde_json::to_string(&value.response_types)?)
        .bind(value.client_id_issued_at)
        .bind(value.client_secret_expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cleanup(&self) -> Result<u64> {
        self.ensure_writable()?;
        let now = Utc::now().timestamp();
        let mut removed = 0;
        for table in [
            "codes",
            "access_tokens",
            "refresh_tokens",
            "refresh_token_reuse",
        ] {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE expires_at < ?"))
                .bind(now)
                .execute(&self.pool)
                .await?;
            removed += result.rows_affected();
        }
        if removed > 0 {
            tracing::info!("cleaned up {removed} expired records from durable store");
        }
        Ok(removed)
    }

    async fn stop(&self) -> Result<()> {
        self.close().await;
        Ok(())
    }
}
