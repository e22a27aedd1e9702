// ABOUTME: Application constants and default configuration values
// ABOUTME: Centralizes TTLs, store key naming, and Redis connection defaults
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

/// OAuth token and authorization-code lifetime defaults
pub mod oauth {
    /// Access token lifetime in seconds (1 hour)
    pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 60 * 60;
    /// Refresh token lifetime in seconds (30 days)
    pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;
    /// Authorization code lifetime in seconds (5 minutes)
    pub const DEFAULT_AUTH_CODE_TTL_SECS: i64 = 5 * 60;
    /// Window during which a rotated refresh token still replays the
    /// same token pair instead of erroring (seconds)
    pub const DEFAULT_REFRESH_REUSE_WINDOW_SECS: i64 = 60;
    /// Entropy of generated codes and tokens in bytes (256 bits)
    pub const TOKEN_BYTES: usize = 32;
    /// Default login surface the authorize step redirects to
    pub const DEFAULT_LOGIN_URL: &str = "http://localhost:8080/login";
}

/// Store key naming, projection lock, and replication channel defaults
pub mod store {
    /// Namespace prefix for every Redis key written by this crate
    pub const DEFAULT_KEY_PREFIX: &str = "mcp_oauth";
    /// Default SQLite database path for the durable projection
    pub const DEFAULT_DATABASE_PATH: &str = "data/oauth_authority.db";
    /// Redis key holding the projection-owner lock
    pub const DEFAULT_LOCK_KEY: &str = "mcp_oauth:projection_lock";
    /// Projection-owner lock TTL in seconds; renewal runs at a third of this
    pub const DEFAULT_LOCK_TTL_SECS: u64 = 30;
    /// Pub/sub channel carrying projection mutations between processes
    pub const DEFAULT_PROJECTION_CHANNEL: &str = "mcp_oauth:projection";
    /// Keys scanned per SCAN iteration during the owner resync
    pub const RESYNC_SCAN_COUNT: u64 = 200;
    /// Floor for the TTL recomputed when repairing a Redis entry from
    /// the durable store (seconds)
    pub const MIN_REPAIR_TTL_SECS: i64 = 1;
}

/// Redis connection and retry defaults
pub mod redis {
    /// Connection timeout in seconds
    pub const CONNECTION_TIMEOUT_SECS: u64 = 5;
    /// Response/command timeout in seconds
    pub const RESPONSE_TIMEOUT_SECS: u64 = 5;
    /// Reconnection retries after a dropped connection
    pub const RECONNECTION_RETRIES: usize = 6;
    /// Exponential backoff base for retry delays
    pub const RETRY_EXPONENT_BASE: u64 = 2;
    /// Maximum retry delay in milliseconds
    pub const MAX_RETRY_DELAY_MS: u64 = 10_000;
    /// Retries for the initial connection at startup
    pub const INITIAL_CONNECTION_RETRIES: u32 = 3;
    /// Initial retry delay in milliseconds (doubles with backoff)
    pub const INITIAL_RETRY_DELAY_MS: u64 = 500;
}
