// ABOUTME: Library entry point for the MCP OAuth authority
// ABOUTME: OAuth 2.0 code/PKCE/refresh flows over a replicated dual-tier store
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

#![deny(unsafe_code)]

//! # MCP OAuth Authority
//!
//! An OAuth 2.0 authorization-server core (authorization-code + PKCE +
//! refresh-token rotation) for MCP deployments, paired with a dual-tier
//! persistence layer: Redis as the authoritative hot path shared by
//! every process, mirrored into a durable SQLite projection by a single
//! leader-elected owner and replicated over pub/sub.
//!
//! HTTP routing, the login/consent UI, and client registration are the
//! caller's concern; this crate exposes the token authority and the
//! `Persistence` seam they plug into.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mcp_oauth_authority::config::{AuthorityConfig, StoreConfig};
//! use mcp_oauth_authority::oauth2::OAuthProvider;
//! use mcp_oauth_authority::persistence::factory::Store;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(Store::connect(&StoreConfig::from_env()).await?);
//! let provider = OAuthProvider::new(store, AuthorityConfig::from_env());
//!
//! let info = provider.verify_access_token("some-token").await;
//! assert!(info.is_err()); // unknown token
//! # Ok(())
//! # }
//! ```

/// Registered-client lookup seeded from out-of-band configuration
pub mod clients;

/// Configuration management for the authority and its stores
pub mod config;

/// Application constants and default configuration values
pub mod constants;

/// OAuth 2.0 error kinds with wire codes and HTTP mapping
pub mod errors;

/// Structured logging setup
pub mod logging;

/// Serializable record types shared across the persistence tiers
pub mod models;

/// The OAuth 2.0 token authority
pub mod oauth2;

/// Persistence contract and its pluggable backends
pub mod persistence;
