// ABOUTME: OAuth 2.0 token authority implementing code, PKCE, and refresh flows
// ABOUTME: Builds on the Persistence contract; HTTP routing lives with the caller
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

/// Request/response shapes and the in-memory pending-authorization record
pub mod models;
/// The token authority itself
pub mod provider;

pub use provider::{s256_challenge, OAuthProvider};
