// ABOUTME: Registered-client lookup seeded from out-of-band configuration
// ABOUTME: Validates redirect URIs at seed time; no dynamic registration endpoint
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use crate::models::ClientRecord;
use crate::persistence::{factory::Store, Persistence};
use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Read-through registry over the store's client records.
///
/// Clients are provisioned out-of-band (bootstrap config, deploy
/// tooling); the token authority only ever reads them.
#[derive(Clone)]
pub struct ClientRegistry {
    store: Arc<Store>,
}

impl ClientRegistry {
    #[must_use]
    pub const fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Seed bootstrap clients into the store.
    ///
    /// # Errors
    ///
    /// Returns an error if a client carries a disallowed redirect URI
    /// or the store rejects the write.
    pub async fn seed(&self, clients: &[ClientRecord]) -> Result<()> {
        for client in clients {
            if client.client_id.is_empty() {
                warn!("skipping bootstrap client with empty client_id");
                continue;
            }
            for uri in &client.redirect_uris {
                if !Self::is_valid_redirect_uri(uri) {
                    bail!("redirect_uri not allowed for {}: {uri}", client.client_id);
                }
            }
            self.store.set_client(&client.client_id, client).await?;
            info!(client_id = %client.client_id, "seeded OAuth client");
        }
        Ok(())
    }

    /// Look up a registered client
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable
    pub async fn get(&self, client_id: &str) -> Result<Option<ClientRecord>> {
        self.store.get_client(client_id).await
    }

    /// Redirect URIs must be https, or http to a loopback host
    fn is_valid_redirect_uri(uri: &str) -> bool {
        let Ok(parsed) = Url::parse(uri) else {
            return false;
        };
        match parsed.scheme() {
            "https" => true,
            "http" => matches!(parsed.host_str(), Some("localhost" | "127.0.0.1")),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_uri_policy() {
        assert!(ClientRegistry::is_valid_redirect_uri("https://example.com/cb"));
        assert!(ClientRegistry::is_valid_redirect_uri("http://localhost:3000/cb"));
        assert!(ClientRegistry::is_valid_redirect_uri("http://127.0.0.1/cb"));
        assert!(!ClientRegistry::is_valid_redirect_uri("http://example.com/cb"));
        assert!(!ClientRegistry::is_valid_redirect_uri("not a url"));
        assert!(!ClientRegistry::is_valid_redirect_uri("ftp://example.com"));
    }
}
