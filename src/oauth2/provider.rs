// ABOUTME: Token authority for the authorization-code, PKCE, and refresh-rotation flows
// ABOUTME: Owns the pending-authorization table; all durable state goes through the store
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use crate::clients::ClientRegistry;
use crate::config::AuthorityConfig;
use crate::constants::oauth;
use crate::errors::{OAuthError, OAuthResult};
use crate::models::{
    scope_key, AuthorizationCodeRecord, ClientRecord, RefreshTokenReuseRecord, TokenRecord,
    TokenResponse,
};
use crate::oauth2::models::{
    AuthInfo, AuthorizationParams, PendingAuthorization, RevocationRequest,
};
use crate::persistence::{factory::Store, Persistence};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use dashmap::DashMap;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;
use url::Url;
use uuid::Uuid;

/// Challenge prefix marking a PKCE challenge this authority issued and
/// must verify itself
const S256_TAG: &str = "S256=";

/// Compute the S256 PKCE challenge for a verifier (RFC 7636 §4.2)
#[must_use]
pub fn s256_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// OAuth 2.0 token authority.
///
/// Implements the authorization-code flow with PKCE, refresh-token
/// rotation with a short reuse window, and token verification and
/// revocation. All code/token state lives behind the injected
/// [`Persistence`] store; only the pending-authorization table is
/// process-local, so a crash between `authorize` and `approve` drops
/// the login attempt and nothing else.
pub struct OAuthProvider {
    /// Registered-client lookup for the HTTP layer
    pub clients: ClientRegistry,
    store: Arc<Store>,
    pending: DashMap<String, PendingAuthorization>,
    config: AuthorityConfig,
}

impl OAuthProvider {
    #[must_use]
    pub fn new(store: Arc<Store>, config: AuthorityConfig) -> Self {
        Self {
            clients: ClientRegistry::new(Arc::clone(&store)),
            store,
            pending: DashMap::new(),
            config,
        }
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    /// URL-safe 256-bit random value for codes and tokens
    fn random_token() -> OAuthResult<String> {
        let rng = SystemRandom::new();
        let mut bytes = [0u8; oauth::TOKEN_BYTES];
        rng.fill(&mut bytes)
            .map_err(|_| OAuthError::server_error("secure random generator failure"))?;
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Start an authorization flow.
    ///
    /// Records a pending authorization under a fresh request id and
    /// returns the login-surface URL the HTTP layer should redirect the
    /// end user to. No store round trip happens here.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if the configured login URL is unparsable
    pub fn authorize(
        &self,
        client: &ClientRecord,
        params: AuthorizationParams,
    ) -> OAuthResult<Url> {
        let request_id = Uuid::new_v4().to_string();
        self.pending.insert(
            request_id.clone(),
            PendingAuthorization {
                request_id: request_id.clone(),
                client_id: client.client_id.clone(),
                redirect_uri: params.redirect_uri,
                state: params.state,
                scopes: params.scopes,
                code_challenge: params.code_challenge,
                resource: params.resource,
                subject: None,
                extra: None,
                created_at: Self::now(),
                used: false,
            },
        );

        let mut login = Url::parse(&self.config.login_url)
            .map_err(|e| OAuthError::server_error(format!("invalid login URL: {e}")))?;
        login.query_pairs_mut().append_pair("rid", &request_id);
        Ok(login)
    }

    /// Look up a pending authorization for the login surface
    #[must_use]
    pub fn pending(&self, request_id: &str) -> Option<PendingAuthorization> {
        self.pending.get(request_id).map(|entry| entry.value().clone())
    }

    /// Attach the authenticated subject to a pending authorization.
    ///
    /// Pure in-memory mutation; pending records are never durable.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidRequest` if the pending record is missing
    pub fn set_subject(
        &self,
        request_id: &str,
        subject: &str,
        extra: Option<serde_json::Value>,
    ) -> OAuthResult<()> {
        let mut entry = self
            .pending
            .get_mut(request_id)
            .ok_or_else(|| OAuthError::invalid_request("unknown authorization request"))?;
        entry.subject = Some(subject.to_string());
        entry.extra = extra;
        Ok(())
    }

    /// Approve a pending authorization: mint a single-use code and
    /// build the client redirect.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidRequest` if the request is unknown or already
    /// consumed, `LoginRequired` if no subject was attached, and
    /// `ServerError` if the code cannot be persisted.
    pub async fn approve(&self, request_id: &str) -> OAuthResult<String> {
        let (redirect_uri, state, pending) = {
            let mut entry = self
                .pending
                .get_mut(request_id)
                .ok_or_else(|| OAuthError::invalid_request("unknown authorization request"))?;
            if entry.used {
                return Err(OAuthError::invalid_request(
                    "authorization request already used",
                ));
            }
            if entry.subject.is_none() {
                return Err(OAuthError::login_required(
                    "no authenticated subject for this authorization request",
                ));
            }
            if !entry.code_challenge.is_empty() && !entry.code_challenge.starts_with(S256_TAG) {
                // Trust decision, not a gap: a non-S256 challenge means an
                // upstream identity provider already ran its own PKCE check
                warn!(
                    request_id,
                    "accepting non-S256 code_challenge verified upstream"
                );
            }
            entry.used = true;
            (
                entry.redirect_uri.clone(),
                entry.state.clone(),
                entry.value().clone(),
            )
        };

        let code = Self::random_token()?;
        let record = AuthorizationCodeRecord {
            code: code.clone(),
            client_id: pending.client_id,
            redirect_uri: redirect_uri.clone(),
            code_challenge: pending.code_challenge,
            scopes: pending.scopes,
            resource: pending.resource,
            subject: pending.subject.unwrap_or_default(),
            extra: pending.extra,
            expires_at: Self::now() + self.config.auth_code_ttl_secs,
        };
        self.store.set_code(&code, &record).await?;

        let mut redirect = Url::parse(&redirect_uri)
            .map_err(|e| OAuthError::server_error(format!("invalid redirect URI: {e}")))?;
        {
            let mut query = redirect.query_pairs_mut();
            query.append_pair("code", &code);
            if let Some(state) = &state {
                query.append_pair("state", state);
            }
        }
        Ok(redirect.into())
    }

    /// Deny a pending authorization and build the error redirect.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidRequest` if the request is unknown and
    /// `ServerError` if the stored redirect URI is unparsable.
    pub fn deny(
        &self,
        request_id: &str,
        error: Option<&str>,
        description: Option<&str>,
    ) -> OAuthResult<String> {
        let (redirect_uri, state) = {
            let mut entry = self
                .pending
                .get_mut(request_id)
                .ok_or_else(|| OAuthError::invalid_request("unknown authorization request"))?;
            entry.used = true;
            (entry.redirect_uri.clone(), entry.state.clone())
        };

        let mut redirect = Url::parse(&redirect_uri)
            .map_err(|e| OAuthError::server_error(format!("invalid redirect URI: {e}")))?;
        {
            let mut query = redirect.query_pairs_mut();
            query.append_pair("error", error.unwrap_or("access_denied"));
            if let Some(description) = description {
                query.append_pair("error_description", description);
            }
            if let Some(state) = &state {
                query.append_pair("state", state);
            }
        }
        Ok(redirect.into())
    }

    /// Fetch the PKCE challenge stored with an authorization code, for
    /// upstream middleware that inspects it before the full exchange.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidGrant` if the code is unknown
    pub async fn challenge_for_authorization_code(&self, code: &str) -> OAuthResult<String> {
        let record = self
            .store
            .get_code(code)
            .await?
            .ok_or_else(|| OAuthError::invalid_grant("Authorization code not found"))?;
        Ok(record.code_challenge)
    }

    /// Exchange an authorization code for a token pair.
    ///
    /// The code is deleted before issuance so a crash mid-issuance can
    /// never leave a replayable code behind.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidGrant` on an unknown code, any client /
    /// redirect / resource mismatch, or a failed PKCE check.
    pub async fn exchange_authorization_code(
        &self,
        client: &ClientRecord,
        authorization_code: &str,
        code_verifier: Option<&str>,
        redirect_uri: Option<&str>,
        resource: Option<&str>,
    ) -> OAuthResult<TokenResponse> {
        let record = self
            .store
            .get_code(authorization_code)
            .await?
            .ok_or_else(|| OAuthError::invalid_grant("Authorization code not found"))?;

        if record.client_id != client.client_id {
            return Err(OAuthError::invalid_grant("Client ID mismatch"));
        }
        if let Some(redirect_uri) = redirect_uri {
            if redirect_uri != record.redirect_uri {
                return Err(OAuthError::invalid_grant("Redirect URI mismatch"));
            }
        }
        if let (Some(requested), Some(stored)) = (resource, record.resource.as_deref()) {
            if requested != stored {
                return Err(OAuthError::invalid_grant("Resource mismatch"));
            }
        }

        if !record.code_challenge.is_empty() {
            if let Some(expected) = record.code_challenge.strip_prefix(S256_TAG) {
                let verifier = code_verifier.ok_or_else(|| {
                    OAuthError::invalid_grant(
                        "code_verifier required when code_challenge is present",
                    )
                })?;
                let computed = s256_challenge(verifier);
                if !bool::from(computed.as_bytes().ct_eq(expected.as_bytes())) {
                    warn!(
                        client_id = %client.client_id,
                        "PKCE verification failed: code_verifier does not match code_challenge"
                    );
                    return Err(OAuthError::invalid_grant("PKCE verification failed"));
                }
            } else {
                // Upstream identity providers carry their own challenge
                // format and have already verified it
                warn!(
                    client_id = %client.client_id,
                    "skipping PKCE validation for non-S256 code_challenge issued upstream"
                );
            }
        }

        // one-time use: remove before issuing so a crash here burns the
        // code rather than allowing a replay
        self.store.delete_code(authorization_code).await?;

        self.issue_tokens(
            &record.client_id,
            &record.scopes,
            record.resource.as_deref(),
            &record.subject,
            record.extra.as_ref(),
        )
        .await
    }

    /// Rotate a refresh token into a new token pair.
    ///
    /// Near-simultaneous calls presenting the same token are served the
    /// same pair through the reuse marker instead of erroring.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidGrant` on an unknown/expired/mismatched token
    /// and `InvalidScope` when requested scopes exceed the grant.
    pub async fn exchange_refresh_token(
        &self,
        client: &ClientRecord,
        refresh_token: &str,
        scopes: Option<&[String]>,
        resource: Option<&str>,
    ) -> OAuthResult<TokenResponse> {
        let requested = scopes.filter(|scopes| !scopes.is_empty());
        let requested_key = requested.map(scope_key);

        if let Some(tokens) = self
            .refresh_reuse_replay(
                refresh_token,
                &client.client_id,
                requested_key.as_deref(),
                resource,
            )
            .await?
        {
            return Ok(tokens);
        }

        let Some(record) = self.store.get_refresh_token(refresh_token).await? else {
            // the rotation that deleted this token may have just finished
            if let Some(tokens) = self
                .refresh_reuse_replay(
                    refresh_token,
                    &client.client_id,
                    requested_key.as_deref(),
                    resource,
                )
                .await?
            {
                return Ok(tokens);
            }
            return Err(OAuthError::invalid_grant("Refresh token not found"));
        };

        if record.client_id != client.client_id {
            return Err(OAuthError::invalid_grant("Client ID mismatch"));
        }
        if let (Some(requested), Some(stored)) = (resource, record.resource.as_deref()) {
            if requested != stored {
                return Err(OAuthError::invalid_grant("Resource mismatch"));
            }
        }

        let now = Self::now();
        if record.expires_at <= now {
            self.store.delete_refresh_token(refresh_token).await?;
            return Err(OAuthError::invalid_grant("Refresh token expired"));
        }

        // narrowing is allowed, escalation is not
        let final_scopes: Vec<String> = requested
            .map_or_else(|| record.scopes.clone(), <[String]>::to_vec);
        for scope in &final_scopes {
            if !record.scopes.contains(scope) {
                return Err(OAuthError::invalid_scope(format!(
                    "Scope not authorized: {scope}"
                )));
            }
        }
        let final_key = scope_key(&final_scopes);

        let Some(consumed) = self.store.consume_refresh_token(refresh_token).await? else {
            // lost the consume race; the winner left a reuse marker
            if let Some(tokens) = self
                .refresh_reuse_replay(
                    refresh_token,
                    &client.client_id,
                    Some(&final_key),
                    resource,
                )
                .await?
            {
                return Ok(tokens);
            }
            return Err(OAuthError::invalid_grant("Refresh token not found"));
        };

        let tokens = self
            .issue_tokens(
                &consumed.client_id,
                &final_scopes,
                consumed.resource.as_deref(),
                &consumed.subject,
                consumed.extra.as_ref(),
            )
            .await?;

        let marker = RefreshTokenReuseRecord {
            old_refresh_token: refresh_token.to_string(),
            client_id: consumed.client_id.clone(),
            resource: resource
                .map(ToString::to_string)
                .or_else(|| consumed.resource.clone()),
            scope_key: final_key,
            tokens: tokens.clone(),
            expires_at: now + self.config.refresh_reuse_window_secs,
        };
        self.store
            .set_refresh_token_reuse(refresh_token, &marker)
            .await?;

        Ok(tokens)
    }

    /// Serve the cached pair for a just-rotated token, if the marker is
    /// unexpired and matches the caller's client, scopes, and resource.
    async fn refresh_reuse_replay(
        &self,
        refresh_token: &str,
        client_id: &str,
        scope_key: Option<&str>,
        resource: Option<&str>,
    ) -> OAuthResult<Option<TokenResponse>> {
        let Some(reuse) = self.store.get_refresh_token_reuse(refresh_token).await? else {
            return Ok(None);
        };
        if reuse.expires_at <= Self::now() {
            return Ok(None);
        }
        if reuse.client_id != client_id {
            return Ok(None);
        }
        if let Some(key) = scope_key {
            if reuse.scope_key != key {
                return Ok(None);
            }
        }
        if reuse.resource.as_deref() != resource {
            return Ok(None);
        }
        Ok(Some(reuse.tokens))
    }

    /// Verify an access token and return its grant.
    ///
    /// Expired tokens are evicted on read.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidToken` if the token is unknown or expired
    pub async fn verify_access_token(&self, token: &str) -> OAuthResult<AuthInfo> {
        let Some(record) = self.store.get_access_token(token).await? else {
            return Err(OAuthError::invalid_token("Access token not found"));
        };
        if record.expires_at <= Self::now() {
            self.store.delete_access_token(token).await?;
            return Err(OAuthError::invalid_token("Access token expired"));
        }
        Ok(AuthInfo {
            client_id: record.client_id,
            scopes: record.scopes,
            expires_at: record.expires_at,
            resource: record.resource,
            extra: record.extra,
        })
    }

    /// Best-effort revocation (RFC 7009).
    ///
    /// Deletes a matching access or refresh token owned by the calling
    /// client; silently succeeds otherwise so revocation never leaks
    /// whether a token exists.
    ///
    /// # Errors
    ///
    /// Fails only when the authoritative store is unreachable
    pub async fn revoke_token(
        &self,
        client: &ClientRecord,
        request: &RevocationRequest,
    ) -> OAuthResult<()> {
        let token = request.token.as_str();
        if token.is_empty() {
            return Ok(());
        }
        let hint = request.token_type_hint.as_deref();

        if hint.is_none() || hint == Some("access_token") {
            if let Some(record) = self.store.get_access_token(token).await? {
                if record.client_id == client.client_id {
                    self.store.delete_access_token(token).await?;
                }
            }
        }
        if hint.is_none() || hint == Some("refresh_token") {
            if let Some(record) = self.store.get_refresh_token(token).await? {
                if record.client_id == client.client_id {
                    self.store.delete_refresh_token(token).await?;
                }
            }
        }
        Ok(())
    }

    /// Sweep expired records from the store
    ///
    /// # Errors
    ///
    /// Fails if the sweep fails
    pub async fn cleanup(&self) -> OAuthResult<u64> {
        Ok(self.store.cleanup().await?)
    }

    /// Shut down the underlying store
    ///
    /// # Errors
    ///
    /// Fails if the store does not shut down cleanly
    pub async fn stop(&self) -> OAuthResult<()> {
        Ok(self.store.stop().await?)
    }

    /// Mint a paired access and refresh token for a grant
    async fn issue_tokens(
        &self,
        client_id: &str,
        scopes: &[String],
        resource: Option<&str>,
        subject: &str,
        extra: Option<&serde_json::Value>,
    ) -> OAuthResult<TokenResponse> {
        let now = Self::now();
        let access = Self::random_token()?;
        let refresh = Self::random_token()?;

        let access_record = TokenRecord {
            token: access.clone(),
            client_id: client_id.to_string(),
            scopes: scopes.to_vec(),
            resource: resource.map(ToString::to_string),
            subject: subject.to_string(),
            extra: extra.cloned(),
            expires_at: now + self.config.access_token_ttl_secs,
        };
        let refresh_record = TokenRecord {
            token: refresh.clone(),
            client_id: client_id.to_string(),
            scopes: scopes.to_vec(),
            resource: resource.map(ToString::to_string),
            subject: subject.to_string(),
            extra: extra.cloned(),
            expires_at: now + self.config.refresh_token_ttl_secs,
        };

        self.store.set_access_token(&access, &access_record).await?;
        self.store
            .set_refresh_token(&refresh, &refresh_record)
            .await?;

        Ok(TokenResponse {
            access_token: access,
            token_type: "bearer".to_string(),
            expires_in: self.config.access_token_ttl_secs,
            refresh_token: Some(refresh),
            scope: scopes.join(" "),
        })
    }
}
