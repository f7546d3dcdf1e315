// ABOUTME: Token issuance, lookup, revocation, and background expiry sweeping
// ABOUTME: Mints opaque access/refresh tokens with TTL clamping and sibling links
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! The token issuer mints opaque bearer tokens and owns their lifecycle.
//!
//! Tokens are random strings with no embedded claims; everything about a
//! token lives in the store record keyed by the string. Expiry is enforced
//! lazily at lookup and reclaimed eagerly by the background sweeper.

use crate::config::{ttl_to_expiry, TokenConfig};
use crate::crypto;
use crate::errors::AppResult;
use crate::models::{Token, TokenKind, TokenOwner};
use crate::store::ClientStore;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Entropy of generated token strings, in bytes before base64 encoding
const TOKEN_BYTES: usize = 32;

/// Access and refresh token pair minted together
#[derive(Debug, Clone)]
pub struct TokenPair {
    /// The short-lived access token
    pub access: Token,
    /// The long-lived refresh token, linked to the access token
    pub refresh: Token,
}

/// Mints and manages bearer tokens over the shared store
pub struct TokenIssuer {
    store: Arc<dyn ClientStore>,
    config: TokenConfig,
}

impl TokenIssuer {
    /// Create an issuer over the given store
    #[must_use]
    pub fn new(store: Arc<dyn ClientStore>, config: TokenConfig) -> Self {
        Self { store, config }
    }

    /// Token lifetime settings in effect
    #[must_use]
    pub const fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Mint a standalone access token.
    ///
    /// `requested_ttl_secs` of `None` uses the configured default; any value
    /// is clamped to the configured maximum. A resulting TTL ≤ 0 means the
    /// token never expires.
    ///
    /// # Errors
    /// Returns an error on random-generation or storage failure.
    pub async fn issue_access_token(
        &self,
        owner: TokenOwner,
        client_id: &str,
        scopes: BTreeSet<String>,
        requested_ttl_secs: Option<i64>,
    ) -> AppResult<Token> {
        let now = Utc::now();
        let ttl = self
            .config
            .effective_ttl(requested_ttl_secs.unwrap_or(self.config.default_ttl_secs));

        let token = Token {
            token: crypto::random_token(TOKEN_BYTES)?,
            kind: TokenKind::Access,
            owner,
            client_id: client_id.to_owned(),
            scopes,
            issued_at: now,
            expires_at: ttl_to_expiry(ttl, now),
            sibling: None,
        };
        self.store.store_token(token.clone()).await?;
        debug!(client_id = %client_id, ttl_secs = ttl, "Issued access token");
        Ok(token)
    }

    /// Generate a fresh opaque token string without storing anything.
    ///
    /// Lets a caller reserve the strings of a future pair up front, e.g. to
    /// record them on an authorization-code tombstone in the same critical
    /// section that consumes the code.
    ///
    /// # Errors
    /// Returns an error on random-generation failure.
    pub fn mint_token_string() -> AppResult<String> {
        crypto::random_token(TOKEN_BYTES)
    }

    /// Mint an access/refresh token pair with sibling links.
    ///
    /// # Errors
    /// Returns an error on random-generation or storage failure.
    pub async fn issue_token_pair(
        &self,
        owner: TokenOwner,
        client_id: &str,
        scopes: BTreeSet<String>,
        requested_ttl_secs: Option<i64>,
    ) -> AppResult<TokenPair> {
        let access_str = Self::mint_token_string()?;
        let refresh_str = Self::mint_token_string()?;
        self.issue_token_pair_as(access_str, refresh_str, owner, client_id, scopes, requested_ttl_secs)
            .await
    }

    /// Mint an access/refresh token pair using pre-reserved token strings.
    ///
    /// # Errors
    /// Returns an error on storage failure.
    pub async fn issue_token_pair_as(
        &self,
        access_str: String,
        refresh_str: String,
        owner: TokenOwner,
        client_id: &str,
        scopes: BTreeSet<String>,
        requested_ttl_secs: Option<i64>,
    ) -> AppResult<TokenPair> {
        let now = Utc::now();
        let access_ttl = self
            .config
            .effective_ttl(requested_ttl_secs.unwrap_or(self.config.default_ttl_secs));

        let access = Token {
            token: access_str.clone(),
            kind: TokenKind::Access,
            owner: owner.clone(),
            client_id: client_id.to_owned(),
            scopes: scopes.clone(),
            issued_at: now,
            expires_at: ttl_to_expiry(access_ttl, now),
            sibling: Some(refresh_str.clone()),
        };
        let refresh = Token {
            token: refresh_str,
            kind: TokenKind::Refresh,
            owner,
            client_id: client_id.to_owned(),
            scopes,
            issued_at: now,
            expires_at: ttl_to_expiry(self.config.refresh_ttl_secs, now),
            sibling: Some(access_str),
        };

        self.store.store_token(access.clone()).await?;
        self.store.store_token(refresh.clone()).await?;
        debug!(client_id = %client_id, ttl_secs = access_ttl, "Issued token pair");
        Ok(TokenPair { access, refresh })
    }

    /// Look up a live token; expired tokens are treated as absent and removed.
    ///
    /// # Errors
    /// Returns an error only on storage failure.
    pub async fn lookup(&self, token: &str) -> AppResult<Option<Token>> {
        let Some(stored) = self.store.get_token(token).await? else {
            return Ok(None);
        };
        if stored.is_expired_at(Utc::now()) {
            self.store.remove_token(token).await?;
            return Ok(None);
        }
        Ok(Some(stored))
    }

    /// Revoke a token and its sibling, if any. Idempotent.
    ///
    /// # Errors
    /// Returns an error only on storage failure.
    pub async fn revoke(&self, token: &str) -> AppResult<()> {
        if let Some(removed) = self.store.remove_token(token).await? {
            if let Some(sibling) = &removed.sibling {
                self.store.remove_token(sibling).await?;
            }
            debug!(client_id = %removed.client_id, "Revoked token");
        }
        Ok(())
    }

    /// Drop expired tokens and authorization codes. Returns counts.
    ///
    /// # Errors
    /// Returns an error only on storage failure.
    pub async fn sweep(&self) -> AppResult<(usize, usize)> {
        let now = Utc::now();
        let tokens = self.store.sweep_expired_tokens(now).await?;
        let codes = self.store.sweep_expired_codes(now).await?;
        if tokens > 0 || codes > 0 {
            info!(tokens, codes, "Swept expired credentials");
        }
        Ok((tokens, codes))
    }

    /// Spawn the background sweeper task.
    ///
    /// Runs until the process exits; storage failures are logged and the
    /// loop continues.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let issuer = Arc::clone(self);
        let interval = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = issuer.sweep().await {
                    tracing::error!(error = %e, "Expiry sweep failed");
                }
            }
        })
    }
}
