// ABOUTME: Storage abstraction for clients, users, tokens and authorization codes
// ABOUTME: Defines the ClientStore trait implemented by pluggable backends
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Storage abstraction layer with pluggable backends.
//!
//! All mutable shared state of the authorization server lives behind
//! [`ClientStore`]. The backend is selected at startup and injected by
//! reference into every component; there is no global registry. The bundled
//! backend is [`memory::MemoryStore`]; a persistent implementation plugs in
//! at the same seam.

pub mod memory;

use crate::errors::AppResult;
use crate::models::{AuthenticatedUser, AuthorizationCode, Client, Token};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Outcome of an atomic authorization-code consumption attempt
#[derive(Debug)]
pub enum CodeConsumption {
    /// The code was valid and has now been marked used
    Fresh(AuthorizationCode),
    /// The code had already been exchanged; the tombstone carries the tokens
    /// minted on first use so the caller can revoke them
    Replayed(AuthorizationCode),
    /// Unknown, expired, or mismatched client/redirect URI
    Invalid,
}

/// Process-wide store for OAuth entities.
///
/// Implementations must be safe for concurrent invocation from arbitrary
/// request-handling threads. Check-and-insert operations (`create_client`,
/// `create_user`) and `consume_auth_code` must be atomic: concurrent calls
/// with the same key produce exactly one success.
#[async_trait]
pub trait ClientStore: Send + Sync {
    // ── Clients ─────────────────────────────────────────────────────────

    /// Insert a new client registration.
    ///
    /// # Errors
    /// Returns `ResourceAlreadyExists` if the client id is taken.
    async fn create_client(&self, client: Client) -> AppResult<()>;

    /// Look up a client by id.
    ///
    /// # Errors
    /// Returns an error only on backend failure; an unknown id is `Ok(None)`.
    async fn get_client(&self, client_id: &str) -> AppResult<Option<Client>>;

    /// Replace the stored secret hash for a client (secret rotation).
    ///
    /// # Errors
    /// Returns `ResourceNotFound` if the client does not exist.
    async fn rotate_client_secret(&self, client_id: &str, secret_hash: String) -> AppResult<()>;

    /// Remove a client, cascading to its users and their tokens.
    ///
    /// # Errors
    /// Returns an error only on backend failure; removing an unknown client
    /// is a no-op.
    async fn delete_client(&self, client_id: &str) -> AppResult<()>;

    // ── Users ───────────────────────────────────────────────────────────

    /// Insert a new user under a client.
    ///
    /// # Errors
    /// Returns `ResourceAlreadyExists` if the username is taken within the
    /// client.
    async fn create_user(&self, user: AuthenticatedUser) -> AppResult<()>;

    /// Look up a user within a client.
    ///
    /// # Errors
    /// Returns an error only on backend failure.
    async fn get_user(
        &self,
        client_id: &str,
        username: &str,
    ) -> AppResult<Option<AuthenticatedUser>>;

    /// Replace a stored user record (password change, consent update).
    ///
    /// # Errors
    /// Returns `ResourceNotFound` if the user does not exist.
    async fn update_user(&self, user: AuthenticatedUser) -> AppResult<()>;

    /// Remove a user, cascading to their tokens.
    ///
    /// # Errors
    /// Returns an error only on backend failure.
    async fn delete_user(&self, client_id: &str, username: &str) -> AppResult<()>;

    // ── Tokens ──────────────────────────────────────────────────────────

    /// Store an issued token keyed by its opaque string.
    ///
    /// # Errors
    /// Returns an error only on backend failure.
    async fn store_token(&self, token: Token) -> AppResult<()>;

    /// Look up a token by its opaque string.
    ///
    /// # Errors
    /// Returns an error only on backend failure.
    async fn get_token(&self, token: &str) -> AppResult<Option<Token>>;

    /// Remove a token, returning it if it was present.
    ///
    /// # Errors
    /// Returns an error only on backend failure; removing an unknown token
    /// is `Ok(None)`.
    async fn remove_token(&self, token: &str) -> AppResult<Option<Token>>;

    /// Atomically take a live refresh token belonging to the given client.
    ///
    /// The kind, client and expiry checks happen in the same critical
    /// section as the removal, so two concurrent rotations of one refresh
    /// token yield exactly one `Some`. A mismatch or expired token leaves
    /// the stored record untouched.
    ///
    /// # Errors
    /// Returns an error only on backend failure.
    async fn consume_refresh_token(
        &self,
        token: &str,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Token>>;

    /// Drop every token whose expiry has passed. Returns the removal count.
    ///
    /// # Errors
    /// Returns an error only on backend failure.
    async fn sweep_expired_tokens(&self, now: DateTime<Utc>) -> AppResult<usize>;

    // ── Authorization codes ─────────────────────────────────────────────

    /// Store a freshly minted authorization code.
    ///
    /// # Errors
    /// Returns an error only on backend failure.
    async fn store_auth_code(&self, code: AuthorizationCode) -> AppResult<()>;

    /// Atomically validate and consume an authorization code.
    ///
    /// Validates client id, redirect URI and expiry, flips the used flag,
    /// and records the token strings the caller is about to issue, all in
    /// the same critical section. Two concurrent exchanges of one code
    /// yield exactly one [`CodeConsumption::Fresh`], and the loser's
    /// [`CodeConsumption::Replayed`] tombstone always names the winner's
    /// tokens.
    ///
    /// # Errors
    /// Returns an error only on backend failure.
    async fn consume_auth_code(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        now: DateTime<Utc>,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> AppResult<CodeConsumption>;

    /// Drop every authorization code (used or not) whose expiry has passed.
    /// Returns the removal count.
    ///
    /// # Errors
    /// Returns an error only on backend failure.
    async fn sweep_expired_codes(&self, now: DateTime<Utc>) -> AppResult<usize>;
}
