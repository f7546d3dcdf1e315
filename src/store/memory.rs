// ABOUTME: In-memory ClientStore backend on sharded concurrent maps
// ABOUTME: Provides the atomic check-and-insert and consume-once semantics the endpoints rely on
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::{ClientStore, CodeConsumption};
use crate::errors::{AppError, AppResult};
use crate::models::{AuthenticatedUser, AuthorizationCode, Client, Token, TokenKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// In-memory store backend.
///
/// Uses `DashMap` for fine-grained locking instead of a global `Mutex` to
/// reduce contention. Entry-level shard locks give the atomicity the trait
/// contract requires: a `get_mut` guard holds the shard lock, so
/// check-then-mutate sequences inside one guard are serialized per key.
/// Dropping the store drops all state; there is nothing to flush.
#[derive(Default)]
pub struct MemoryStore {
    clients: DashMap<String, Client>,
    /// Keyed by (`client_id`, `username`)
    users: DashMap<(String, String), AuthenticatedUser>,
    tokens: DashMap<String, Token>,
    codes: DashMap<String, AuthorizationCode>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn create_client(&self, client: Client) -> AppResult<()> {
        match self.clients.entry(client.client_id.clone()) {
            Entry::Occupied(_) => Err(AppError::already_exists(format!(
                "client {}",
                client.client_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(client);
                Ok(())
            }
        }
    }

    async fn get_client(&self, client_id: &str) -> AppResult<Option<Client>> {
        Ok(self.clients.get(client_id).map(|c| c.clone()))
    }

    async fn rotate_client_secret(&self, client_id: &str, secret_hash: String) -> AppResult<()> {
        match self.clients.get_mut(client_id) {
            Some(mut client) => {
                client.secret_hash = secret_hash;
                Ok(())
            }
            None => Err(AppError::not_found(format!("client {client_id}"))),
        }
    }

    async fn delete_client(&self, client_id: &str) -> AppResult<()> {
        self.clients.remove(client_id);
        // Cascade: users provisioned under the client and everything they own
        self.users.retain(|(cid, _), _| cid != client_id);
        self.tokens.retain(|_, token| token.client_id != client_id);
        self.codes.retain(|_, code| code.client_id != client_id);
        Ok(())
    }

    async fn create_user(&self, user: AuthenticatedUser) -> AppResult<()> {
        let key = (user.client_id.clone(), user.username.clone());
        match self.users.entry(key) {
            Entry::Occupied(_) => Err(AppError::already_exists(format!(
                "user {} for client {}",
                user.username, user.client_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(user);
                Ok(())
            }
        }
    }

    async fn get_user(
        &self,
        client_id: &str,
        username: &str,
    ) -> AppResult<Option<AuthenticatedUser>> {
        Ok(self
            .users
            .get(&(client_id.to_owned(), username.to_owned()))
            .map(|u| u.clone()))
    }

    async fn update_user(&self, user: AuthenticatedUser) -> AppResult<()> {
        let key = (user.client_id.clone(), user.username.clone());
        match self.users.get_mut(&key) {
            Some(mut stored) => {
                *stored = user;
                Ok(())
            }
            None => Err(AppError::not_found(format!(
                "user {} for client {}",
                user.username, user.client_id
            ))),
        }
    }

    async fn delete_user(&self, client_id: &str, username: &str) -> AppResult<()> {
        self.users
            .remove(&(client_id.to_owned(), username.to_owned()));
        self.tokens.retain(|_, token| {
            !(token.client_id == client_id
                && matches!(&token.owner, crate::models::TokenOwner::User { username: u } if u == username))
        });
        Ok(())
    }

    async fn store_token(&self, token: Token) -> AppResult<()> {
        self.tokens.insert(token.token.clone(), token);
        Ok(())
    }

    async fn get_token(&self, token: &str) -> AppResult<Option<Token>> {
        Ok(self.tokens.get(token).map(|t| t.clone()))
    }

    async fn remove_token(&self, token: &str) -> AppResult<Option<Token>> {
        Ok(self.tokens.remove(token).map(|(_, t)| t))
    }

    async fn consume_refresh_token(
        &self,
        token: &str,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Token>> {
        // remove_if evaluates the predicate under the shard lock, so the
        // validity checks and the removal are one critical section.
        Ok(self
            .tokens
            .remove_if(token, |_, stored| {
                stored.kind == TokenKind::Refresh
                    && stored.client_id == client_id
                    && !stored.is_expired_at(now)
            })
            .map(|(_, t)| t))
    }

    async fn sweep_expired_tokens(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let before = self.tokens.len();
        self.tokens.retain(|_, token| !token.is_expired_at(now));
        Ok(before.saturating_sub(self.tokens.len()))
    }

    async fn store_auth_code(&self, code: AuthorizationCode) -> AppResult<()> {
        self.codes.insert(code.code.clone(), code);
        Ok(())
    }

    async fn consume_auth_code(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        now: DateTime<Utc>,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> AppResult<CodeConsumption> {
        // The get_mut guard holds the shard lock for this key, so the
        // used-flag check, the flip, and the issued-token recording below
        // are a single critical section.
        let Some(mut stored) = self.codes.get_mut(code) else {
            return Ok(CodeConsumption::Invalid);
        };

        if stored.client_id != client_id
            || stored.redirect_uri != redirect_uri
            || now >= stored.expires_at
        {
            return Ok(CodeConsumption::Invalid);
        }

        if stored.used {
            return Ok(CodeConsumption::Replayed(stored.clone()));
        }

        stored.used = true;
        stored.issued_access_token = Some(access_token.to_owned());
        stored.issued_refresh_token = refresh_token.map(std::string::ToString::to_string);
        Ok(CodeConsumption::Fresh(stored.clone()))
    }

    async fn sweep_expired_codes(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let before = self.codes.len();
        self.codes.retain(|_, code| now < code.expires_at);
        Ok(before.saturating_sub(self.codes.len()))
    }
}
