// ABOUTME: Client and user registry with credential verification
// ABOUTME: Validates redirect URIs, hashes secrets, and authenticates clients and users
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Registration and authentication of OAuth clients and their users.
//!
//! The registry is the only component that touches credential hashes; the
//! endpoints hand it plaintext secrets and get back yes/no answers or loaded
//! records.

use crate::crypto;
use crate::errors::{AppError, AppResult};
use crate::models::{parse_scope, AuthenticatedUser, Client, GrantType};
use crate::store::ClientStore;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// Client and user registry backed by the shared store
pub struct ClientRegistry {
    store: Arc<dyn ClientStore>,
}

impl ClientRegistry {
    /// Create a registry over the given store
    #[must_use]
    pub fn new(store: Arc<dyn ClientStore>) -> Self {
        Self { store }
    }

    /// Generate credentials for a new client registration.
    ///
    /// # Errors
    /// Returns an error if the RNG fails.
    pub fn generate_client_credentials() -> AppResult<(String, String)> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let client_secret = crypto::random_token(32)?;
        Ok((client_id, client_secret))
    }

    /// Register a new client.
    ///
    /// The secret is hashed before storage; the plaintext is never kept.
    /// Registration fails if the client id is already taken or the redirect
    /// URI does not meet the safety rules.
    ///
    /// # Errors
    /// Returns `InvalidInput` for a bad redirect URI, `ResourceAlreadyExists`
    /// for a duplicate client id, or a storage error.
    pub async fn register_client(
        &self,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        default_scope: Option<&str>,
        grant_types: Vec<GrantType>,
    ) -> AppResult<Client> {
        if client_id.is_empty() {
            return Err(AppError::invalid_input("client_id must not be empty"));
        }
        if client_secret.is_empty() {
            return Err(AppError::invalid_input("client_secret must not be empty"));
        }
        validate_redirect_uri(redirect_uri)?;

        let client = Client {
            client_id: client_id.to_owned(),
            secret_hash: crypto::hash_credential(client_secret)?,
            redirect_uri: redirect_uri.to_owned(),
            default_scope: default_scope.map(std::borrow::ToOwned::to_owned),
            grant_types,
            created_at: Utc::now(),
        };

        self.store.create_client(client.clone()).await?;
        info!(client_id = %client_id, "Registered OAuth client");
        Ok(client)
    }

    /// Look up a client by id.
    ///
    /// # Errors
    /// Returns `ResourceNotFound` for an unknown client id.
    pub async fn get_client(&self, client_id: &str) -> AppResult<Client> {
        self.store
            .get_client(client_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("client {client_id}")))
    }

    /// Authenticate a client by id and secret.
    ///
    /// # Errors
    /// Returns `AuthInvalid` for an unknown client or a wrong secret; the two
    /// cases are indistinguishable to the caller.
    pub async fn validate_client(&self, client_id: &str, client_secret: &str) -> AppResult<Client> {
        let rejected = || AppError::auth_invalid("invalid client credentials");

        let Some(client) = self.store.get_client(client_id).await? else {
            warn!(client_id = %client_id, "Authentication attempt for unknown client");
            return Err(rejected());
        };

        if crypto::verify_credential(client_secret, &client.secret_hash).is_err() {
            warn!(client_id = %client_id, "Client authentication failed");
            return Err(rejected());
        }
        Ok(client)
    }

    /// Replace a client's secret.
    ///
    /// # Errors
    /// Returns `ResourceNotFound` for an unknown client id.
    pub async fn rotate_client_secret(
        &self,
        client_id: &str,
        new_secret: &str,
    ) -> AppResult<()> {
        let hash = crypto::hash_credential(new_secret)?;
        self.store.rotate_client_secret(client_id, hash).await?;
        info!(client_id = %client_id, "Rotated client secret");
        Ok(())
    }

    /// Remove a client and everything registered under it.
    ///
    /// # Errors
    /// Returns an error only on storage failure.
    pub async fn delete_client(&self, client_id: &str) -> AppResult<()> {
        self.store.delete_client(client_id).await?;
        info!(client_id = %client_id, "Deleted OAuth client");
        Ok(())
    }

    /// Provision a user under an existing client.
    ///
    /// # Errors
    /// Returns `ResourceNotFound` for an unknown client, or
    /// `ResourceAlreadyExists` if the username is taken within the client.
    pub async fn create_user(
        &self,
        client_id: &str,
        username: &str,
        password: &str,
        granted_scopes: BTreeSet<String>,
    ) -> AppResult<AuthenticatedUser> {
        if username.is_empty() {
            return Err(AppError::invalid_input("username must not be empty"));
        }
        // Fail early on unknown clients rather than storing an orphan
        self.get_client(client_id).await?;

        let user = AuthenticatedUser {
            username: username.to_owned(),
            password_hash: crypto::hash_credential(password)?,
            client_id: client_id.to_owned(),
            granted_scopes,
            created_at: Utc::now(),
        };
        self.store.create_user(user.clone()).await?;
        info!(client_id = %client_id, username = %username, "Provisioned user");
        Ok(user)
    }

    /// Authenticate a user by username and password within a client.
    ///
    /// # Errors
    /// Returns `AuthInvalid` for an unknown user or a wrong password.
    pub async fn verify_user_password(
        &self,
        client_id: &str,
        username: &str,
        password: &str,
    ) -> AppResult<AuthenticatedUser> {
        let rejected = || AppError::auth_invalid("invalid username or password");

        let Some(user) = self.store.get_user(client_id, username).await? else {
            return Err(rejected());
        };

        if crypto::verify_credential(password, &user.password_hash).is_err() {
            warn!(client_id = %client_id, username = %username, "User authentication failed");
            return Err(rejected());
        }
        Ok(user)
    }

    /// Replace a user's password.
    ///
    /// # Errors
    /// Returns `ResourceNotFound` for an unknown user.
    pub async fn set_user_password(
        &self,
        client_id: &str,
        username: &str,
        new_password: &str,
    ) -> AppResult<()> {
        let Some(mut user) = self.store.get_user(client_id, username).await? else {
            return Err(AppError::not_found(format!(
                "user {username} for client {client_id}"
            )));
        };
        user.password_hash = crypto::hash_credential(new_password)?;
        self.store.update_user(user).await?;
        info!(client_id = %client_id, username = %username, "Password updated");
        Ok(())
    }

    /// Record the scopes a user has consented to for a client.
    ///
    /// # Errors
    /// Returns `ResourceNotFound` for an unknown user.
    pub async fn grant_scopes(
        &self,
        client_id: &str,
        username: &str,
        scopes: &BTreeSet<String>,
    ) -> AppResult<()> {
        let Some(mut user) = self.store.get_user(client_id, username).await? else {
            return Err(AppError::not_found(format!(
                "user {username} for client {client_id}"
            )));
        };
        user.granted_scopes.extend(scopes.iter().cloned());
        self.store.update_user(user).await
    }

    /// Resolve the effective scope set for an authorization request.
    ///
    /// An absent or empty `scope` parameter falls back to the client's
    /// registered default; a client with no default cannot accept scopeless
    /// requests.
    ///
    /// # Errors
    /// Returns `InvalidInput` when no scope was requested and the client has
    /// no default scope.
    pub fn resolve_scope(
        client: &Client,
        requested: Option<&str>,
    ) -> AppResult<BTreeSet<String>> {
        match requested.filter(|s| !s.trim().is_empty()) {
            Some(scope) => Ok(parse_scope(scope)),
            None => match &client.default_scope {
                Some(default) => Ok(parse_scope(default)),
                None => Err(AppError::invalid_input(
                    "no scope requested and client has no default scope",
                )),
            },
        }
    }
}

/// Redirect URI safety rules applied at registration time.
///
/// The URI must be absolute, carry no fragment, and use https except for
/// localhost development callbacks.
fn validate_redirect_uri(redirect_uri: &str) -> AppResult<()> {
    let url = Url::parse(redirect_uri)
        .map_err(|e| AppError::invalid_input(format!("invalid redirect_uri: {e}")))?;

    if url.fragment().is_some() {
        return Err(AppError::invalid_input(
            "redirect_uri must not contain a fragment",
        ));
    }
    if redirect_uri.contains('*') {
        return Err(AppError::invalid_input(
            "redirect_uri must not contain wildcards",
        ));
    }

    match url.scheme() {
        "https" => Ok(()),
        "http" => {
            let host = url.host_str().unwrap_or("");
            if host == "localhost" || host == "127.0.0.1" || host == "[::1]" {
                Ok(())
            } else {
                Err(AppError::invalid_input(
                    "http redirect_uri is only allowed for localhost",
                ))
            }
        }
        other => Err(AppError::invalid_input(format!(
            "unsupported redirect_uri scheme: {other}"
        ))),
    }
}
