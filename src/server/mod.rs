// ABOUTME: HTTP server layer tying the registry, issuer and store to axum handlers
// ABOUTME: Holds shared application state and the cookie-identified authorization sessions
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! HTTP surface of the authorization server.
//!
//! Handlers are thin: they parse the wire format, call into the registry and
//! issuer, and render responses. All protocol decisions that matter for
//! security (when to redirect vs. respond in-process, single-use codes,
//! cache suppression) live here.

pub mod authorize;
pub mod models;
pub mod token;
pub mod validate;

use crate::config::ServerConfig;
use crate::crypto;
use crate::errors::AppResult;
use crate::issuer::TokenIssuer;
use crate::registry::ClientRegistry;
use crate::store::ClientStore;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Cookie carrying the authorization-session id through the login/consent flow
pub const SESSION_COOKIE: &str = "tollgate_session";

/// Sessions are short-lived; an abandoned login page should not linger
const SESSION_TTL_MINUTES: i64 = 10;

/// Server-side state of one interactive authorization flow.
///
/// Created by `GET /authorize` after the request survives client and
/// redirect-URI validation; identified by an opaque cookie. The browser never
/// sees client parameters again after the initial request.
#[derive(Debug, Clone)]
pub struct AuthSession {
    /// Session id (cookie value)
    pub id: String,
    /// Validated requesting client
    pub client_id: String,
    /// Validated redirect URI for this flow
    pub redirect_uri: String,
    /// `code` or `token`
    pub response_type: String,
    /// Effective scope set after default-scope resolution
    pub scopes: BTreeSet<String>,
    /// Client state to echo back
    pub state: Option<String>,
    /// Set once login succeeds
    pub authenticated_user: Option<String>,
    /// Sessions expire even if abandoned
    pub expires_at: DateTime<Utc>,
}

/// In-memory store of in-flight authorization sessions
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, AuthSession>,
}

impl SessionStore {
    /// Create an empty session store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for a validated authorization request
    ///
    /// # Errors
    /// Returns an error if the RNG fails.
    pub fn create(
        &self,
        client_id: String,
        redirect_uri: String,
        response_type: String,
        scopes: BTreeSet<String>,
        state: Option<String>,
    ) -> AppResult<AuthSession> {
        let session = AuthSession {
            id: crypto::random_token(24)?,
            client_id,
            redirect_uri,
            response_type,
            scopes,
            state,
            authenticated_user: None,
            expires_at: Utc::now() + Duration::minutes(SESSION_TTL_MINUTES),
        };
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    /// Look up a live session by cookie value
    #[must_use]
    pub fn get(&self, id: &str) -> Option<AuthSession> {
        let session = self.sessions.get(id)?;
        if Utc::now() >= session.expires_at {
            drop(session);
            self.sessions.remove(id);
            return None;
        }
        Some(session.clone())
    }

    /// Record the authenticated user on a session
    pub fn set_authenticated_user(&self, id: &str, username: &str) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.authenticated_user = Some(username.to_owned());
        }
    }

    /// Remove a session once the flow completes or is declined
    pub fn remove(&self, id: &str) {
        self.sessions.remove(id);
    }

    /// Drop every session whose expiry has passed. Returns the removal
    /// count. Abandoned login pages are reclaimed here; the lazy check in
    /// [`SessionStore::get`] only covers sessions that are looked up again.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| now < session.expires_at);
        before.saturating_sub(self.sessions.len())
    }

    /// Spawn the background sweeper task for abandoned sessions.
    ///
    /// Runs until the process exits.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let sessions = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let removed = sessions.sweep_expired(Utc::now());
                if removed > 0 {
                    tracing::info!(removed, "Swept expired authorization sessions");
                }
            }
        })
    }
}

/// Shared application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    /// Client and user registry
    pub registry: Arc<ClientRegistry>,
    /// Token issuer
    pub issuer: Arc<TokenIssuer>,
    /// Shared entity store
    pub store: Arc<dyn ClientStore>,
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// In-flight authorization sessions
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    /// Assemble application state over a store backend
    #[must_use]
    pub fn new(store: Arc<dyn ClientStore>, config: ServerConfig) -> Self {
        Self {
            registry: Arc::new(ClientRegistry::new(Arc::clone(&store))),
            issuer: Arc::new(TokenIssuer::new(Arc::clone(&store), config.tokens)),
            store,
            config: Arc::new(config),
            sessions: Arc::new(SessionStore::new()),
        }
    }
}

/// Extract a cookie value from a `Cookie` request header
#[must_use]
pub fn cookie_value(headers: &axum::http::HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_owned())
    })
}
