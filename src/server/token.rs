// ABOUTME: Token endpoint implementing the authorization_code, refresh, password and client_credentials grants
// ABOUTME: Authenticates clients, consumes codes atomically, and answers code replay with revocation
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! `POST /access_token`.
//!
//! Every grant starts with client authentication; no token leaves this
//! endpoint for an unauthenticated client. Authorization codes are consumed
//! atomically in the store, and a replayed code revokes the token pair the
//! first exchange minted (RFC 6749 §4.1.2 security requirement).

use super::models::{OAuthError, TokenRequestForm, TokenResponse};
use super::AppState;
use crate::issuer::TokenIssuer;
use crate::models::{format_scope, parse_scope, scope_covers, Client, GrantType, TokenOwner};
use crate::registry::ClientRegistry;
use crate::store::CodeConsumption;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Form;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// `POST /access_token` entry point
pub async fn access_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<TokenRequestForm>,
) -> Response {
    let client = match authenticate_client(&state, &headers, &form).await {
        Ok(client) => client,
        Err(error) => return error.into_response(),
    };

    let Some(grant_raw) = form.grant_type.as_deref().filter(|s| !s.is_empty()) else {
        return OAuthError::invalid_request("missing grant_type").into_response();
    };
    let Some(grant) = GrantType::parse(grant_raw) else {
        return OAuthError::unsupported_grant_type(grant_raw).into_response();
    };
    if !client.allows_grant(grant) {
        warn!(client_id = %client.client_id, grant = grant_raw, "Grant type not allowed for client");
        return OAuthError::unauthorized_client(format!(
            "client is not authorized for grant_type={grant_raw}"
        ))
        .into_response();
    }

    let outcome = match grant {
        GrantType::AuthorizationCode => exchange_code(&state, &client, &form).await,
        GrantType::RefreshToken => refresh_grant(&state, &client, &form).await,
        GrantType::Password => password_grant(&state, &client, &form).await,
        GrantType::ClientCredentials => client_credentials_grant(&state, &client, &form).await,
        // response_type=token is handled at the authorization endpoint
        GrantType::Implicit => Err(OAuthError::unsupported_grant_type(grant_raw)),
    };

    match outcome {
        Ok(response) => response.into_http_response(),
        Err(error) => error.into_response(),
    }
}

/// Authenticate the client from HTTP Basic credentials or body parameters
async fn authenticate_client(
    state: &AppState,
    headers: &HeaderMap,
    form: &TokenRequestForm,
) -> Result<Client, OAuthError> {
    let (client_id, client_secret) = basic_credentials(headers).map_or_else(
        || {
            (
                form.client_id.clone().unwrap_or_default(),
                form.client_secret.clone().unwrap_or_default(),
            )
        },
        |creds| creds,
    );

    if client_id.is_empty() {
        return Err(OAuthError::invalid_request("missing client credentials"));
    }

    state
        .registry
        .validate_client(&client_id, &client_secret)
        .await
        .map_err(|_| OAuthError::invalid_client("client authentication failed"))
}

/// Parse `Authorization: Basic base64(id:secret)`
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = raw.strip_prefix("Basic ")?;
    let decoded = general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_owned(), secret.to_owned()))
}

/// `grant_type=authorization_code`
async fn exchange_code(
    state: &AppState,
    client: &Client,
    form: &TokenRequestForm,
) -> Result<TokenResponse, OAuthError> {
    let Some(code) = form.code.as_deref().filter(|s| !s.is_empty()) else {
        return Err(OAuthError::invalid_request("missing code"));
    };
    let Some(redirect_uri) = form.redirect_uri.as_deref().filter(|s| !s.is_empty()) else {
        return Err(OAuthError::invalid_request("missing redirect_uri"));
    };

    // Reserve the token strings up front so the consume step records them
    // on the tombstone in the same critical section that burns the code; a
    // replay arriving right after the winner always finds them there.
    let access_str =
        TokenIssuer::mint_token_string().map_err(|e| OAuthError::server_error(e.to_string()))?;
    let refresh_str =
        TokenIssuer::mint_token_string().map_err(|e| OAuthError::server_error(e.to_string()))?;

    let consumption = state
        .store
        .consume_auth_code(
            code,
            &client.client_id,
            redirect_uri,
            Utc::now(),
            &access_str,
            Some(&refresh_str),
        )
        .await
        .map_err(|e| OAuthError::server_error(e.to_string()))?;

    let record = match consumption {
        CodeConsumption::Fresh(record) => record,
        CodeConsumption::Replayed(tombstone) => {
            // Reuse means the code leaked; everything minted from it dies
            warn!(
                client_id = %client.client_id,
                username = %tombstone.username,
                "Authorization code replayed; revoking derived tokens"
            );
            if let Some(access) = &tombstone.issued_access_token {
                state
                    .issuer
                    .revoke(access)
                    .await
                    .map_err(|e| OAuthError::server_error(e.to_string()))?;
            }
            if let Some(refresh) = &tombstone.issued_refresh_token {
                state
                    .issuer
                    .revoke(refresh)
                    .await
                    .map_err(|e| OAuthError::server_error(e.to_string()))?;
            }
            return Err(OAuthError::invalid_grant("authorization code already used"));
        }
        CodeConsumption::Invalid => {
            return Err(OAuthError::invalid_grant(
                "authorization code is invalid or expired",
            ));
        }
    };

    let pair = state
        .issuer
        .issue_token_pair_as(
            access_str,
            refresh_str,
            TokenOwner::User {
                username: record.username.clone(),
            },
            &client.client_id,
            record.scopes.clone(),
            None,
        )
        .await
        .map_err(|e| OAuthError::server_error(e.to_string()))?;

    info!(client_id = %client.client_id, username = %record.username, "Exchanged authorization code");
    Ok(pair_response(&pair))
}

/// `grant_type=refresh_token` with rotation
async fn refresh_grant(
    state: &AppState,
    client: &Client,
    form: &TokenRequestForm,
) -> Result<TokenResponse, OAuthError> {
    let Some(refresh_token) = form.refresh_token.as_deref().filter(|s| !s.is_empty()) else {
        return Err(OAuthError::invalid_request("missing refresh_token"));
    };

    // Rotation consumes the presented token atomically: of two concurrent
    // rotations exactly one gets the stored record, the other invalid_grant
    let stored = state
        .store
        .consume_refresh_token(refresh_token, &client.client_id, Utc::now())
        .await
        .map_err(|e| OAuthError::server_error(e.to_string()))?
        .ok_or_else(|| OAuthError::invalid_grant("refresh token is invalid or expired"))?;

    // A narrower scope may be requested; never a wider one
    let scopes = match form.scope.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(requested) => {
            let requested = parse_scope(requested);
            if !scope_covers(&stored.scopes, &requested) {
                // A scope error must not burn the grant; put the token back
                state
                    .store
                    .store_token(stored.clone())
                    .await
                    .map_err(|e| OAuthError::server_error(e.to_string()))?;
                return Err(OAuthError::invalid_scope(
                    "requested scope exceeds the original grant",
                ));
            }
            requested
        }
        None => stored.scopes.clone(),
    };

    // The access sibling dies with the rotated refresh token
    if let Some(sibling) = &stored.sibling {
        state
            .issuer
            .revoke(sibling)
            .await
            .map_err(|e| OAuthError::server_error(e.to_string()))?;
    }

    let pair = state
        .issuer
        .issue_token_pair(stored.owner.clone(), &client.client_id, scopes, None)
        .await
        .map_err(|e| OAuthError::server_error(e.to_string()))?;

    info!(client_id = %client.client_id, "Rotated refresh token");
    Ok(pair_response(&pair))
}

/// `grant_type=password`
async fn password_grant(
    state: &AppState,
    client: &Client,
    form: &TokenRequestForm,
) -> Result<TokenResponse, OAuthError> {
    let Some(username) = form.username.as_deref().filter(|s| !s.is_empty()) else {
        return Err(OAuthError::invalid_request("missing username"));
    };
    let Some(password) = form.password.as_deref() else {
        return Err(OAuthError::invalid_request("missing password"));
    };

    let user = state
        .registry
        .verify_user_password(&client.client_id, username, password)
        .await
        .map_err(|_| OAuthError::invalid_grant("invalid resource owner credentials"))?;

    let scopes = resolve_request_scope(client, form.scope.as_deref())?;

    let pair = state
        .issuer
        .issue_token_pair(
            TokenOwner::User {
                username: user.username.clone(),
            },
            &client.client_id,
            scopes,
            None,
        )
        .await
        .map_err(|e| OAuthError::server_error(e.to_string()))?;

    info!(client_id = %client.client_id, username = %user.username, "Password grant token issued");
    Ok(pair_response(&pair))
}

/// `grant_type=client_credentials`; no refresh token is issued (RFC 6749 §4.4.3)
async fn client_credentials_grant(
    state: &AppState,
    client: &Client,
    form: &TokenRequestForm,
) -> Result<TokenResponse, OAuthError> {
    let scopes = resolve_request_scope(client, form.scope.as_deref())?;

    let token = state
        .issuer
        .issue_access_token(TokenOwner::Client, &client.client_id, scopes.clone(), None)
        .await
        .map_err(|e| OAuthError::server_error(e.to_string()))?;

    info!(client_id = %client.client_id, "Client credentials token issued");
    Ok(TokenResponse {
        access_token: token.token.clone(),
        token_type: "bearer".to_owned(),
        expires_in: token.expires_in(Utc::now()),
        refresh_token: None,
        scope: format_scope(&scopes),
    })
}

fn resolve_request_scope(
    client: &Client,
    requested: Option<&str>,
) -> Result<BTreeSet<String>, OAuthError> {
    ClientRegistry::resolve_scope(client, requested)
        .map_err(|_| OAuthError::invalid_scope("no scope requested and no default registered"))
}

fn pair_response(pair: &crate::issuer::TokenPair) -> TokenResponse {
    TokenResponse {
        access_token: pair.access.token.clone(),
        token_type: "bearer".to_owned(),
        expires_in: pair.access.expires_in(Utc::now()),
        refresh_token: Some(pair.refresh.token.clone()),
        scope: format_scope(&pair.access.scopes),
    }
}
