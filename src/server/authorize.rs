// ABOUTME: Authorization endpoint implementing the code and implicit redirect flows
// ABOUTME: Validates clients, drives login/consent, and mints codes or implicit tokens
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! `GET /authorize` and the login/consent steps of the redirect flows.
//!
//! The critical rule of this module: client identity and redirect URI are
//! validated BEFORE anything is sent to the redirect URI. Failures of those
//! two checks are answered in-process and never redirected, so the endpoint
//! cannot be used to bounce users to attacker-controlled callbacks. All
//! later failures are reported to the (now trusted) redirect URI.

use super::models::{AuthorizeParams, ConsentForm, LoginForm, OAuthError};
use super::{cookie_value, AppState, AuthSession, SESSION_COOKIE};
use crate::errors::ErrorCode;
use crate::models::{scope_covers, AuthorizationCode, GrantType, TokenOwner};
use crate::registry::ClientRegistry;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Form;
use chrono::{Duration, Utc};
use tracing::{info, warn};

/// Length in bytes of generated authorization codes
const CODE_BYTES: usize = 24;

/// `GET /authorize` entry point
pub async fn authorize(
    State(state): State<AppState>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    // Client identity first; these failures must never redirect
    let Some(client_id) = params.client_id.as_deref().filter(|s| !s.is_empty()) else {
        return OAuthError::invalid_request("missing client_id").into_response();
    };
    let client = match state.registry.get_client(client_id).await {
        Ok(client) => client,
        Err(e) if e.code == ErrorCode::ResourceNotFound => {
            warn!(client_id = %client_id, "Authorization request for unknown client");
            return OAuthError::invalid_request("unknown client_id").into_response();
        }
        Err(e) => return e.into_response(),
    };

    let Some(redirect_uri) = params.redirect_uri.as_deref().filter(|s| !s.is_empty()) else {
        return OAuthError::invalid_request("missing redirect_uri").into_response();
    };
    if redirect_uri != client.redirect_uri {
        warn!(client_id = %client_id, "Redirect URI mismatch in authorization request");
        return OAuthError::invalid_request("redirect_uri does not match registration")
            .into_response();
    }

    // The redirect URI is trusted from here on; protocol errors go back to it
    let state_param = params.state.as_deref();

    let response_type = params.response_type.as_deref().unwrap_or("");
    let required_grant = match response_type {
        "code" => GrantType::AuthorizationCode,
        "token" => GrantType::Implicit,
        other => {
            return error_redirect(
                redirect_uri,
                &OAuthError::unsupported_response_type(other),
                state_param,
            );
        }
    };
    if !client.allows_grant(required_grant) {
        return error_redirect(
            redirect_uri,
            &OAuthError::unauthorized_client(format!(
                "client is not authorized for response_type={response_type}"
            )),
            state_param,
        );
    }

    let scopes = match ClientRegistry::resolve_scope(&client, params.scope.as_deref()) {
        Ok(scopes) => scopes,
        Err(_) => {
            return error_redirect(
                redirect_uri,
                &OAuthError::invalid_scope("no scope requested and no default registered"),
                state_param,
            );
        }
    };

    let session = match state.sessions.create(
        client.client_id.clone(),
        redirect_uri.to_owned(),
        response_type.to_owned(),
        scopes,
        params.state.clone(),
    ) {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };

    login_page(&session, None)
}

/// `POST /authorize/login`
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let Some(session) = resolve_session(&state, &headers) else {
        return OAuthError::invalid_request("missing or expired authorization session")
            .into_response();
    };

    match state
        .registry
        .verify_user_password(&session.client_id, &form.username, &form.password)
        .await
    {
        Ok(user) => {
            info!(client_id = %session.client_id, username = %user.username, "User authenticated");

            // Scopes the user approved in an earlier flow need no second
            // consent; complete the grant straight from login
            if scope_covers(&user.granted_scopes, &session.scopes) {
                state.sessions.remove(&session.id);
                return match session.response_type.as_str() {
                    "token" => implicit_grant(&state, &session, &user.username).await,
                    _ => code_grant(&state, &session, &user.username).await,
                };
            }

            state.sessions.set_authenticated_user(&session.id, &user.username);
            consent_page(&session, &user.username)
        }
        Err(_) => login_page(&session, Some("Invalid username or password")),
    }
}

/// `POST /authorize/consent`
pub async fn consent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ConsentForm>,
) -> Response {
    let Some(session) = resolve_session(&state, &headers) else {
        return OAuthError::invalid_request("missing or expired authorization session")
            .into_response();
    };
    let Some(username) = session.authenticated_user.clone() else {
        return OAuthError::invalid_request("consent before login").into_response();
    };

    // The session is single-use whatever the outcome
    state.sessions.remove(&session.id);

    if form.action != "accept" {
        info!(client_id = %session.client_id, username = %username, "Consent declined");
        return error_redirect(
            &session.redirect_uri,
            &OAuthError::access_denied(),
            session.state.as_deref(),
        );
    }

    // Remember the approved scopes for future flows
    if let Err(e) = state
        .registry
        .grant_scopes(&session.client_id, &username, &session.scopes)
        .await
    {
        return e.into_response();
    }

    match session.response_type.as_str() {
        "token" => implicit_grant(&state, &session, &username).await,
        _ => code_grant(&state, &session, &username).await,
    }
}

/// Mint an authorization code and redirect back to the client
async fn code_grant(state: &AppState, session: &AuthSession, username: &str) -> Response {
    let code_str = match crate::crypto::random_token(CODE_BYTES) {
        Ok(code) => code,
        Err(e) => return e.into_response(),
    };
    let now = Utc::now();
    let code = AuthorizationCode {
        code: code_str.clone(),
        client_id: session.client_id.clone(),
        username: username.to_owned(),
        scopes: session.scopes.clone(),
        redirect_uri: session.redirect_uri.clone(),
        issued_at: now,
        expires_at: now + Duration::seconds(state.config.tokens.auth_code_ttl_secs),
        used: false,
        issued_access_token: None,
        issued_refresh_token: None,
    };
    if let Err(e) = state.store.store_auth_code(code).await {
        return e.into_response();
    }

    info!(client_id = %session.client_id, username = %username, "Issued authorization code");

    let mut pairs = vec![("code", code_str)];
    if let Some(s) = &session.state {
        pairs.push(("state", s.clone()));
    }
    query_redirect(&session.redirect_uri, &pairs)
}

/// Issue an access token directly and return it in the URI fragment
async fn implicit_grant(state: &AppState, session: &AuthSession, username: &str) -> Response {
    let token = match state
        .issuer
        .issue_access_token(
            TokenOwner::User {
                username: username.to_owned(),
            },
            &session.client_id,
            session.scopes.clone(),
            None,
        )
        .await
    {
        Ok(token) => token,
        Err(e) => return e.into_response(),
    };

    info!(client_id = %session.client_id, username = %username, "Issued implicit access token");

    let mut fragment = format!(
        "access_token={}&token_type=bearer",
        urlencoding::encode(&token.token)
    );
    if let Some(expires_in) = token.expires_in(Utc::now()) {
        fragment.push_str(&format!("&expires_in={expires_in}"));
    }
    if let Some(s) = &session.state {
        fragment.push_str(&format!("&state={}", urlencoding::encode(s)));
    }

    redirect_to(&format!("{}#{}", session.redirect_uri, fragment))
}

fn resolve_session(state: &AppState, headers: &HeaderMap) -> Option<AuthSession> {
    let id = cookie_value(headers, SESSION_COOKIE)?;
    state.sessions.get(&id)
}

/// Append query parameters to the redirect URI, respecting an existing query
/// string, and issue the 302
fn query_redirect(redirect_uri: &str, pairs: &[(&str, String)]) -> Response {
    let join = if redirect_uri.contains('?') { '&' } else { '?' };
    let query = pairs
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    redirect_to(&format!("{redirect_uri}{join}{query}"))
}

/// Report a protocol error to the validated redirect URI (RFC 6749 §4.1.2.1)
fn error_redirect(redirect_uri: &str, error: &OAuthError, state: Option<&str>) -> Response {
    let pairs = error.to_query_pairs(state);
    query_redirect(redirect_uri, &pairs)
}

fn redirect_to(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, location.to_owned()),
            (header::CACHE_CONTROL, "no-store".to_owned()),
        ],
    )
        .into_response()
}

fn login_page(session: &AuthSession, error: Option<&str>) -> Response {
    let notice = error.map_or_else(String::new, |msg| {
        format!("<p class=\"error\">{msg}</p>")
    });
    let body = format!(
        "<!DOCTYPE html>\n<html><head><title>Sign in</title></head><body>\n\
         <h1>Sign in</h1>\n{notice}\
         <form method=\"post\" action=\"/authorize/login\">\n\
         <label>Username <input name=\"username\" autocomplete=\"username\"></label>\n\
         <label>Password <input name=\"password\" type=\"password\" autocomplete=\"current-password\"></label>\n\
         <button type=\"submit\">Sign in</button>\n\
         </form></body></html>"
    );
    page_with_session_cookie(session, body)
}

fn consent_page(session: &AuthSession, username: &str) -> Response {
    let scope_items = session
        .scopes
        .iter()
        .map(|s| format!("<li>{s}</li>"))
        .collect::<String>();
    let body = format!(
        "<!DOCTYPE html>\n<html><head><title>Authorize access</title></head><body>\n\
         <h1>Authorize {client}</h1>\n\
         <p>Signed in as {username}. {client} is requesting access to:</p>\n\
         <ul>{scope_items}</ul>\n\
         <form method=\"post\" action=\"/authorize/consent\">\n\
         <button name=\"action\" value=\"accept\">Allow</button>\n\
         <button name=\"action\" value=\"decline\">Deny</button>\n\
         </form></body></html>",
        client = session.client_id,
    );
    page_with_session_cookie(session, body)
}

fn page_with_session_cookie(session: &AuthSession, body: String) -> Response {
    (
        StatusCode::OK,
        [
            (
                header::SET_COOKIE,
                format!("{SESSION_COOKIE}={}; HttpOnly; Path=/; SameSite=Lax", session.id),
            ),
            (header::CACHE_CONTROL, "no-store".to_owned()),
        ],
        Html(body),
    )
        .into_response()
}
