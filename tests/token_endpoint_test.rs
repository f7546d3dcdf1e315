// ABOUTME: Token endpoint tests covering the non-interactive grants and client authentication
// ABOUTME: Exercises password, client_credentials and refresh grants plus the error taxonomy
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose, Engine as _};
use std::collections::BTreeSet;
use std::sync::Arc;
use tollgate::config::ServerConfig;
use tollgate::models::GrantType;
use tollgate::routes;
use tollgate::server::AppState;
use tollgate::store::memory::MemoryStore;
use tower::ServiceExt;

const CLIENT_ID: &str = "client1234";
const CLIENT_SECRET: &str = "secret1234";
const REDIRECT_URI: &str = "http://localhost:8080/callback";

async fn test_app(grants: Vec<GrantType>) -> Router {
    let state = AppState::new(Arc::new(MemoryStore::new()), ServerConfig::default());
    state
        .registry
        .register_client(CLIENT_ID, CLIENT_SECRET, REDIRECT_URI, Some("foo bar"), grants)
        .await
        .unwrap();
    state
        .registry
        .create_user(CLIENT_ID, "user1", "pass1", BTreeSet::new())
        .await
        .unwrap();
    routes::router(state)
}

async fn post_form(router: &Router, pairs: &[(&str, &str)]) -> axum::response::Response {
    let form = serde_urlencoded::to_string(pairs).unwrap();
    router
        .clone()
        .oneshot(
            Request::post("/access_token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Password grant
// ============================================================================

#[tokio::test]
async fn test_password_grant_round_trip() {
    let router = test_app(vec![GrantType::Password]).await;
    let response = post_form(
        &router,
        &[
            ("grant_type", "password"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("username", "user1"),
            ("password", "pass1"),
            ("scope", "foo bar"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["token_type"], "bearer");
    assert_eq!(json["scope"], "bar foo");
    assert!(json["access_token"].is_string());
    assert!(json["refresh_token"].is_string());
    assert!(json["expires_in"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_password_grant_wrong_password() {
    let router = test_app(vec![GrantType::Password]).await;
    let response = post_form(
        &router,
        &[
            ("grant_type", "password"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("username", "user1"),
            ("password", "wrong"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_grant");
}

// ============================================================================
// Client credentials grant
// ============================================================================

#[tokio::test]
async fn test_client_credentials_grant() {
    let router = test_app(vec![GrantType::ClientCredentials]).await;
    let response = post_form(
        &router,
        &[
            ("grant_type", "client_credentials"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("scope", "foo"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert!(json["access_token"].is_string());
    // No refresh token for client credentials
    assert!(json.get("refresh_token").is_none());
}

#[tokio::test]
async fn test_client_credentials_default_scope_fallback() {
    let router = test_app(vec![GrantType::ClientCredentials]).await;
    let response = post_form(
        &router,
        &[
            ("grant_type", "client_credentials"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["scope"], "bar foo");
}

// ============================================================================
// Refresh grant
// ============================================================================

#[tokio::test]
async fn test_refresh_rotation() {
    let router = test_app(vec![GrantType::Password, GrantType::RefreshToken]).await;
    let response = post_form(
        &router,
        &[
            ("grant_type", "password"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("username", "user1"),
            ("password", "pass1"),
            ("scope", "foo bar"),
        ],
    )
    .await;
    let first = json_body(response).await;
    let refresh = first["refresh_token"].as_str().unwrap().to_owned();

    let response = post_form(
        &router,
        &[
            ("grant_type", "refresh_token"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("refresh_token", &refresh),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let second = json_body(response).await;
    assert_ne!(second["access_token"], first["access_token"]);
    assert_ne!(second["refresh_token"], first["refresh_token"]);

    // The presented refresh token was rotated out
    let response = post_form(
        &router,
        &[
            ("grant_type", "refresh_token"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("refresh_token", &refresh),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_refresh_cannot_widen_scope() {
    let router = test_app(vec![GrantType::Password, GrantType::RefreshToken]).await;
    let response = post_form(
        &router,
        &[
            ("grant_type", "password"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("username", "user1"),
            ("password", "pass1"),
            ("scope", "foo"),
        ],
    )
    .await;
    let refresh = json_body(response).await["refresh_token"]
        .as_str()
        .unwrap()
        .to_owned();

    let response = post_form(
        &router,
        &[
            ("grant_type", "refresh_token"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("refresh_token", &refresh),
            ("scope", "foo admin"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_scope");

    // The failed widen attempt must not burn the grant
    let response = post_form(
        &router,
        &[
            ("grant_type", "refresh_token"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("refresh_token", &refresh),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_concurrent_refresh_single_winner() {
    let router = test_app(vec![GrantType::Password, GrantType::RefreshToken]).await;
    let response = post_form(
        &router,
        &[
            ("grant_type", "password"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("username", "user1"),
            ("password", "pass1"),
        ],
    )
    .await;
    let refresh = json_body(response).await["refresh_token"]
        .as_str()
        .unwrap()
        .to_owned();

    let pairs = [
        ("grant_type", "refresh_token"),
        ("client_id", CLIENT_ID),
        ("client_secret", CLIENT_SECRET),
        ("refresh_token", refresh.as_str()),
    ];
    let (first, second) = tokio::join!(post_form(&router, &pairs), post_form(&router, &pairs));

    // Rotation consumes the token atomically: exactly one request wins
    let statuses = [first.status(), second.status()];
    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::OK).count(),
        1,
        "exactly one rotation should succeed, got {statuses:?}"
    );
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == StatusCode::BAD_REQUEST)
            .count(),
        1
    );
}

// ============================================================================
// Client authentication and error taxonomy
// ============================================================================

#[tokio::test]
async fn test_wrong_client_secret_is_invalid_client() {
    let router = test_app(vec![GrantType::ClientCredentials]).await;
    let response = post_form(
        &router,
        &[
            ("grant_type", "client_credentials"),
            ("client_id", CLIENT_ID),
            ("client_secret", "wrong"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "invalid_client");
}

#[tokio::test]
async fn test_basic_auth_client_credentials() {
    let router = test_app(vec![GrantType::ClientCredentials]).await;
    let credentials = general_purpose::STANDARD.encode(format!("{CLIENT_ID}:{CLIENT_SECRET}"));
    let form = serde_urlencoded::to_string([("grant_type", "client_credentials")]).unwrap();

    let response = router
        .clone()
        .oneshot(
            Request::post("/access_token")
                .header(header::AUTHORIZATION, format!("Basic {credentials}"))
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unsupported_grant_type() {
    let router = test_app(vec![GrantType::ClientCredentials]).await;
    let response = post_form(
        &router,
        &[
            ("grant_type", "jwt-bearer"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        "unsupported_grant_type"
    );
}

#[tokio::test]
async fn test_disallowed_grant_is_unauthorized_client() {
    // Client registered for authorization_code only
    let router = test_app(vec![GrantType::AuthorizationCode]).await;
    let response = post_form(
        &router,
        &[
            ("grant_type", "password"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("username", "user1"),
            ("password", "pass1"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "unauthorized_client");
}

#[tokio::test]
async fn test_missing_grant_type() {
    let router = test_app(vec![GrantType::ClientCredentials]).await;
    let response = post_form(
        &router,
        &[("client_id", CLIENT_ID), ("client_secret", CLIENT_SECRET)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn test_bogus_code_is_invalid_grant() {
    let router = test_app(vec![GrantType::AuthorizationCode]).await;
    let response = post_form(
        &router,
        &[
            ("grant_type", "authorization_code"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("code", "not-a-real-code"),
            ("redirect_uri", REDIRECT_URI),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_grant");
}
