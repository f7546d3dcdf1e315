// ABOUTME: Validation endpoint and authorizer middleware tests over the HTTP surface
// ABOUTME: Covers verdicts, bearer challenges, query tokens and remote fail-closed behavior
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::routing::get;
use axum::{Extension, Router};
use std::collections::BTreeSet;
use std::sync::Arc;
use tollgate::config::{ServerConfig, TokenConfig};
use tollgate::issuer::TokenIssuer;
use tollgate::middleware::{require_bearer, AuthPrincipal, Authorizer};
use tollgate::models::{parse_scope, TokenOwner};
use tollgate::routes;
use tollgate::server::validate::{LocalValidator, RemoteValidator, TokenValidator};
use tollgate::server::AppState;
use tollgate::store::memory::MemoryStore;
use tower::ServiceExt;

fn test_state() -> AppState {
    AppState::new(Arc::new(MemoryStore::new()), ServerConfig::default())
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// /validate endpoint
// ============================================================================

#[tokio::test]
async fn test_bogus_token_is_401_invalid() {
    let router = routes::router(test_state());
    let response = router
        .oneshot(
            Request::get("/validate?access_token=bogus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = json_body(response).await;
    assert_eq!(json["valid"], false);
    assert_eq!(json["error"], "invalid_token");
}

#[tokio::test]
async fn test_valid_token_reports_owner_and_scope() {
    let state = test_state();
    let token = state
        .issuer
        .issue_access_token(
            TokenOwner::User {
                username: "user1".to_owned(),
            },
            "client1",
            parse_scope("foo bar"),
            None,
        )
        .await
        .unwrap();

    let router = routes::router(state);
    let response = router
        .oneshot(
            Request::get(format!("/validate?access_token={}", token.token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["valid"], true);
    assert_eq!(json["owner"], "user1");
    assert_eq!(json["scope"], "bar foo");
}

#[tokio::test]
async fn test_validate_post_with_scope_requirement() {
    let state = test_state();
    let token = state
        .issuer
        .issue_access_token(TokenOwner::Client, "client1", parse_scope("foo"), None)
        .await
        .unwrap();

    let router = routes::router(state);
    let body = serde_json::json!({ "access_token": token.token, "scope": "foo admin" });
    let response = router
        .oneshot(
            Request::post("/validate")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"], "insufficient_scope");
}

#[tokio::test]
async fn test_expired_token_rejected_after_ttl() {
    let state = AppState::new(
        Arc::new(MemoryStore::new()),
        ServerConfig {
            tokens: TokenConfig {
                default_ttl_secs: 1,
                ..TokenConfig::default()
            },
            ..ServerConfig::default()
        },
    );
    let token = state
        .issuer
        .issue_access_token(TokenOwner::Client, "c", BTreeSet::new(), None)
        .await
        .unwrap();

    let router = routes::router(state);
    let uri = format!("/validate?access_token={}", token.token);

    let response = router
        .clone()
        .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let response = router
        .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Authorizer middleware guarding a resource route
// ============================================================================

fn protected_app(issuer: Arc<TokenIssuer>, required: &str, allow_query: bool) -> Router {
    let authorizer = Arc::new(Authorizer::new(
        Arc::new(LocalValidator::new(issuer)),
        parse_scope(required),
        allow_query,
    ));
    Router::new()
        .route(
            "/resource",
            get(|Extension(principal): Extension<AuthPrincipal>| async move {
                principal.principal
            }),
        )
        .layer(axum::middleware::from_fn_with_state(
            authorizer,
            require_bearer,
        ))
}

fn issuer() -> Arc<TokenIssuer> {
    Arc::new(TokenIssuer::new(
        Arc::new(MemoryStore::new()),
        TokenConfig::default(),
    ))
}

#[tokio::test]
async fn test_guard_challenges_missing_token() {
    let app = protected_app(issuer(), "foo", false);
    let response = app
        .oneshot(Request::get("/resource").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let www = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(www.starts_with("Bearer "));
    assert!(www.contains("error=\"invalid_request\""));
}

#[tokio::test]
async fn test_guard_admits_valid_token_and_exposes_principal() {
    let issuer = issuer();
    let token = issuer
        .issue_access_token(
            TokenOwner::User {
                username: "user1".to_owned(),
            },
            "c",
            parse_scope("foo bar"),
            None,
        )
        .await
        .unwrap();

    let app = protected_app(Arc::clone(&issuer), "foo", false);
    let response = app
        .oneshot(
            Request::get("/resource")
                .header(header::AUTHORIZATION, format!("Bearer {}", token.token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"user1");
}

#[tokio::test]
async fn test_guard_rejects_insufficient_scope() {
    let issuer = issuer();
    let token = issuer
        .issue_access_token(TokenOwner::Client, "c", parse_scope("foo"), None)
        .await
        .unwrap();

    let app = protected_app(Arc::clone(&issuer), "admin", false);
    let response = app
        .oneshot(
            Request::get("/resource")
                .header(header::AUTHORIZATION, format!("Bearer {}", token.token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_guard_query_token_when_enabled() {
    let issuer = issuer();
    let token = issuer
        .issue_access_token(TokenOwner::Client, "c", parse_scope("foo"), None)
        .await
        .unwrap();

    let app = protected_app(Arc::clone(&issuer), "foo", true);
    let response = app
        .oneshot(
            Request::get(format!("/resource?access_token={}", token.token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ============================================================================
// Remote validation fails closed
// ============================================================================

#[tokio::test]
async fn test_remote_validator_unreachable_is_unavailable() {
    // Nothing listens on this port
    let validator = RemoteValidator::new("http://127.0.0.1:9", 1).unwrap();
    let result = validator.validate("token", &BTreeSet::new()).await;
    assert!(result.is_err(), "transport failure must not be a verdict");
}

#[tokio::test]
async fn test_remote_validator_round_trip_against_local_endpoint() {
    // Spin up a real tollgate instance as the central validation endpoint
    let state = test_state();
    let token = state
        .issuer
        .issue_access_token(
            TokenOwner::User {
                username: "user1".to_owned(),
            },
            "client1",
            parse_scope("foo"),
            None,
        )
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, routes::router(state)).await.unwrap();
    });

    let validator = RemoteValidator::new(&format!("http://{addr}/validate"), 2).unwrap();

    let verdict = validator
        .validate(&token.token, &parse_scope("foo"))
        .await
        .unwrap();
    assert!(matches!(
        verdict,
        tollgate::server::validate::Verdict::Valid { .. }
    ));

    let verdict = validator
        .validate("bogus", &BTreeSet::new())
        .await
        .unwrap();
    assert_eq!(verdict, tollgate::server::validate::Verdict::Invalid);
}
