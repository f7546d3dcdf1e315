// ABOUTME: HTTP route definitions wiring endpoints into the axum router
// ABOUTME: Assembles the authorization, token, validation and health routes
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Route table of the authorization server.

use crate::server::{authorize, token, validate, AppState};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

/// Build the full application router
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/authorize", get(authorize::authorize))
        .route("/authorize/login", post(authorize::login))
        .route("/authorize/consent", post(authorize::consent))
        .route("/access_token", post(token::access_token))
        .route(
            "/validate",
            get(validate::validate_get).post(validate::validate_post),
        )
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness endpoint
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "tollgate",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
