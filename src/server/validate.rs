// ABOUTME: Bearer-token validation as a trait with local and remote backends
// ABOUTME: Serves the /validate endpoint and backs the request authorizer
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Token validation.
//!
//! [`TokenValidator`] is the seam between "is this bearer token good for
//! these scopes" and how that question is answered. [`LocalValidator`] asks
//! the in-process issuer; [`RemoteValidator`] asks a central validation
//! endpoint over HTTP and fails closed: any transport failure or malformed
//! answer is reported as [`ValidationError::Unavailable`], never as a pass.

use super::models::{ValidationRequest, ValidationResponse};
use super::AppState;
use crate::issuer::TokenIssuer;
use crate::models::{format_scope, parse_scope, scope_covers};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Outcome of a validation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Token is live and covers every required scope
    Valid {
        /// Principal the token acts for
        principal: String,
        /// Scopes carried by the token
        scopes: BTreeSet<String>,
    },
    /// Token is live but does not cover the required scopes
    InsufficientScope,
    /// Unknown, expired, or revoked token
    Invalid,
}

/// Validation infrastructure failure; distinct from a negative verdict
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The validation backend could not be reached or gave a malformed
    /// answer; callers must fail closed
    #[error("validation backend unavailable: {0}")]
    Unavailable(String),
}

/// The question every protected surface asks about a bearer token
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Check a bearer token against a set of required scopes.
    ///
    /// An empty `required` set means presence-and-liveness only.
    ///
    /// # Errors
    /// Returns [`ValidationError::Unavailable`] when no verdict could be
    /// obtained; that is never a pass.
    async fn validate(
        &self,
        access_token: &str,
        required: &BTreeSet<String>,
    ) -> Result<Verdict, ValidationError>;
}

/// Validates against the in-process token issuer
pub struct LocalValidator {
    issuer: Arc<TokenIssuer>,
}

impl LocalValidator {
    /// Create a validator over the local issuer
    #[must_use]
    pub fn new(issuer: Arc<TokenIssuer>) -> Self {
        Self { issuer }
    }
}

#[async_trait]
impl TokenValidator for LocalValidator {
    async fn validate(
        &self,
        access_token: &str,
        required: &BTreeSet<String>,
    ) -> Result<Verdict, ValidationError> {
        let token = self
            .issuer
            .lookup(access_token)
            .await
            .map_err(|e| ValidationError::Unavailable(e.to_string()))?;

        let Some(token) = token else {
            return Ok(Verdict::Invalid);
        };
        if !scope_covers(&token.scopes, required) {
            return Ok(Verdict::InsufficientScope);
        }
        Ok(Verdict::Valid {
            principal: token.owner.principal(&token.client_id),
            scopes: token.scopes,
        })
    }
}

/// Validates by calling a central validation endpoint over HTTP
pub struct RemoteValidator {
    client: reqwest::Client,
    url: String,
}

impl RemoteValidator {
    /// Create a validator for the given endpoint URL.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self, ValidationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ValidationError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_owned(),
        })
    }
}

#[async_trait]
impl TokenValidator for RemoteValidator {
    async fn validate(
        &self,
        access_token: &str,
        required: &BTreeSet<String>,
    ) -> Result<Verdict, ValidationError> {
        let request = ValidationRequest {
            access_token: access_token.to_owned(),
            scope: (!required.is_empty()).then(|| format_scope(required)),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Remote validation transport failure");
                ValidationError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        // The endpoint answers negative verdicts with 4xx and a body; a 5xx
        // means it could not decide
        if status.is_server_error() {
            return Err(ValidationError::Unavailable(format!(
                "validation endpoint returned {status}"
            )));
        }

        let body: ValidationResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "Malformed remote validation response");
            ValidationError::Unavailable(e.to_string())
        })?;

        if body.valid {
            Ok(Verdict::Valid {
                principal: body.owner.unwrap_or_default(),
                scopes: body.scope.as_deref().map(parse_scope).unwrap_or_default(),
            })
        } else if body.error.as_deref() == Some("insufficient_scope") {
            Ok(Verdict::InsufficientScope)
        } else {
            Ok(Verdict::Invalid)
        }
    }
}

/// Build the validator selected by the server configuration
///
/// # Errors
/// Returns an error if remote mode is configured without a reachable client
/// setup.
pub fn build_validator(state: &AppState) -> Result<Arc<dyn TokenValidator>, ValidationError> {
    match state.config.validation.mode {
        crate::config::ValidationMode::Local => {
            Ok(Arc::new(LocalValidator::new(Arc::clone(&state.issuer))))
        }
        crate::config::ValidationMode::Remote => {
            let url = state.config.validation.remote_url.as_deref().ok_or_else(|| {
                ValidationError::Unavailable("remote validation URL not configured".to_owned())
            })?;
            Ok(Arc::new(RemoteValidator::new(
                url,
                state.config.validation.timeout_secs,
            )?))
        }
    }
}

/// Query parameters of `GET /validate`
#[derive(Debug, Deserialize)]
pub struct ValidateQuery {
    access_token: Option<String>,
    scope: Option<String>,
}

/// `GET /validate?access_token=...&scope=...`
pub async fn validate_get(
    State(state): State<AppState>,
    Query(query): Query<ValidateQuery>,
) -> Response {
    let Some(token) = query.access_token else {
        return verdict_response(&Verdict::Invalid);
    };
    answer(&state, &token, query.scope.as_deref()).await
}

/// `POST /validate` with a JSON body
pub async fn validate_post(
    State(state): State<AppState>,
    Json(request): Json<ValidationRequest>,
) -> Response {
    answer(&state, &request.access_token, request.scope.as_deref()).await
}

/// The /validate endpoint always answers from the local issuer; it IS the
/// central endpoint that remote validators call
async fn answer(state: &AppState, access_token: &str, scope: Option<&str>) -> Response {
    let required = scope.map(parse_scope).unwrap_or_default();
    let validator = LocalValidator::new(Arc::clone(&state.issuer));

    match validator.validate(access_token, &required).await {
        Ok(verdict) => verdict_response(&verdict),
        Err(e) => {
            warn!(error = %e, "Validation check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ValidationResponse {
                    valid: false,
                    owner: None,
                    scope: None,
                    error: Some("temporarily_unavailable".to_owned()),
                }),
            )
                .into_response()
        }
    }
}

fn verdict_response(verdict: &Verdict) -> Response {
    match verdict {
        Verdict::Valid { principal, scopes } => {
            debug!(principal = %principal, "Token validated");
            (
                StatusCode::OK,
                Json(ValidationResponse {
                    valid: true,
                    owner: Some(principal.clone()),
                    scope: Some(format_scope(scopes)),
                    error: None,
                }),
            )
                .into_response()
        }
        Verdict::InsufficientScope => (
            StatusCode::FORBIDDEN,
            Json(ValidationResponse {
                valid: false,
                owner: None,
                scope: None,
                error: Some("insufficient_scope".to_owned()),
            }),
        )
            .into_response(),
        Verdict::Invalid => (
            StatusCode::UNAUTHORIZED,
            Json(ValidationResponse {
                valid: false,
                owner: None,
                scope: None,
                error: Some("invalid_token".to_owned()),
            }),
        )
            .into_response(),
    }
}
