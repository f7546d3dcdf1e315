// ABOUTME: Bearer-token authorizer guard for protected routes
// ABOUTME: Extracts tokens, asks a TokenValidator, and admits or challenges requests
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Request authorization middleware.
//!
//! An [`Authorizer`] guards a set of routes with a scope requirement. It
//! extracts the bearer token (Authorization header, optionally the
//! `access_token` query parameter), asks its [`TokenValidator`] for a
//! verdict, and either admits the request with an [`AuthPrincipal`]
//! extension attached or answers the RFC 6750 challenge itself. A validator
//! outage is a 503, never an admit.

use crate::server::validate::{TokenValidator, Verdict};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Authenticated principal attached to admitted requests
#[derive(Debug, Clone)]
pub struct AuthPrincipal {
    /// Username, or client id for client-credentials tokens
    pub principal: String,
    /// Scopes carried by the presented token
    pub scopes: BTreeSet<String>,
}

/// Route guard configured with a validator and a scope requirement
pub struct Authorizer {
    validator: Arc<dyn TokenValidator>,
    required: BTreeSet<String>,
    allow_query_token: bool,
}

impl Authorizer {
    /// Create an authorizer requiring the given scopes
    #[must_use]
    pub fn new(
        validator: Arc<dyn TokenValidator>,
        required: BTreeSet<String>,
        allow_query_token: bool,
    ) -> Self {
        Self {
            validator,
            required,
            allow_query_token,
        }
    }

    /// Check one extracted token; `Ok` carries the principal to attach.
    ///
    /// Takes the token by value so the caller can drop its borrow of the
    /// request body before awaiting; the body is not `Sync`.
    async fn check(&self, token: Option<String>) -> Result<AuthPrincipal, Response> {
        let Some(token) = token else {
            return Err(challenge(
                StatusCode::UNAUTHORIZED,
                "invalid_request",
                "no bearer token presented",
            ));
        };

        match self.validator.validate(&token, &self.required).await {
            Ok(Verdict::Valid { principal, scopes }) => {
                debug!(principal = %principal, "Request admitted");
                Ok(AuthPrincipal { principal, scopes })
            }
            Ok(Verdict::InsufficientScope) => Err(challenge(
                StatusCode::FORBIDDEN,
                "insufficient_scope",
                "token does not cover the required scopes",
            )),
            Ok(Verdict::Invalid) => Err(challenge(
                StatusCode::UNAUTHORIZED,
                "invalid_token",
                "token is invalid or expired",
            )),
            Err(e) => {
                warn!(error = %e, "Validator unavailable; refusing request");
                Err(StatusCode::SERVICE_UNAVAILABLE.into_response())
            }
        }
    }

    /// Pull the bearer token from the Authorization header, falling back to
    /// the `access_token` query parameter when enabled
    fn extract_token(&self, request: &Request) -> Option<String> {
        let from_header = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(std::borrow::ToOwned::to_owned);
        if from_header.is_some() {
            return from_header;
        }

        if !self.allow_query_token {
            return None;
        }
        let query = request.uri().query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "access_token")
            .map(|(_, value)| value.into_owned())
    }
}

/// Middleware entry point for `axum::middleware::from_fn_with_state`
pub async fn require_bearer(
    State(authorizer): State<Arc<Authorizer>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = authorizer.extract_token(&request);
    match authorizer.check(token).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(response) => response,
    }
}

/// RFC 6750 §3 challenge response
fn challenge(status: StatusCode, error: &str, description: &str) -> Response {
    let value = format!(
        "Bearer realm=\"tollgate\", error=\"{error}\", error_description=\"{description}\""
    );
    (status, [(header::WWW_AUTHENTICATE, value)]).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_scope;
    use crate::server::validate::ValidationError;
    use async_trait::async_trait;

    struct FixedValidator(Result<Verdict, &'static str>);

    #[async_trait]
    impl TokenValidator for FixedValidator {
        async fn validate(
            &self,
            _access_token: &str,
            _required: &BTreeSet<String>,
        ) -> Result<Verdict, ValidationError> {
            self.0
                .clone()
                .map_err(|e| ValidationError::Unavailable(e.to_owned()))
        }
    }

    fn request(uri: &str, bearer: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(axum::body::Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_is_challenged() {
        let authorizer = Authorizer::new(
            Arc::new(FixedValidator(Ok(Verdict::Invalid))),
            BTreeSet::new(),
            false,
        );
        let err = authorizer
            .check(authorizer.extract_token(&request("/r", None)))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        let www = err.headers().get(header::WWW_AUTHENTICATE).unwrap();
        assert!(www.to_str().unwrap().contains("error=\"invalid_request\""));
    }

    #[tokio::test]
    async fn test_valid_token_admitted() {
        let authorizer = Authorizer::new(
            Arc::new(FixedValidator(Ok(Verdict::Valid {
                principal: "user1".to_owned(),
                scopes: parse_scope("foo"),
            }))),
            parse_scope("foo"),
            false,
        );
        let principal = authorizer
            .check(authorizer.extract_token(&request("/r", Some("token"))))
            .await
            .unwrap();
        assert_eq!(principal.principal, "user1");
    }

    #[tokio::test]
    async fn test_insufficient_scope_is_403() {
        let authorizer = Authorizer::new(
            Arc::new(FixedValidator(Ok(Verdict::InsufficientScope))),
            parse_scope("admin"),
            false,
        );
        let err = authorizer
            .check(authorizer.extract_token(&request("/r", Some("token"))))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unavailable_fails_closed() {
        let authorizer = Authorizer::new(
            Arc::new(FixedValidator(Err("down"))),
            BTreeSet::new(),
            false,
        );
        let err = authorizer
            .check(authorizer.extract_token(&request("/r", Some("token"))))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_query_token_respects_flag() {
        let validator = || {
            Arc::new(FixedValidator(Ok(Verdict::Valid {
                principal: "user1".to_owned(),
                scopes: BTreeSet::new(),
            })))
        };

        let strict = Authorizer::new(validator(), BTreeSet::new(), false);
        assert!(strict
            .check(strict.extract_token(&request("/r?access_token=tok", None)))
            .await
            .is_err());

        let lenient = Authorizer::new(validator(), BTreeSet::new(), true);
        assert!(lenient
            .check(lenient.extract_token(&request("/r?access_token=tok", None)))
            .await
            .is_ok());
    }

    // Routers require `Send` futures; layering must compile and admit a
    // request end to end, not just pass the direct check calls above.
    #[tokio::test]
    async fn test_require_bearer_layers_into_router() {
        use axum::routing::get;
        use tower::ServiceExt;

        let authorizer = Arc::new(Authorizer::new(
            Arc::new(FixedValidator(Ok(Verdict::Valid {
                principal: "user1".to_owned(),
                scopes: parse_scope("foo"),
            }))),
            parse_scope("foo"),
            false,
        ));
        let app: axum::Router = axum::Router::new()
            .route(
                "/r",
                get(|ext: axum::Extension<AuthPrincipal>| async move { ext.0.principal.clone() }),
            )
            .layer(axum::middleware::from_fn_with_state(
                authorizer,
                require_bearer,
            ));

        let response = app.oneshot(request("/r", Some("token"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
