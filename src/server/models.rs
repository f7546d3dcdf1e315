// ABOUTME: Wire-format types for the authorization, token and validation endpoints
// ABOUTME: Defines request forms, the token response and the RFC 6749 error envelope
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Query parameters of `GET /authorize`
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeParams {
    /// `code` or `token`
    pub response_type: Option<String>,
    /// Requesting client
    pub client_id: Option<String>,
    /// Callback; must match the registered URI exactly
    pub redirect_uri: Option<String>,
    /// Space-separated scope request
    pub scope: Option<String>,
    /// Opaque client state, echoed back verbatim
    pub state: Option<String>,
}

/// Form body of `POST /authorize/login`
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// Form body of `POST /authorize/consent`
#[derive(Debug, Deserialize)]
pub struct ConsentForm {
    /// `accept` or `decline`
    pub action: String,
}

/// Form body of `POST /access_token` (all grants)
#[derive(Debug, Deserialize)]
pub struct TokenRequestForm {
    pub grant_type: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Authorization-code grant
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    /// Refresh grant
    pub refresh_token: Option<String>,
    /// Password grant
    pub username: Option<String>,
    pub password: Option<String>,
    pub scope: Option<String>,
}

/// Successful token-endpoint response (RFC 6749 §5.1)
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

impl TokenResponse {
    /// Wrap in a 200 response with the mandatory cache-suppression headers
    #[must_use]
    pub fn into_http_response(self) -> Response {
        (
            StatusCode::OK,
            [
                (header::CACHE_CONTROL, "no-store"),
                (header::PRAGMA, "no-cache"),
            ],
            Json(self),
        )
            .into_response()
    }
}

/// Body of `POST /validate`
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub access_token: String,
    /// Scopes the caller requires; empty means presence-only validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Response of the validation endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub valid: bool,
    /// Principal the token acts for (username, or client id for
    /// client-credentials tokens)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Scopes carried by the token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Machine-readable reason when invalid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// RFC 6749 §5.2 / §4.1.2.1 error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthErrorKind {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    AccessDenied,
    UnsupportedGrantType,
    UnsupportedResponseType,
    InvalidScope,
    ServerError,
    TemporarilyUnavailable,
    /// Bearer-usage error (RFC 6750 §3.1)
    InsufficientScope,
}

impl OAuthErrorKind {
    /// The wire form of this error code
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::AccessDenied => "access_denied",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
            Self::InsufficientScope => "insufficient_scope",
        }
    }

    /// Default HTTP status when the error is returned directly (not via
    /// redirect)
    #[must_use]
    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::InvalidClient => StatusCode::UNAUTHORIZED,
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::TemporarilyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InsufficientScope => StatusCode::FORBIDDEN,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Protocol-level OAuth error returned by the token endpoint as JSON, or
/// carried to the client via redirect by the authorization endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthError {
    pub error: OAuthErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

impl OAuthError {
    /// Create an error with a human-readable description
    pub fn new(kind: OAuthErrorKind, description: impl Into<String>) -> Self {
        Self {
            error: kind,
            error_description: Some(description.into()),
            error_uri: None,
        }
    }

    #[must_use]
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorKind::InvalidRequest, description)
    }

    #[must_use]
    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorKind::InvalidClient, description)
    }

    #[must_use]
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorKind::InvalidGrant, description)
    }

    #[must_use]
    pub fn unauthorized_client(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorKind::UnauthorizedClient, description)
    }

    #[must_use]
    pub fn access_denied() -> Self {
        Self::new(OAuthErrorKind::AccessDenied, "resource owner denied access")
    }

    #[must_use]
    pub fn unsupported_grant_type(grant: &str) -> Self {
        Self::new(
            OAuthErrorKind::UnsupportedGrantType,
            format!("unsupported grant_type: {grant}"),
        )
    }

    #[must_use]
    pub fn unsupported_response_type(response_type: &str) -> Self {
        Self::new(
            OAuthErrorKind::UnsupportedResponseType,
            format!("unsupported response_type: {response_type}"),
        )
    }

    #[must_use]
    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorKind::InvalidScope, description)
    }

    #[must_use]
    pub fn server_error(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorKind::ServerError, description)
    }

    /// Render as query-string fragments for error redirects
    #[must_use]
    pub fn to_query_pairs(&self, state: Option<&str>) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("error", self.error.as_str().to_owned())];
        if let Some(description) = &self.error_description {
            pairs.push(("error_description", description.clone()));
        }
        if let Some(uri) = &self.error_uri {
            pairs.push(("error_uri", uri.clone()));
        }
        if let Some(state) = state {
            pairs.push(("state", state.to_owned()));
        }
        pairs
    }
}

/// Direct (non-redirect) rendering: JSON body with the error's status and
/// cache suppression, per RFC 6749 §5.2
impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        (
            self.error.http_status(),
            [
                (header::CACHE_CONTROL, "no-store"),
                (header::PRAGMA, "no-cache"),
            ],
            Json(self),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_error_wire_form() {
        let err = OAuthError::invalid_grant("authorization code expired");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"], "invalid_grant");
        assert_eq!(json["error_description"], "authorization code expired");
        assert!(json.get("error_uri").is_none());
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(
            OAuthErrorKind::InvalidClient.http_status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            OAuthErrorKind::InvalidGrant.http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            OAuthErrorKind::InsufficientScope.http_status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_query_pairs_include_state() {
        let err = OAuthError::access_denied();
        let pairs = err.to_query_pairs(Some("xyz"));
        assert!(pairs.contains(&("error", "access_denied".to_owned())));
        assert!(pairs.contains(&("state", "xyz".to_owned())));
    }

    #[test]
    fn test_token_response_omits_absent_fields() {
        let resp = TokenResponse {
            access_token: "t".to_owned(),
            token_type: "bearer".to_owned(),
            expires_in: None,
            refresh_token: None,
            scope: "foo".to_owned(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("expires_in").is_none());
        assert!(json.get("refresh_token").is_none());
        assert_eq!(json["token_type"], "bearer");
    }
}
