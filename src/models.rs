// ABOUTME: Core domain models for OAuth clients, users, tokens and authorization codes
// ABOUTME: Defines the entities owned by the client store plus scope set helpers
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A registered OAuth 2.0 client application.
///
/// The identifier is immutable for the lifetime of the registration; the
/// secret may be rotated (only its hash is kept). Users provisioned through
/// this client cascade-delete with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    /// Unique client identifier
    pub client_id: String,
    /// Argon2id hash of the client secret
    pub secret_hash: String,
    /// The single redirect URI registered for this client; authorization
    /// requests must match it exactly
    pub redirect_uri: String,
    /// Scope applied when an authorization request omits `scope`
    pub default_scope: Option<String>,
    /// Grant types this client is permitted to use
    pub grant_types: Vec<GrantType>,
    /// When this client was registered
    pub created_at: DateTime<Utc>,
}

impl Client {
    /// Check whether this client may use the given grant type
    #[must_use]
    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.grant_types.contains(&grant)
    }
}

/// OAuth 2.0 grant types supported by the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    Password,
    ClientCredentials,
    /// Implicit grant (`response_type=token` at the authorization endpoint)
    Implicit,
}

impl GrantType {
    /// Parse the `grant_type` request parameter
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "authorization_code" => Some(Self::AuthorizationCode),
            "refresh_token" => Some(Self::RefreshToken),
            "password" => Some(Self::Password),
            "client_credentials" => Some(Self::ClientCredentials),
            _ => None,
        }
    }
}

/// An end-user provisioned under a client.
///
/// The password is stored as an Argon2id hash and is only ever compared,
/// never read back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// Login name, unique within the owning client
    pub username: String,
    /// Argon2id hash of the password
    pub password_hash: String,
    /// Owning client (back-reference, not ownership)
    pub client_id: String,
    /// Scopes this user has consented to for the owning client
    pub granted_scopes: BTreeSet<String>,
    /// When this user was provisioned
    pub created_at: DateTime<Utc>,
}

/// Token kind: short-lived access credential or long-lived refresh credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Who a token was issued to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenOwner {
    /// Token acts on behalf of an end-user
    User {
        /// Username within the issuing client
        username: String,
    },
    /// Token acts on behalf of the client itself (`client_credentials` grant)
    Client,
}

impl TokenOwner {
    /// Principal name reported by the validation endpoint
    #[must_use]
    pub fn principal(&self, client_id: &str) -> String {
        match self {
            Self::User { username } => username.clone(),
            Self::Client => client_id.to_owned(),
        }
    }
}

/// An issued access or refresh token.
///
/// A token is valid iff it is still present in the store and
/// `expires_at.is_none() || now < expires_at`. `expires_at == None` encodes
/// the "TTL 0 = unlimited" convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// The opaque token string (store key)
    pub token: String,
    /// Access or refresh
    pub kind: TokenKind,
    /// Issued-to principal
    pub owner: TokenOwner,
    /// Client this token was issued through
    pub client_id: String,
    /// Scopes granted to this token
    pub scopes: BTreeSet<String>,
    /// Issuance timestamp
    pub issued_at: DateTime<Utc>,
    /// Expiry; `None` means the token never expires
    pub expires_at: Option<DateTime<Utc>>,
    /// Paired token (refresh for an access token and vice versa)
    pub sibling: Option<String>,
}

impl Token {
    /// Whether the token has passed its expiry at the given instant
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|e| now >= e)
    }

    /// Seconds until expiry, if the token expires
    #[must_use]
    pub fn expires_in(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at.map(|e| (e - now).num_seconds().max(0))
    }
}

/// A short-lived, single-use authorization code.
///
/// Consumed codes are kept as `used` tombstones until their expiry sweep so
/// reuse can be detected and the derived token pair revoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// The opaque code string (store key)
    pub code: String,
    /// Client the code was issued to
    pub client_id: String,
    /// Authenticated resource owner
    pub username: String,
    /// Scopes approved during consent
    pub scopes: BTreeSet<String>,
    /// Redirect URI the code was issued against; the exchange must match it
    pub redirect_uri: String,
    /// Issuance timestamp
    pub issued_at: DateTime<Utc>,
    /// Codes always expire (a few minutes)
    pub expires_at: DateTime<Utc>,
    /// Set once the code has been exchanged
    pub used: bool,
    /// Access token minted from this code, for reuse revocation
    pub issued_access_token: Option<String>,
    /// Refresh token minted from this code, for reuse revocation
    pub issued_refresh_token: Option<String>,
}

/// Parse a space-separated scope string into a scope set (RFC 6749 §3.3)
#[must_use]
pub fn parse_scope(scope: &str) -> BTreeSet<String> {
    scope
        .split_whitespace()
        .map(std::string::ToString::to_string)
        .collect()
}

/// Format a scope set back into the space-separated wire form
#[must_use]
pub fn format_scope(scopes: &BTreeSet<String>) -> String {
    scopes.iter().cloned().collect::<Vec<_>>().join(" ")
}

/// Check that every required scope is covered by the granted set
#[must_use]
pub fn scope_covers(granted: &BTreeSet<String>, required: &BTreeSet<String>) -> bool {
    required.is_subset(granted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_scope_round_trip() {
        let scopes = parse_scope("bar foo foo");
        assert_eq!(scopes.len(), 2);
        assert_eq!(format_scope(&scopes), "bar foo");
    }

    #[test]
    fn test_scope_covers() {
        let granted = parse_scope("foo bar baz");
        assert!(scope_covers(&granted, &parse_scope("foo bar")));
        assert!(scope_covers(&granted, &BTreeSet::new()));
        assert!(!scope_covers(&granted, &parse_scope("foo qux")));
    }

    #[test]
    fn test_token_unlimited_never_expires() {
        let token = Token {
            token: "t".to_owned(),
            kind: TokenKind::Access,
            owner: TokenOwner::Client,
            client_id: "c".to_owned(),
            scopes: BTreeSet::new(),
            issued_at: Utc::now(),
            expires_at: None,
            sibling: None,
        };
        assert!(!token.is_expired_at(Utc::now() + Duration::days(10_000)));
        assert_eq!(token.expires_in(Utc::now()), None);
    }

    #[test]
    fn test_token_expiry_boundary() {
        let now = Utc::now();
        let token = Token {
            token: "t".to_owned(),
            kind: TokenKind::Access,
            owner: TokenOwner::User {
                username: "user1".to_owned(),
            },
            client_id: "c".to_owned(),
            scopes: BTreeSet::new(),
            issued_at: now,
            expires_at: Some(now + Duration::seconds(60)),
            sibling: None,
        };
        assert!(!token.is_expired_at(now));
        assert!(token.is_expired_at(now + Duration::seconds(60)));
        assert!(token.is_expired_at(now + Duration::seconds(61)));
    }

    #[test]
    fn test_grant_type_parse() {
        assert_eq!(
            GrantType::parse("authorization_code"),
            Some(GrantType::AuthorizationCode)
        );
        assert_eq!(GrantType::parse("password"), Some(GrantType::Password));
        assert_eq!(GrantType::parse("implicit"), None);
        assert_eq!(GrantType::parse(""), None);
    }
}
