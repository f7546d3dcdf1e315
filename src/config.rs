// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Parses env vars into typed server, token, store and validation configs
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Environment-based configuration management for production deployment

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

/// Which store backend to construct at startup.
///
/// The backend is chosen here and injected into every component; endpoints
/// never select or construct storage themselves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
}

impl StoreBackend {
    /// Parse from string with fallback
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Self::Memory,
            other => {
                warn!("Unknown store backend '{other}', falling back to memory");
                Self::Memory
            }
        }
    }
}

/// How bearer tokens presented to the gatekeeper are validated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// In-process lookup against the local token issuer
    #[default]
    Local,
    /// HTTP round trip to a central validation endpoint
    Remote,
}

impl ValidationMode {
    /// Parse from string with fallback
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "remote" => Self::Remote,
            "local" => Self::Local,
            other => {
                warn!("Unknown validation mode '{other}', falling back to local");
                Self::Local
            }
        }
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
}

/// Token lifetime configuration.
///
/// All values are seconds; 0 means "no expiration" (mirrors the server-wide
/// timeout convention - callers must never treat 0 as already expired).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Default access-token TTL applied when the caller does not request one
    pub default_ttl_secs: i64,
    /// Upper bound on any issued access-token TTL; 0 = no bound
    pub max_ttl_secs: i64,
    /// Refresh-token TTL; 0 = unlimited
    pub refresh_ttl_secs: i64,
    /// Authorization-code TTL; codes always expire
    pub auth_code_ttl_secs: i64,
    /// Interval between background expiry sweeps
    pub sweep_interval_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            max_ttl_secs: 0,
            refresh_ttl_secs: 0,
            auth_code_ttl_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

impl TokenConfig {
    /// Clamp a requested TTL to the configured maximum.
    ///
    /// A requested TTL ≤ 0 means unlimited, which collapses to the maximum
    /// when one is configured.
    #[must_use]
    pub const fn effective_ttl(&self, requested_secs: i64) -> i64 {
        if self.max_ttl_secs <= 0 {
            if requested_secs <= 0 {
                0
            } else {
                requested_secs
            }
        } else if requested_secs <= 0 || requested_secs > self.max_ttl_secs {
            self.max_ttl_secs
        } else {
            requested_secs
        }
    }
}

/// Convert a TTL in seconds to an absolute expiry; ≤ 0 means never
#[must_use]
pub fn ttl_to_expiry(ttl_secs: i64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if ttl_secs <= 0 {
        None
    } else {
        Some(now + Duration::seconds(ttl_secs))
    }
}

/// Bearer-token validation configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidationConfig {
    /// Local or remote validation
    pub mode: ValidationMode,
    /// Validation endpoint URL (required in remote mode)
    pub remote_url: Option<String>,
    /// Timeout for the remote validation round trip
    pub timeout_secs: u64,
    /// Accept the token from an `access_token` query parameter in addition
    /// to the Authorization header
    pub allow_query_token: bool,
}

/// Top-level server configuration assembled from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listener settings
    pub http: HttpConfig,
    /// Store backend selection
    pub store_backend: StoreBackend,
    /// Token lifetime settings
    pub tokens: TokenConfig,
    /// Bearer validation settings
    pub validation: ValidationConfig,
}

fn env_parse_or<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().map_or_else(
            |_| {
                warn!("Invalid value for {key}: '{raw}', using default");
                default
            },
            |v| v,
        ),
        Err(_) => default,
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Returns an error if a required setting is missing or inconsistent
    /// (e.g. remote validation mode without a validation URL).
    pub fn from_env() -> Result<Self> {
        let http = HttpConfig {
            host: env::var("TOLLGATE_HTTP_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned()),
            port: env_parse_or("TOLLGATE_HTTP_PORT", 8081),
        };

        let store_backend = env::var("TOLLGATE_STORE_BACKEND")
            .map(|s| StoreBackend::from_str_or_default(&s))
            .unwrap_or_default();

        let defaults = TokenConfig::default();
        let tokens = TokenConfig {
            default_ttl_secs: env_parse_or("TOLLGATE_TOKEN_TTL_SECS", defaults.default_ttl_secs),
            max_ttl_secs: env_parse_or("TOLLGATE_TOKEN_MAX_TTL_SECS", defaults.max_ttl_secs),
            refresh_ttl_secs: env_parse_or("TOLLGATE_REFRESH_TTL_SECS", defaults.refresh_ttl_secs),
            auth_code_ttl_secs: env_parse_or(
                "TOLLGATE_AUTH_CODE_TTL_SECS",
                defaults.auth_code_ttl_secs,
            ),
            sweep_interval_secs: env_parse_or(
                "TOLLGATE_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval_secs,
            ),
        };

        let validation = ValidationConfig {
            mode: env::var("TOLLGATE_VALIDATION_MODE")
                .map(|s| ValidationMode::from_str_or_default(&s))
                .unwrap_or_default(),
            remote_url: env::var("TOLLGATE_VALIDATION_URL").ok(),
            timeout_secs: env_parse_or("TOLLGATE_VALIDATION_TIMEOUT_SECS", 5),
            allow_query_token: env::var("TOLLGATE_BEARER_QUERY_PARAM")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        };

        let config = Self {
            http,
            store_backend,
            tokens,
            validation,
        };
        config.validate().context("invalid server configuration")?;
        Ok(config)
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    /// Returns an error describing the first inconsistency found.
    pub fn validate(&self) -> Result<()> {
        if self.tokens.auth_code_ttl_secs <= 0 {
            anyhow::bail!("TOLLGATE_AUTH_CODE_TTL_SECS must be positive; codes always expire");
        }
        if self.validation.mode == ValidationMode::Remote && self.validation.remote_url.is_none() {
            anyhow::bail!("TOLLGATE_VALIDATION_URL is required when validation mode is 'remote'");
        }
        if self.validation.timeout_secs == 0 {
            anyhow::bail!("TOLLGATE_VALIDATION_TIMEOUT_SECS must be positive (fail closed needs a bound)");
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig {
                host: "127.0.0.1".to_owned(),
                port: 8081,
            },
            store_backend: StoreBackend::Memory,
            tokens: TokenConfig::default(),
            validation: ValidationConfig {
                mode: ValidationMode::Local,
                remote_url: None,
                timeout_secs: 5,
                allow_query_token: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_ttl_unlimited_max() {
        let tokens = TokenConfig {
            max_ttl_secs: 0,
            ..TokenConfig::default()
        };
        assert_eq!(tokens.effective_ttl(0), 0);
        assert_eq!(tokens.effective_ttl(-5), 0);
        assert_eq!(tokens.effective_ttl(120), 120);
    }

    #[test]
    fn test_effective_ttl_clamped() {
        let tokens = TokenConfig {
            max_ttl_secs: 600,
            ..TokenConfig::default()
        };
        assert_eq!(tokens.effective_ttl(0), 600);
        assert_eq!(tokens.effective_ttl(120), 120);
        assert_eq!(tokens.effective_ttl(900), 600);
    }

    #[test]
    fn test_ttl_to_expiry_zero_means_never() {
        let now = Utc::now();
        assert_eq!(ttl_to_expiry(0, now), None);
        assert_eq!(ttl_to_expiry(-1, now), None);
        assert_eq!(ttl_to_expiry(60, now), Some(now + Duration::seconds(60)));
    }

    #[test]
    fn test_validate_remote_requires_url() {
        let mut config = ServerConfig::default();
        config.validation.mode = ValidationMode::Remote;
        assert!(config.validate().is_err());

        config.validation.remote_url = Some("http://localhost:9000/validate".to_owned());
        assert!(config.validate().is_ok());
    }
}
