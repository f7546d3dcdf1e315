// ABOUTME: Cryptographic helpers for opaque token generation and credential hashing
// ABOUTME: Wraps the system RNG and Argon2id so callers never touch raw primitives
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use crate::errors::{AppError, AppResult};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose, Engine as _};
use ring::rand::{SecureRandom, SystemRandom};

const SALT_BYTES: usize = 16;

/// Generate a cryptographically unpredictable opaque string.
///
/// `length` is the number of random bytes; the returned string is the
/// URL-safe base64 encoding of those bytes (no padding), so it is safe to
/// place in query strings and fragments.
///
/// # Errors
/// Returns an error if the system RNG fails - a critical security failure,
/// the server cannot operate securely without working RNG
pub fn random_token(length: usize) -> AppResult<String> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; length];

    rng.fill(&mut bytes).map_err(|e| {
        tracing::error!(
            "CRITICAL: SystemRandom failed - cannot generate secure random bytes: {}",
            e
        );
        AppError::internal("System RNG failure - server cannot operate securely")
    })?;

    Ok(general_purpose::URL_SAFE_NO_PAD.encode(&bytes))
}

/// Hash a credential (user password or client secret) for storage using Argon2id.
///
/// Argon2id provides resistance against GPU-based attacks and side-channel
/// attacks; each hash gets a fresh random salt.
///
/// # Errors
/// Returns an error if Argon2 password hashing fails
pub fn hash_credential(secret: &str) -> AppResult<String> {
    let rng = SystemRandom::new();
    let mut salt_bytes = [0u8; SALT_BYTES];
    rng.fill(&mut salt_bytes)
        .map_err(|_| AppError::internal("System RNG failure - server cannot operate securely"))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::internal(format!("Salt encoding failed: {e}")))?;
    let argon2 = Argon2::default();

    let hash = argon2
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| AppError::internal(format!("Argon2 password hashing failed: {e}")))?;

    Ok(hash.to_string())
}

/// Verify a credential against its stored Argon2id hash.
///
/// Comparison happens inside argon2 and is constant-time with respect to the
/// candidate secret.
///
/// # Errors
/// Returns `AuthInvalid` if the stored hash is unparseable or the secret does
/// not match
pub fn verify_credential(secret: &str, stored_hash: &str) -> AppResult<()> {
    let parsed_hash = PasswordHash::new(stored_hash).map_err(|e| {
        tracing::error!("Failed to parse stored credential hash: {}", e);
        AppError::auth_invalid("Stored credential hash is invalid")
    })?;

    let argon2 = Argon2::default();
    argon2
        .verify_password(secret.as_bytes(), &parsed_hash)
        .map_err(|_| AppError::auth_invalid("Credential verification failed"))
}
