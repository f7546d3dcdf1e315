// ABOUTME: Library root for the Tollgate OAuth 2.0 authorization server
// ABOUTME: Exposes the registry, issuer, stores, HTTP surface and authorizer middleware
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! # Tollgate
//!
//! An OAuth 2.0 authorization server and token validation engine. Tollgate
//! registers client applications and their users, drives the interactive
//! authorization-code and implicit flows, exchanges grants for opaque bearer
//! tokens at the token endpoint, and answers validation queries both
//! in-process and over HTTP for resource servers deployed elsewhere.
//!
//! ## Architecture
//!
//! - [`store`] - pluggable storage for clients, users, tokens and codes
//! - [`registry`] - client/user registration and credential verification
//! - [`issuer`] - token minting, TTL clamping, revocation and expiry sweeps
//! - [`server`] - the HTTP endpoints (authorize, token, validate)
//! - [`middleware`] - the bearer-token authorizer guard for protected routes
//!
//! Tokens are opaque random strings; every fact about a token lives server
//! side. A TTL of zero or below means the credential never expires.

#![deny(unsafe_code)]

pub mod config;
pub mod crypto;
pub mod errors;
pub mod issuer;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod registry;
pub mod routes;
pub mod server;
pub mod store;
