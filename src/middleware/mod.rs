// ABOUTME: Middleware module exports for request authorization
// ABOUTME: Re-exports the bearer-token authorizer guard
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! HTTP middleware.

pub mod auth;

pub use auth::{require_bearer, AuthPrincipal, Authorizer};
