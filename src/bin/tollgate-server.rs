// ABOUTME: Server binary wiring configuration, storage, sweeper and the HTTP listener
// ABOUTME: Parses CLI flags, initializes logging, and serves until shutdown
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Tollgate authorization server binary.

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeSet;
use std::env;
use std::sync::Arc;
use tollgate::config::{ServerConfig, StoreBackend};
use tollgate::logging::LoggingConfig;
use tollgate::models::GrantType;
use tollgate::routes;
use tollgate::server::AppState;
use tollgate::store::{memory::MemoryStore, ClientStore};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "tollgate-server", about = "OAuth 2.0 authorization server")]
struct Args {
    /// Bind host (overrides TOLLGATE_HTTP_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides TOLLGATE_HTTP_PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    LoggingConfig::from_env().init()?;

    let mut config = ServerConfig::from_env()?;
    if let Some(host) = args.host {
        config.http.host = host;
    }
    if let Some(port) = args.port {
        config.http.port = port;
    }

    let store: Arc<dyn ClientStore> = match config.store_backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };

    let state = AppState::new(store, config.clone());
    bootstrap_client(&state).await?;
    state.issuer.spawn_sweeper();
    state.sessions.spawn_sweeper(std::time::Duration::from_secs(
        config.tokens.sweep_interval_secs.max(1),
    ));

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(
        addr = %addr,
        validation_mode = ?config.validation.mode,
        "Tollgate authorization server listening"
    );

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutdown complete");
    Ok(())
}

/// Optionally seed a first client (and user) from the environment.
///
/// An in-memory deployment starts empty; `TOLLGATE_BOOTSTRAP_CLIENT_ID` /
/// `_SECRET` / `_REDIRECT_URI` (plus optional `_USER` / `_PASSWORD`) make it
/// usable without an out-of-band provisioning step.
async fn bootstrap_client(state: &AppState) -> Result<()> {
    let (Ok(client_id), Ok(secret), Ok(redirect_uri)) = (
        env::var("TOLLGATE_BOOTSTRAP_CLIENT_ID"),
        env::var("TOLLGATE_BOOTSTRAP_CLIENT_SECRET"),
        env::var("TOLLGATE_BOOTSTRAP_REDIRECT_URI"),
    ) else {
        return Ok(());
    };

    let default_scope = env::var("TOLLGATE_BOOTSTRAP_SCOPE").ok();
    state
        .registry
        .register_client(
            &client_id,
            &secret,
            &redirect_uri,
            default_scope.as_deref(),
            vec![
                GrantType::AuthorizationCode,
                GrantType::RefreshToken,
                GrantType::Password,
                GrantType::ClientCredentials,
            ],
        )
        .await
        .context("bootstrap client registration failed")?;
    info!(client_id = %client_id, "Bootstrap client registered");

    if let (Ok(username), Ok(password)) = (
        env::var("TOLLGATE_BOOTSTRAP_USER"),
        env::var("TOLLGATE_BOOTSTRAP_PASSWORD"),
    ) {
        state
            .registry
            .create_user(&client_id, &username, &password, BTreeSet::new())
            .await
            .context("bootstrap user creation failed")?;
        info!(client_id = %client_id, username = %username, "Bootstrap user provisioned");
    } else {
        warn!("No bootstrap user configured; only client grants will work until users exist");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
