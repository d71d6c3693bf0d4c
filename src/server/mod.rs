// src/server/mod.rs

//! Webhook-driven server mode
//!
//! Two tasks: an HTTP handler per request (authenticate, parse, enqueue,
//! acknowledge, nothing more) and exactly one background drain worker
//! parked on a single-slot notification. Long operations (network fetches,
//! conversion) never hold the store's external lock; only the short
//! write/commit bursts do, which keeps handler latency decoupled from
//! in-flight syncs.

mod webhook;
mod worker;

use crate::config::Config;
use crate::error::Result;
use crate::store::{GitConfig, Store};
use axum::Router;
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::info;

pub struct AppState {
    pub config: Config,
    pub store: Store,
    /// Single-slot wakeup for the drain worker; extra signals coalesce
    pub notify: Notify,
    pub shutdown: Notify,
    pub cancel: Arc<AtomicBool>,
}

/// Run server mode until interrupted.
pub fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<()> {
    let store = Store::open(config.dir.clone(), GitConfig::from_config(&config))?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.webhook_port));
    let path = config.webhook_path.clone();
    let auto_sync = config.webhook_auto_sync;

    let state = Arc::new(AppState {
        config,
        store,
        notify: Notify::new(),
        shutdown: Notify::new(),
        cancel: Arc::new(AtomicBool::new(false)),
    });

    let worker_handle = if auto_sync {
        Some(tokio::spawn(worker::run(state.clone())))
    } else {
        info!("auto-sync disabled, webhook events only enqueue");
        None
    };

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route(&path, post(webhook::handle))
        .with_state(state.clone());

    info!(%addr, path = %path, "webhook server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    if let Some(handle) = worker_handle {
        let _ = handle.await;
    }
    info!("server stopped");
    Ok(())
}

async fn healthz() -> &'static str {
    "OK"
}

async fn shutdown_signal(state: Arc<AppState>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    state.cancel.store(true, Ordering::Relaxed);
    state.shutdown.notify_waiters();
}
