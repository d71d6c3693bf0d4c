// src/server/worker.rs

//! Background drain worker
//!
//! Parks on the notification channel; when signalled, drains any extra
//! signals (the single-slot channel coalesces them), waits the configured
//! sync delay, then runs the blocking engine to exhaustion of the current
//! backlog under `spawn_blocking`. There is never more than one drain task
//! per process.

use crate::crawler::{Crawler, SyncLimits};
use crate::error::Result;
use crate::notion::NotionClient;
use crate::server::AppState;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{error, info};

pub async fn run(state: Arc<AppState>) {
    info!("drain worker parked");
    loop {
        tokio::select! {
            _ = state.notify.notified() => {}
            _ = state.shutdown.notified() => break,
        }
        if state.cancel.load(Ordering::Relaxed) {
            break;
        }

        if !state.config.webhook_sync_delay.is_zero() {
            tokio::time::sleep(state.config.webhook_sync_delay).await;
        }

        let drain_state = state.clone();
        let outcome = tokio::task::spawn_blocking(move || drain(&drain_state)).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "queue drain failed"),
            Err(e) => error!(error = %e, "drain task panicked"),
        }
    }
    info!("drain worker stopped");
}

/// One full drain of the backlog. Network and conversion run without the
/// store lock; only the commit burst takes it.
fn drain(state: &AppState) -> Result<()> {
    let client = NotionClient::new(state.config.token()?)?;
    let crawler = Crawler::new(&client, &state.store, &state.config, state.cancel.clone())?;
    let counters = crawler.process_queue(&SyncLimits::default(), None)?;

    if counters.pages_processed == 0 && counters.queue_files_consumed == 0 {
        return Ok(());
    }

    if state.config.commit {
        let _guard = state.store.lock();
        let mut tx = state.store.begin();
        tx.commit(&format!(
            "ntnsync: webhook sync ({} pages, {} files)",
            counters.pages_processed, counters.files_written
        ))?;
        drop(_guard);
        if state.config.push {
            state.store.push()?;
        }
    }
    Ok(())
}
