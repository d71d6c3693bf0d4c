// src/commands/sync.rs
//! Drain the work queue under a limit budget

use crate::config::{self, Config};
use crate::crawler::{Crawler, SyncLimits};
use crate::notion::NotionClient;
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

pub fn cmd_sync(
    config: &Config,
    folder: Option<String>,
    max_pages: u32,
    max_files: u32,
    max_time: Option<String>,
    max_queue_files: u32,
) -> Result<()> {
    let store = super::open_and_reconcile(config)?;
    let client = NotionClient::new(config.token()?)?;
    // Abrupt termination is safe: writes publish atomically and uncommitted
    // work is recovered by the next run, so the CLI path carries no signal
    // handler. The flag is driven by the server's shutdown path.
    let cancel = Arc::new(AtomicBool::new(false));

    let limits = SyncLimits {
        folder_filter: folder,
        max_pages,
        max_files,
        max_queue_files,
        max_time: match max_time {
            Some(t) => config::parse_since(&t)?,
            None => Duration::ZERO,
        },
    };

    let crawler = Crawler::new(&client, &store, config, cancel)?;

    // Periodic commit pacing between queue entries
    let mut last_commit = Instant::now();
    let period = config.commit_period;
    let commit_enabled = config.commit;
    let pace_store = &store;
    let mut pace = move |counters: &crate::crawler::SyncCounters| {
        if commit_enabled && !period.is_zero() && last_commit.elapsed() >= period {
            let mut tx = pace_store.begin();
            tx.commit(&format!(
                "ntnsync: periodic sync checkpoint ({} pages)",
                counters.pages_processed
            ))?;
            last_commit = Instant::now();
        }
        Ok(())
    };

    let counters = crawler.process_queue(&limits, Some(&mut pace))?;

    println!(
        "Processed {} page(s), wrote {} file(s), consumed {} queue entr(y/ies), skipped {}, dropped {}.",
        counters.pages_processed,
        counters.files_written,
        counters.queue_files_consumed,
        counters.skipped,
        counters.dropped
    );

    super::finish(
        config,
        &store,
        &format!(
            "ntnsync: sync ({} pages, {} files)",
            counters.pages_processed, counters.files_written
        ),
    )?;
    Ok(())
}
