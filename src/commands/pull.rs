// src/commands/pull.rs
//! Pull recently edited pages into the work queue

use crate::config::{self, Config};
use crate::id;
use crate::notion::{NotionApi, NotionClient, Page};
use crate::queue::{EntryKind, Priority, Queue, QueueEntry, QueuedPage};
use crate::registry::{Registry, SyncState};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::info;

pub fn cmd_pull(
    config: &Config,
    folder: Option<String>,
    since: Option<String>,
    max_pages: u32,
    all: bool,
    dry_run: bool,
) -> Result<()> {
    let store = super::open_and_reconcile(config)?;
    let client = NotionClient::new(config.token()?)?;

    let now = Utc::now();
    let mut state = SyncState::load(&store)?;
    let cutoff: Option<DateTime<Utc>> = if all {
        None
    } else if let Some(since) = &since {
        let lookback = config::parse_since(since)?;
        Some(now - chrono::Duration::from_std(lookback).context("Lookback out of range")?)
    } else {
        state.last_pull_time
    };

    // Search is newest-first; stop at the cutoff or the page cap
    let mut collected = 0u32;
    let mut should_stop = |page: &Page| {
        if max_pages > 0 && collected >= max_pages {
            return true;
        }
        if let (Some(cutoff), Some(edited)) = (cutoff, page.last_edited_time)
            && edited < cutoff
        {
            return true;
        }
        collected += 1;
        false
    };
    let pages = client.search_all_pages_with_stop(&mut should_stop)?;
    info!(pages = pages.len(), ?cutoff, "pull search finished");

    // Group by target folder: registered pages keep their folder, the rest
    // go to the requested one (or default)
    let registry = Registry::new(&store);
    let fallback = folder.clone().unwrap_or_else(|| "default".to_string());
    let mut by_folder: BTreeMap<String, Vec<QueuedPage>> = BTreeMap::new();
    let mut oldest: Option<DateTime<Utc>> = None;

    for page in &pages {
        let norm = id::normalize(&page.id);
        let target = registry
            .load(&norm)?
            .map(|r| r.folder)
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| fallback.clone());
        if let Some(filter) = &folder
            && target != *filter
        {
            continue;
        }
        if let Some(edited) = page.last_edited_time {
            oldest = Some(match oldest {
                Some(current) => current.min(edited),
                None => edited,
            });
        }
        by_folder.entry(target).or_default().push(QueuedPage {
            id: norm,
            last_edited: page.last_edited_time,
        });
    }

    if dry_run {
        for (target, pages) in &by_folder {
            println!("{target}: {} page(s)", pages.len());
            for page in pages {
                let edited = page
                    .last_edited
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "unknown".to_string());
                println!("  {} (edited {edited})", page.id);
            }
        }
        println!("Dry run: no queue entries written.");
        return Ok(());
    }

    let queue = Queue::new(&store);
    let mut tx = store.begin();
    let mut entries = 0usize;
    let mut queued = 0usize;
    for (target, pages) in by_folder {
        queued += pages.len();
        let entry = QueueEntry::with_pages(EntryKind::Update, &target, pages);
        queue.create(&mut tx, &entry, Priority::Normal)?;
        entries += 1;
    }

    state.last_pull_time = Some(now);
    state.oldest_pull_result = oldest;
    state.save(&mut tx)?;

    println!("Queued {queued} page(s) across {entries} entr(y/ies).");
    super::finish(config, &store, "ntnsync: pull")?;
    Ok(())
}
