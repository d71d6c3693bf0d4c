// src/commands/scan.rs
//! Workspace-wide discovery of unregistered pages

use crate::config::Config;
use crate::id;
use crate::notion::{NotionApi, NotionClient};
use crate::queue::{EntryKind, Priority, Queue, QueueEntry, QueuedPage};
use crate::registry::Registry;
use anyhow::Result;

pub fn cmd_scan(config: &Config, folder: Option<String>) -> Result<()> {
    let store = super::open_and_reconcile(config)?;
    let client = NotionClient::new(config.token()?)?;
    let registry = Registry::new(&store);
    let target = folder.unwrap_or_else(|| "default".to_string());

    let pages = client.search_all_pages_with_stop(&mut |_| false)?;
    println!("Workspace search returned {} page(s).", pages.len());

    let mut unregistered = Vec::new();
    for page in &pages {
        let norm = id::normalize(&page.id);
        if registry.load(&norm)?.is_none() {
            unregistered.push(QueuedPage {
                id: norm,
                last_edited: page.last_edited_time,
            });
        }
    }

    if unregistered.is_empty() {
        println!("Everything is already registered.");
        return Ok(());
    }

    let count = unregistered.len();
    let queue = Queue::new(&store);
    let mut tx = store.begin();
    let entry = QueueEntry::with_pages(EntryKind::Init, &target, unregistered);
    let name = queue.create(&mut tx, &entry, Priority::Normal)?;

    println!("Enqueued {count} unregistered page(s) into {target} (entry {name}).");
    println!("Run `ntnsync sync` to process them.");
    super::finish(config, &store, "ntnsync: scan")?;
    Ok(())
}
