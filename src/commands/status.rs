// src/commands/status.rs
//! Sync state summary

use crate::config::Config;
use crate::queue::Queue;
use crate::registry::{ObjectKind, Registry, SyncState};
use anyhow::Result;

pub fn cmd_status(config: &Config, folder: Option<String>) -> Result<()> {
    let store = super::open_and_reconcile(config)?;
    let registry = Registry::new(&store);
    let queue = Queue::new(&store);
    let state = SyncState::load(&store)?;

    let records: Vec<_> = registry
        .list()?
        .into_iter()
        .filter(|r| folder.as_ref().is_none_or(|f| r.folder == *f))
        .collect();

    let pages = records
        .iter()
        .filter(|r| r.kind == ObjectKind::Page)
        .count();
    let databases = records
        .iter()
        .filter(|r| r.kind == ObjectKind::Database)
        .count();
    let roots = records.iter().filter(|r| r.is_root).count();
    let enabled_roots = records.iter().filter(|r| r.is_root && r.enabled).count();

    println!("Working copy: {}", store.root().display());
    match &folder {
        Some(f) => println!("Folder:       {f}"),
        None => println!(
            "Folders:      {}",
            if state.folders.is_empty() {
                "(none)".to_string()
            } else {
                state.folders.iter().cloned().collect::<Vec<_>>().join(", ")
            }
        ),
    }
    println!("Objects:      {} page(s), {} database(s)", pages, databases);
    println!("Roots:        {roots} ({enabled_roots} enabled)");

    let backlog = queue.list()?;
    let high_priority = backlog
        .iter()
        .filter(|n| n.parse::<u64>().map(|v| v < 1000).unwrap_or(false))
        .count();
    println!(
        "Queue:        {} entr(y/ies) ({high_priority} high-priority)",
        backlog.len()
    );

    match state.last_pull_time {
        Some(t) => println!("Last pull:    {}", t.to_rfc3339()),
        None => println!("Last pull:    never"),
    }
    if let Some(t) = state.oldest_pull_result {
        println!("Pull horizon: {}", t.to_rfc3339());
    }
    Ok(())
}
