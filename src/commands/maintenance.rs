// src/commands/maintenance.rs
//! Cleanup and reindex commands

use crate::config::Config;
use crate::crawler::cleanup::{cleanup, reindex};
use anyhow::Result;

pub fn cmd_cleanup(config: &Config, dry_run: bool) -> Result<()> {
    let store = super::open_and_reconcile(config)?;
    let mut tx = store.begin();
    let report = cleanup(&store, &mut tx, dry_run)?;

    if report.orphans.is_empty() {
        println!("No orphaned objects.");
        return Ok(());
    }
    let verb = if dry_run { "Would delete" } else { "Deleted" };
    println!("{verb} {} orphaned object(s):", report.orphans.len());
    for orphan in &report.orphans {
        println!("  {orphan}");
    }
    if !report.files_deleted.is_empty() {
        println!("{verb} {} Markdown file(s).", report.files_deleted.len());
    }
    if !report.assets_deleted.is_empty() {
        println!("{verb} {} orphaned asset(s).", report.assets_deleted.len());
    }
    println!("Kept {} object(s).", report.kept);

    if !dry_run {
        super::finish(config, &store, "ntnsync: cleanup")?;
    }
    Ok(())
}

pub fn cmd_reindex(config: &Config, dry_run: bool) -> Result<()> {
    let store = super::open_and_reconcile(config)?;
    let mut tx = store.begin();
    let report = reindex(&store, &mut tx, dry_run)?;

    println!(
        "Scanned {} file(s), {} missing record(s).",
        report.scanned,
        report.recovered.len()
    );
    for page_id in &report.recovered {
        println!("  {page_id}");
    }

    if !dry_run && !report.recovered.is_empty() {
        super::finish(config, &store, "ntnsync: reindex")?;
    }
    Ok(())
}
