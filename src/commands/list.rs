// src/commands/list.rs
//! List synced objects, flat or as a tree

use crate::config::Config;
use crate::id;
use crate::registry::{ObjectRecord, Registry};
use anyhow::Result;
use std::collections::{HashMap, HashSet};

pub fn cmd_list(config: &Config, folder: Option<String>, tree: bool) -> Result<()> {
    let store = super::open_and_reconcile(config)?;
    let registry = Registry::new(&store);

    let records: Vec<ObjectRecord> = registry
        .list()?
        .into_iter()
        .filter(|r| folder.as_ref().is_none_or(|f| r.folder == *f))
        .collect();

    if records.is_empty() {
        println!("No synced objects.");
        return Ok(());
    }

    if tree {
        print_tree(&records);
    } else {
        println!("{:7}  {:32}  {:40}  TITLE", "KIND", "ID", "PATH");
        println!("{}", "-".repeat(100));
        for record in &records {
            println!(
                "{:7}  {:32}  {:40}  {}",
                record.kind.as_str(),
                record.id,
                record.file_path,
                record.title
            );
        }
        println!("\nTotal: {} object(s)", records.len());
    }
    Ok(())
}

fn print_tree(records: &[ObjectRecord]) {
    let by_id: HashMap<&str, &ObjectRecord> =
        records.iter().map(|r| (r.id.as_str(), r)).collect();
    let known: HashSet<&str> = by_id.keys().copied().collect();

    // Top level: roots plus anything whose parent is not in the listing
    for record in records {
        let parent = id::normalize(&record.parent_id);
        if record.is_root || record.parent_id.is_empty() || !known.contains(parent.as_str()) {
            print_subtree(record, &by_id, 0, &mut HashSet::new());
        }
    }
}

fn print_subtree<'r>(
    record: &'r ObjectRecord,
    by_id: &HashMap<&str, &'r ObjectRecord>,
    depth: usize,
    visited: &mut HashSet<&'r str>,
) {
    if !visited.insert(&record.id) {
        return;
    }
    let marker = if record.is_root {
        if record.enabled { "[x]" } else { "[ ]" }
    } else {
        "   "
    };
    println!(
        "{}{} {} ({})",
        "  ".repeat(depth),
        marker,
        record.title,
        record.file_path
    );
    for child in &record.children {
        if let Some(child_record) = by_id.get(id::normalize(child).as_str()) {
            print_subtree(child_record, by_id, depth + 1, visited);
        }
    }
}
