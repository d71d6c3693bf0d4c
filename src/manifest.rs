// src/manifest.rs

//! Human-editable root manifest (`root.md`)
//!
//! A Markdown task list at the repository root enumerates the enabled root
//! objects, one row per root:
//!
//! ```text
//! - [x] **tech**: https://www.notion.so/My-Wiki-668d797c76fa49349b05ad288df2d136
//! ```
//!
//! Reconciliation runs before every command: duplicate rows (same page id)
//! are deleted and the file rewritten, surviving rows are loaded into the
//! registry as roots, and rows never synced before are enqueued.

use crate::error::{Error, Result};
use crate::id;
use crate::queue::{EntryKind, Priority, Queue, QueueEntry, QueuedPage};
use crate::registry::Registry;
use crate::store::{Store, Transaction};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Relative path of the manifest inside the working copy
pub const MANIFEST_PATH: &str = "root.md";

const TEMPLATE: &str = "# Root Pages\n\n";

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub folder: String,
    pub enabled: bool,
    pub url: String,
    /// Normalized page id extracted from the URL
    pub id: String,
}

fn row_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*-\s*\[( |x|X)\]\s*\*\*([^*]+)\*\*:\s*(\S+)\s*$").unwrap()
    })
}

/// True for folder tokens the configuration accepts.
pub fn is_valid_folder(name: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[a-z0-9-]+$").unwrap());
    re.is_match(name)
}

/// Parse manifest rows out of the file content. Non-row lines are ignored.
pub fn parse(content: &str) -> Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let Some(caps) = row_regex().captures(line) else {
            continue;
        };
        let enabled = !caps[1].trim().is_empty();
        let folder = caps[2].trim().to_string();
        let url = caps[3].to_string();

        if !is_valid_folder(&folder) {
            return Err(Error::Config(format!(
                "invalid folder name {folder:?} in {MANIFEST_PATH} (must match [a-z0-9-]+)"
            )));
        }
        let page_id = id::from_url(&url).ok_or_else(|| {
            Error::Manifest(format!("row for folder {folder:?} has no page id in {url:?}"))
        })?;

        entries.push(ManifestEntry {
            folder,
            enabled,
            url,
            id: page_id,
        });
    }
    Ok(entries)
}

/// Reconcile the manifest into the registry.
///
/// Creates the file from a minimal template when absent, removes duplicate
/// rows, upserts a root record per surviving row, and enqueues rows that
/// have never been synced. Returns the surviving entries.
pub fn reconcile(store: &Store, tx: &mut Transaction<'_>) -> Result<Vec<ManifestEntry>> {
    let content = match store.read(MANIFEST_PATH) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(Error::NotFound(_)) => {
            info!("creating {MANIFEST_PATH} from template");
            tx.write(MANIFEST_PATH, TEMPLATE.as_bytes())?;
            TEMPLATE.to_string()
        }
        Err(e) => return Err(e),
    };

    // De-duplicate by normalized page id, keeping the first occurrence
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept_lines: Vec<&str> = Vec::new();
    let mut removed = 0usize;
    for line in content.lines() {
        if let Some(caps) = row_regex().captures(line)
            && let Some(page_id) = id::from_url(&caps[3])
            && !seen.insert(page_id)
        {
            removed += 1;
            continue;
        }
        kept_lines.push(line);
    }
    if removed > 0 {
        warn!(removed, "removed duplicate manifest rows");
        let mut rewritten = kept_lines.join("\n");
        rewritten.push('\n');
        tx.write(MANIFEST_PATH, rewritten.as_bytes())?;
    }

    let entries = parse(&kept_lines.join("\n"))?;
    let registry = Registry::new(store);
    let queue = Queue::new(store);

    for entry in &entries {
        let mut record = registry.load(&entry.id)?.unwrap_or_default();
        let never_synced = record.last_synced.is_none();
        if record.id.is_empty() {
            record.id = entry.id.clone();
        }
        record.is_root = true;
        record.enabled = entry.enabled;
        record.folder = entry.folder.clone();
        registry.save(tx, &record)?;

        if never_synced && entry.enabled {
            // The record already exists (created just above), so an init
            // entry would be skipped; an update stamped "now" always beats
            // the record's empty last_edited
            let queued = QueueEntry::with_pages(
                EntryKind::Update,
                &entry.folder,
                vec![QueuedPage {
                    id: entry.id.clone(),
                    last_edited: Some(chrono::Utc::now()),
                }],
            );
            let name = queue.create(tx, &queued, Priority::Normal)?;
            info!(page = %entry.id, folder = %entry.folder, queue_entry = %name, "enqueued root for initial sync");
        }
    }

    Ok(entries)
}
