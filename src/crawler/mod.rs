// src/crawler/mod.rs

//! Queue processor: the fetch → convert → write → enqueue-children cycle
//!
//! Consumes queue entries in lexicographic order under a limit budget. Each
//! id either syncs, is skipped (already current), is retained for retry
//! (transient remote error), or is dropped (permanent remote error).
//! Filesystem and git failures are fatal and surface to the caller.

pub mod cleanup;

use crate::assets::AssetPipeline;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetcher::{self, ResolvedObject};
use crate::id;
use crate::markdown::{self, ConvertOptions};
use crate::notion::{Block, NotionApi, Page, Parent};
use crate::paths;
use crate::queue::{EntryKind, Priority, Queue, QueueEntry, QueuedPage};
use crate::registry::{ObjectKind, Registry};
use crate::store::{Store, Transaction};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Flush sync state to disk every this many processed objects
const STATE_FLUSH_INTERVAL: u32 = 10;

/// Bound on update-mode parent recursion
const MAX_PARENT_RECURSION: u32 = 50;

/// Limit budget for one `process_queue` run. Zero means unlimited.
#[derive(Debug, Clone, Default)]
pub struct SyncLimits {
    pub folder_filter: Option<String>,
    pub max_pages: u32,
    pub max_files: u32,
    pub max_queue_files: u32,
    pub max_time: Duration,
}

/// Counters accumulated across one run.
#[derive(Debug, Clone, Default)]
pub struct SyncCounters {
    pub pages_processed: u32,
    pub files_written: u32,
    /// Entries fully handled this run, whether updated in place or deleted
    pub queue_files_consumed: u32,
    pub skipped: u32,
    pub dropped: u32,
}

pub struct Crawler<'a> {
    api: &'a dyn NotionApi,
    store: &'a Store,
    config: &'a Config,
    assets: AssetPipeline,
    cancel: Arc<AtomicBool>,
}

impl<'a> Crawler<'a> {
    pub fn new(
        api: &'a dyn NotionApi,
        store: &'a Store,
        config: &'a Config,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self> {
        Ok(Crawler {
            api,
            store,
            config,
            assets: AssetPipeline::new(config.max_file_size)?,
            cancel,
        })
    }

    /// Drain the queue under `limits`. `callback` runs after every consumed
    /// entry and is the hook for periodic commit pacing.
    pub fn process_queue(
        &self,
        limits: &SyncLimits,
        mut callback: Option<&mut dyn FnMut(&SyncCounters) -> Result<()>>,
    ) -> Result<SyncCounters> {
        let queue = Queue::new(self.store);
        let registry = Registry::new(self.store);
        let started = Instant::now();
        let mut counters = SyncCounters::default();
        let mut skipped_this_run: HashSet<String> = HashSet::new();
        let mut folders_seen: HashSet<String> = HashSet::new();
        let mut since_flush = 0u32;
        let mut tx = self.store.begin();

        loop {
            if self.should_stop(&counters, limits, started) {
                break;
            }

            // Always the lexicographically smallest not yet passed over
            let names = queue.list()?;
            let Some(name) = names
                .into_iter()
                .find(|n| !skipped_this_run.contains(n))
            else {
                break;
            };

            let entry = match queue.read(&name) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(entry = %name, error = %e, "unreadable queue entry, skipping");
                    skipped_this_run.insert(name);
                    continue;
                }
            };

            if let Some(filter) = &limits.folder_filter
                && entry.folder != *filter
            {
                skipped_this_run.insert(name);
                continue;
            }

            if !self.config.queue_delay.is_zero() {
                self.sleep_cancellable(self.config.queue_delay);
                if self.cancel.load(Ordering::Relaxed) {
                    break;
                }
            }

            folders_seen.insert(entry.folder.clone());
            let new_format = entry.pages.is_some();
            let items: Vec<QueuedPage> = if let Some(pages) = &entry.pages {
                pages.clone()
            } else {
                entry
                    .page_ids
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|id| QueuedPage {
                        id,
                        last_edited: None,
                    })
                    .collect()
            };

            let mut remaining: Vec<QueuedPage> = Vec::new();
            for (index, item) in items.iter().enumerate() {
                if self.should_stop(&counters, limits, started) {
                    // Leave everything unprocessed in the entry
                    remaining.extend(items[index..].iter().cloned());
                    break;
                }

                if self.skip_decision(&registry, &entry, item, new_format)? {
                    counters.skipped += 1;
                    continue;
                }

                match self.process_object(
                    &mut tx,
                    &item.id,
                    &entry.folder,
                    entry.kind == EntryKind::Init,
                    entry.parent_id.as_deref(),
                    &mut counters,
                    0,
                ) {
                    Ok(files) => {
                        counters.pages_processed += 1;
                        counters.files_written += files;
                        since_flush += 1;
                        if since_flush >= STATE_FLUSH_INTERVAL {
                            self.flush_state(&mut tx, &folders_seen)?;
                            since_flush = 0;
                        }
                    }
                    Err(e) if e.is_transient() => {
                        warn!(page = %item.id, error = %e, "transient error, keeping queued");
                        remaining.push(item.clone());
                    }
                    Err(e) if e.is_permanent_remote() => {
                        warn!(page = %item.id, error = %e, "permanent error, dropping");
                        counters.dropped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            if remaining.is_empty() {
                queue.delete(&mut tx, &name)?;
                debug!(entry = %name, "queue entry drained");
            } else {
                let mut updated = entry.clone();
                if new_format {
                    updated.pages = Some(remaining);
                    updated.page_ids = None;
                } else {
                    updated.page_ids = Some(remaining.into_iter().map(|p| p.id).collect());
                }
                queue.update(&mut tx, &name, &updated)?;
                debug!(entry = %name, "queue entry updated with leftovers");
            }
            // Deleted entries count toward the budget, not just updates
            counters.queue_files_consumed += 1;

            if let Some(cb) = callback.as_deref_mut() {
                cb(&counters)?;
            }
        }

        self.flush_state(&mut tx, &folders_seen)?;
        info!(
            pages = counters.pages_processed,
            files = counters.files_written,
            consumed = counters.queue_files_consumed,
            skipped = counters.skipped,
            dropped = counters.dropped,
            "queue pass finished"
        );
        Ok(counters)
    }

    /// Sync one object immediately, outside any queue entry. Used by the
    /// `get` command and by update-mode parent recursion.
    pub fn sync_object(&self, raw_id: &str, folder: &str) -> Result<u32> {
        let mut counters = SyncCounters::default();
        let mut tx = self.store.begin();
        let files = self.process_object(&mut tx, raw_id, folder, false, None, &mut counters, 0)?;
        Ok(files)
    }

    fn should_stop(&self, counters: &SyncCounters, limits: &SyncLimits, started: Instant) -> bool {
        if self.cancel.load(Ordering::Relaxed) {
            return true;
        }
        (limits.max_pages > 0 && counters.pages_processed >= limits.max_pages)
            || (limits.max_files > 0 && counters.files_written >= limits.max_files)
            || (limits.max_queue_files > 0
                && counters.queue_files_consumed >= limits.max_queue_files)
            || (!limits.max_time.is_zero() && started.elapsed() >= limits.max_time)
    }

    /// Decide whether a queued id is already current.
    fn skip_decision(
        &self,
        registry: &Registry<'_>,
        entry: &QueueEntry,
        item: &QueuedPage,
        new_format: bool,
    ) -> Result<bool> {
        let record = registry.load(&item.id)?;
        if new_format {
            // Process only when the queued edit time is strictly newer
            let Some(record) = record else {
                return Ok(false);
            };
            return Ok(match (item.last_edited, record.last_edited) {
                (Some(queued), Some(stored)) => queued <= stored,
                (Some(_), None) => false,
                (None, _) => true,
            });
        }
        match entry.kind {
            EntryKind::Init => Ok(record.is_some()),
            EntryKind::Update => Ok(false),
        }
    }

    /// The fetch → convert → write → enqueue-children routine for one
    /// object. Returns how many Markdown files were written, including
    /// files for parents fetched along the way.
    fn process_object(
        &self,
        tx: &mut Transaction<'_>,
        raw_id: &str,
        folder: &str,
        init_mode: bool,
        expected_parent: Option<&str>,
        counters: &mut SyncCounters,
        depth: u32,
    ) -> Result<u32> {
        if depth > MAX_PARENT_RECURSION {
            return Err(Error::ResolutionDepthExceeded(MAX_PARENT_RECURSION as usize));
        }
        let norm = id::normalize(raw_id);
        let registry = Registry::new(self.store);

        // Root-gate: descendants of a disabled root are not synced
        match registry.trace_root(&norm) {
            Ok(Some(root)) if !root.enabled => {
                debug!(page = %norm, root = %root.id, "root disabled, skipping");
                return Ok(0);
            }
            Ok(_) => {}
            Err(Error::Cycle(at)) => {
                warn!(page = %norm, at = %at, "cycle in recorded ancestry, treating as orphaned");
            }
            Err(e) => return Err(e),
        }

        let fetch_start = Instant::now();
        match self.api.get_page(&norm) {
            Ok(page) => {
                self.process_page(tx, &registry, &norm, page, folder, init_mode, expected_parent, counters, depth, fetch_start)
            }
            Err(Error::DatabaseIsNotPage(_)) => {
                self.process_database(tx, &registry, &norm, folder, init_mode, expected_parent, counters, depth, fetch_start)
            }
            Err(e) => Err(e),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_page(
        &self,
        tx: &mut Transaction<'_>,
        registry: &Registry<'_>,
        norm: &str,
        page: Page,
        folder: &str,
        init_mode: bool,
        expected_parent: Option<&str>,
        counters: &mut SyncCounters,
        depth: u32,
        fetch_start: Instant,
    ) -> Result<u32> {
        let meta_ms = fetch_start.elapsed().as_millis() as u64;

        let blocks_start = Instant::now();
        let fetched = fetcher::fetch_blocks(self.api, norm, self.config.block_depth)?;
        let blocks_ms = blocks_start.elapsed().as_millis() as u64;

        let mut files_written = 0u32;
        let parent_id = self.resolve_parent(
            tx,
            registry,
            norm,
            page.parent.as_ref(),
            folder,
            init_mode,
            expected_parent,
            counters,
            depth,
            &mut files_written,
        )?;

        let existing = registry.load(norm)?;
        let is_root = existing.as_ref().map(|r| r.is_root).unwrap_or(false)
            || parent_id.is_none();
        let title = {
            let t = page.title();
            if t.is_empty() {
                "untitled".to_string()
            } else {
                t
            }
        };

        let file_path = paths::allocate(
            registry,
            norm,
            &title,
            is_root,
            parent_id.as_deref().unwrap_or(""),
            folder,
        )?;

        let now = Utc::now();
        let created_by = page
            .created_by
            .as_ref()
            .and_then(|u| fetcher::resolve_user(self.api, registry, tx, u))
            .map(|r| fetcher::format_user(&r));
        let last_edited_by = page
            .last_edited_by
            .as_ref()
            .and_then(|u| fetcher::resolve_user(self.api, registry, tx, u))
            .map(|r| fetcher::format_user(&r));

        let row_properties = matches!(page.parent, Some(Parent::DatabaseId { .. }))
            .then(|| markdown::flatten_properties(&page))
            .filter(|p| !p.is_empty());

        let options = ConvertOptions {
            id: norm.to_string(),
            kind: ObjectKind::Page,
            folder: folder.to_string(),
            title: title.clone(),
            file_path: file_path.clone(),
            now,
            last_edited: page.last_edited_time,
            is_root,
            parent_id: parent_id.clone(),
            simplified_depth: fetched.was_limited.then_some(fetched.depth_limit),
            fetch_duration: Some(fetch_start.elapsed()),
            created_by,
            last_edited_by,
            properties: row_properties,
        };

        let convert_start = Instant::now();
        let bytes = {
            let assets = &self.assets;
            let mut rewrite = |url: &str| assets.process(registry, tx, &file_path, norm, url);
            markdown::convert_page(&page, &fetched.blocks, &options, &mut rewrite)
        };
        let convert_ms = convert_start.elapsed().as_millis() as u64;
        let content_hash = hex::encode(Sha256::digest(&bytes));

        let write_start = Instant::now();
        tx.write(&file_path, &bytes)?;
        files_written += 1;
        let write_ms = write_start.elapsed().as_millis() as u64;

        // Child discovery: child_page blocks anywhere in the fetched tree
        let mut discovered = Vec::new();
        let mut seen = HashSet::new();
        collect_child_pages(&fetched.blocks, &mut discovered, &mut seen);
        self.enqueue_children(tx, registry, norm, folder, &discovered)?;

        let mut record = existing.unwrap_or_default();
        record.id = norm.to_string();
        record.kind = ObjectKind::Page;
        record.folder = folder.to_string();
        record.file_path = file_path.clone();
        record.title = title;
        record.last_edited = page.last_edited_time;
        record.last_synced = Some(now);
        record.parent_id = parent_id.unwrap_or_default();
        record.children = discovered.into_iter().map(|(child_id, _)| child_id).collect();
        record.content_hash = content_hash;
        // is_root and enabled stay whatever root reconciliation set
        registry.save(tx, &record)?;

        info!(
            page = %norm,
            folder,
            path = %file_path,
            meta_ms,
            blocks_ms,
            convert_ms,
            write_ms,
            "synced page"
        );
        Ok(files_written)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_database(
        &self,
        tx: &mut Transaction<'_>,
        registry: &Registry<'_>,
        norm: &str,
        folder: &str,
        init_mode: bool,
        expected_parent: Option<&str>,
        counters: &mut SyncCounters,
        depth: u32,
        fetch_start: Instant,
    ) -> Result<u32> {
        let database = self.api.get_database(norm)?;
        let rows = self.api.query_database(norm)?;
        let meta_ms = fetch_start.elapsed().as_millis() as u64;

        let mut files_written = 0u32;
        let parent_id = self.resolve_parent(
            tx,
            registry,
            norm,
            database.parent.as_ref(),
            folder,
            init_mode,
            expected_parent,
            counters,
            depth,
            &mut files_written,
        )?;

        let existing = registry.load(norm)?;
        let is_root = existing.as_ref().map(|r| r.is_root).unwrap_or(false)
            || parent_id.is_none();
        let title = {
            let t = database.title_text();
            if t.is_empty() {
                "untitled".to_string()
            } else {
                t
            }
        };

        let file_path = paths::allocate(
            registry,
            norm,
            &title,
            is_root,
            parent_id.as_deref().unwrap_or(""),
            folder,
        )?;

        let now = Utc::now();
        let options = ConvertOptions {
            id: norm.to_string(),
            kind: ObjectKind::Database,
            folder: folder.to_string(),
            title: title.clone(),
            file_path: file_path.clone(),
            now,
            last_edited: database.last_edited_time,
            is_root,
            parent_id: parent_id.clone(),
            simplified_depth: None,
            fetch_duration: Some(fetch_start.elapsed()),
            created_by: None,
            last_edited_by: None,
            properties: None,
        };

        let convert_start = Instant::now();
        let bytes = {
            let assets = &self.assets;
            let mut rewrite = |url: &str| assets.process(registry, tx, &file_path, norm, url);
            markdown::convert_database(&database, &rows, &options, &mut rewrite)
        };
        let convert_ms = convert_start.elapsed().as_millis() as u64;
        let content_hash = hex::encode(Sha256::digest(&bytes));

        tx.write(&file_path, &bytes)?;
        files_written += 1;

        // A database's children are its query rows
        let discovered: Vec<(String, Option<DateTime<Utc>>)> = rows
            .iter()
            .map(|r| (id::normalize(&r.id), r.last_edited_time))
            .collect();
        self.enqueue_children(tx, registry, norm, folder, &discovered)?;

        let mut record = existing.unwrap_or_default();
        record.id = norm.to_string();
        record.kind = ObjectKind::Database;
        record.folder = folder.to_string();
        record.file_path = file_path.clone();
        record.title = title;
        record.last_edited = database.last_edited_time;
        record.last_synced = Some(now);
        record.parent_id = parent_id.unwrap_or_default();
        record.children = discovered.into_iter().map(|(child_id, _)| child_id).collect();
        record.content_hash = content_hash;
        registry.save(tx, &record)?;

        info!(
            database = %norm,
            folder,
            path = %file_path,
            rows = record.children.len(),
            meta_ms,
            convert_ms,
            "synced database"
        );
        Ok(files_written)
    }

    /// Resolve the parent reference to a page/database id, handling block
    /// parents, unknown parents (enqueue in init mode, recurse in update
    /// mode), and the workspace (resolves as root).
    #[allow(clippy::too_many_arguments)]
    fn resolve_parent(
        &self,
        tx: &mut Transaction<'_>,
        registry: &Registry<'_>,
        norm: &str,
        parent: Option<&Parent>,
        folder: &str,
        init_mode: bool,
        expected_parent: Option<&str>,
        counters: &mut SyncCounters,
        depth: u32,
        files_written: &mut u32,
    ) -> Result<Option<String>> {
        let resolved = match parent {
            None | Some(Parent::Workspace { .. }) => return Ok(None),
            Some(Parent::BlockId { block_id }) => {
                match fetcher::resolve_block_to_object(self.api, block_id)? {
                    ResolvedObject::Workspace => return Ok(None),
                    other => id::normalize(other.id().unwrap_or_default()),
                }
            }
            Some(other) => id::normalize(other.id().unwrap_or_default()),
        };

        let expected = expected_parent.map(id::normalize);
        if expected.as_deref() == Some(resolved.as_str()) || registry.load(&resolved)?.is_some() {
            return Ok(Some(resolved));
        }

        if init_mode {
            // Queue the parent for later and stand the object up under the
            // folder for now
            let entry = QueueEntry::with_pages(
                EntryKind::Init,
                folder,
                vec![QueuedPage {
                    id: resolved.clone(),
                    last_edited: None,
                }],
            );
            let queue = Queue::new(self.store);
            let name = queue.create(tx, &entry, Priority::Normal)?;
            debug!(page = %norm, parent = %resolved, queue_entry = %name, "unknown parent enqueued, treating object as root-for-now");
            return Ok(None);
        }

        // Update mode: materialize the parent immediately
        match self.process_object(tx, &resolved, folder, false, None, counters, depth + 1) {
            Ok(files) => {
                *files_written += files;
                Ok(Some(resolved))
            }
            Err(Error::ObjectIsBlock(_)) => {
                // The recorded parent id was itself a block; hop once more
                match fetcher::resolve_block_to_object(self.api, &resolved)? {
                    ResolvedObject::Workspace => Ok(None),
                    other => {
                        let object_id = id::normalize(other.id().unwrap_or_default());
                        let files = self.process_object(
                            tx,
                            &object_id,
                            folder,
                            false,
                            None,
                            counters,
                            depth + 1,
                        )?;
                        *files_written += files;
                        Ok(Some(object_id))
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Enqueue discovered children that are not yet registered, with this
    /// object as the parent hint. Each child carries the remote-edit time
    /// observed at discovery so the skip rule can compare it later.
    fn enqueue_children(
        &self,
        tx: &mut Transaction<'_>,
        registry: &Registry<'_>,
        parent: &str,
        folder: &str,
        children: &[(String, Option<DateTime<Utc>>)],
    ) -> Result<()> {
        let mut unregistered = Vec::new();
        for (child_id, last_edited) in children {
            if registry.load(child_id)?.is_none() {
                unregistered.push(QueuedPage {
                    id: child_id.clone(),
                    last_edited: *last_edited,
                });
            }
        }
        if unregistered.is_empty() {
            return Ok(());
        }
        let count = unregistered.len();
        let entry = QueueEntry {
            kind: EntryKind::Init,
            folder: folder.to_string(),
            parent_id: Some(parent.to_string()),
            pages: Some(unregistered),
            page_ids: None,
            created_at: Utc::now(),
        };
        let queue = Queue::new(self.store);
        let name = queue.create(tx, &entry, Priority::Normal)?;
        debug!(parent = %parent, children = count, queue_entry = %name, "enqueued discovered children");
        Ok(())
    }

    fn flush_state(&self, tx: &mut Transaction<'_>, folders: &HashSet<String>) -> Result<()> {
        let mut state = crate::registry::SyncState::load(self.store)?;
        for folder in folders {
            state.folders.insert(folder.clone());
        }
        state.save(tx)
    }

    fn sleep_cancellable(&self, duration: Duration) {
        let step = Duration::from_millis(100);
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if self.cancel.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep(step.min(deadline - Instant::now()));
        }
    }
}

/// Depth-first collection of `child_page` blocks, deduplicated, discovery
/// order preserved. Each entry pairs the normalized id with the block's
/// remote-edit time.
fn collect_child_pages(
    blocks: &[Block],
    out: &mut Vec<(String, Option<DateTime<Utc>>)>,
    seen: &mut HashSet<String>,
) {
    for block in blocks {
        if block.block_type == "child_page" {
            let norm = id::normalize(&block.id);
            if seen.insert(norm.clone()) {
                out.push((norm, block.last_edited_time));
            }
        }
        collect_child_pages(&block.children, out, seen);
    }
}
