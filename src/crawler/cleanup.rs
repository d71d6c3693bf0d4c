// src/crawler/cleanup.rs

//! Orphan cleanup and registry reindexing
//!
//! Cleanup deletes every object record (and its Markdown file) whose
//! ancestry does not terminate at a root listed in `root.md`. A cycle
//! aborts that single record's trace, not the whole pass. Reindex walks the
//! Markdown tree and rebuilds registry records that are missing, using each
//! file's frontmatter.

use crate::config::STATE_DIR;
use crate::error::{Error, Result};
use crate::id;
use crate::manifest;
use crate::markdown::frontmatter;
use crate::registry::{ObjectKind, ObjectRecord, Registry, SyncState};
use crate::store::{Store, Transaction};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Ids of deleted (or to-be-deleted, in dry-run) records
    pub orphans: Vec<String>,
    /// Markdown files removed alongside them
    pub files_deleted: Vec<String>,
    /// Asset files removed because every referencing page was an orphan
    pub assets_deleted: Vec<String>,
    pub kept: usize,
}

/// Remove records that no longer trace to a manifest root.
pub fn cleanup(store: &Store, tx: &mut Transaction<'_>, dry_run: bool) -> Result<CleanupReport> {
    let manifest_ids: HashSet<String> = match store.read(manifest::MANIFEST_PATH) {
        Ok(bytes) => manifest::parse(&String::from_utf8_lossy(&bytes))?
            .into_iter()
            .map(|e| e.id)
            .collect(),
        Err(Error::NotFound(_)) => HashSet::new(),
        Err(e) => return Err(e),
    };

    let registry = Registry::new(store);
    let records = registry.list()?;
    let by_id: HashMap<String, &ObjectRecord> =
        records.iter().map(|r| (r.id.clone(), r)).collect();

    let mut report = CleanupReport::default();

    for record in &records {
        if traces_to_manifest_root(record, &by_id, &manifest_ids) {
            report.kept += 1;
            continue;
        }
        report.orphans.push(record.id.clone());
        if !record.file_path.is_empty() {
            report.files_deleted.push(record.file_path.clone());
        }
        if dry_run {
            continue;
        }
        if !record.file_path.is_empty() {
            tx.delete(&record.file_path)?;
        }
        registry.delete(tx, record)?;
        info!(page = %record.id, path = %record.file_path, "deleted orphan");
    }

    let orphan_set: HashSet<String> = report.orphans.iter().cloned().collect();
    cleanup_assets(store, tx, &orphan_set, dry_run, &mut report)?;

    info!(
        orphans = report.orphans.len(),
        kept = report.kept,
        dry_run,
        "cleanup pass finished"
    );
    Ok(report)
}

/// Walk `parent_id` links to the terminal root; true when that root is a
/// manifest row. A cycle makes the record an orphan, nothing more.
fn traces_to_manifest_root(
    record: &ObjectRecord,
    by_id: &HashMap<String, &ObjectRecord>,
    manifest_ids: &HashSet<String>,
) -> bool {
    let mut current = record;
    let mut visited: HashSet<&str> = HashSet::new();
    loop {
        if !visited.insert(&current.id) {
            warn!(page = %record.id, at = %current.id, "cycle while tracing ancestry, treating as orphaned");
            return false;
        }
        if current.is_root {
            return manifest_ids.contains(&id::normalize(&current.id));
        }
        if current.parent_id.is_empty() {
            return false;
        }
        match by_id.get(&id::normalize(&current.parent_id)) {
            Some(parent) => current = parent,
            None => return false,
        }
    }
}

/// Delete asset files whose owning page (per the sibling manifest) was
/// removed this pass.
fn cleanup_assets(
    store: &Store,
    tx: &mut Transaction<'_>,
    orphans: &HashSet<String>,
    dry_run: bool,
    report: &mut CleanupReport,
) -> Result<()> {
    if orphans.is_empty() {
        return Ok(());
    }
    for name in store.list(&format!("{STATE_DIR}/ids"))? {
        let Some(asset_id) = name
            .strip_prefix("file-")
            .and_then(|n| n.strip_suffix(".json"))
        else {
            continue;
        };
        let registry = Registry::new(store);
        let Some(asset) = registry.load_asset(asset_id)? else {
            continue;
        };
        let manifest_rel = format!("{}.meta.json", asset.file_path);
        let owner = store
            .read(&manifest_rel)
            .ok()
            .and_then(|bytes| {
                serde_json::from_slice::<crate::assets::SiblingManifest>(&bytes).ok()
            })
            .map(|m| m.parent_page_id);
        let Some(owner) = owner else { continue };
        if !orphans.contains(&owner) {
            continue;
        }
        report.assets_deleted.push(asset.file_path.clone());
        if dry_run {
            continue;
        }
        tx.delete(&asset.file_path)?;
        tx.delete(&manifest_rel)?;
        tx.delete(&format!("{STATE_DIR}/ids/{name}"))?;
        info!(asset = %asset_id, path = %asset.file_path, "deleted orphaned asset");
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct ReindexReport {
    /// Records that were (or would be) created from frontmatter
    pub recovered: Vec<String>,
    pub scanned: usize,
}

/// Rebuild registry records missing for on-disk Markdown files.
pub fn reindex(store: &Store, tx: &mut Transaction<'_>, dry_run: bool) -> Result<ReindexReport> {
    let registry = Registry::new(store);
    let mut report = ReindexReport::default();

    let mut folders: BTreeSet<String> = SyncState::load(store)?.folders;
    if let Ok(bytes) = store.read(manifest::MANIFEST_PATH)
        && let Ok(entries) = manifest::parse(&String::from_utf8_lossy(&bytes))
    {
        folders.extend(entries.into_iter().map(|e| e.folder));
    }

    for folder in folders {
        walk_markdown(store, &folder, &mut |rel| {
            report.scanned += 1;
            let bytes = store.read(rel)?;
            let Some(fields) = frontmatter::parse(&String::from_utf8_lossy(&bytes)) else {
                return Ok(());
            };
            let Some(page_id) = fields.get("id").map(|v| id::normalize(v)) else {
                return Ok(());
            };
            if registry.load(&page_id)?.is_some() {
                return Ok(());
            }

            report.recovered.push(page_id.clone());
            if dry_run {
                return Ok(());
            }
            let kind = match fields.get("kind").map(String::as_str) {
                Some("database") => ObjectKind::Database,
                _ => ObjectKind::Page,
            };
            let record = ObjectRecord {
                id: page_id.clone(),
                kind,
                folder: fields.get("folder").cloned().unwrap_or_default(),
                file_path: rel.to_string(),
                title: fields.get("title").cloned().unwrap_or_default(),
                parent_id: fields
                    .get("notion_parent_id")
                    .map(|v| id::normalize(v))
                    .unwrap_or_default(),
                is_root: fields.get("is_root").map(String::as_str) == Some("true"),
                enabled: fields.get("is_root").map(String::as_str) == Some("true"),
                ..Default::default()
            };
            registry.save(tx, &record)?;
            info!(page = %page_id, path = rel, "recovered registry record from frontmatter");
            Ok(())
        })?;
    }

    info!(
        scanned = report.scanned,
        recovered = report.recovered.len(),
        dry_run,
        "reindex pass finished"
    );
    Ok(report)
}

/// Recursive walk over `.md` files under `dir`, shallow listing per level.
fn walk_markdown(
    store: &Store,
    dir: &str,
    visit: &mut dyn FnMut(&str) -> Result<()>,
) -> Result<()> {
    for name in store.list(dir)? {
        let rel = format!("{dir}/{name}");
        if name.ends_with(".md") {
            visit(&rel)?;
        } else if store.is_dir(&rel) {
            walk_markdown(store, &rel, visit)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::GitConfig;
    use tempfile::TempDir;

    const ROOT_URL: &str = "https://www.notion.so/Wiki-668d797c76fa49349b05ad288df2d136";
    const ROOT_ID: &str = "668d797c76fa49349b05ad288df2d136";

    fn setup() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), GitConfig::default()).unwrap();
        (dir, store)
    }

    fn save_record(store: &Store, record: &ObjectRecord) {
        let registry = Registry::new(store);
        let mut tx = store.begin();
        registry.save(&mut tx, record).unwrap();
    }

    fn root_record() -> ObjectRecord {
        ObjectRecord {
            id: ROOT_ID.to_string(),
            folder: "tech".to_string(),
            file_path: "tech/wiki.md".to_string(),
            is_root: true,
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_cleanup_keeps_rooted_records() {
        let (_dir, store) = setup();
        let mut tx = store.begin();
        tx.write(
            manifest::MANIFEST_PATH,
            format!("- [x] **tech**: {ROOT_URL}\n").as_bytes(),
        )
        .unwrap();
        save_record(&store, &root_record());
        save_record(
            &store,
            &ObjectRecord {
                id: "child1".to_string(),
                parent_id: ROOT_ID.to_string(),
                file_path: "tech/wiki/child.md".to_string(),
                ..Default::default()
            },
        );

        let report = cleanup(&store, &mut tx, false).unwrap();
        assert_eq!(report.kept, 2);
        assert!(report.orphans.is_empty());
    }

    #[test]
    fn test_cleanup_deletes_orphans() {
        let (_dir, store) = setup();
        let mut tx = store.begin();
        tx.write(manifest::MANIFEST_PATH, b"# Root Pages\n").unwrap();
        tx.write("tech/stray.md", b"content").unwrap();
        save_record(
            &store,
            &ObjectRecord {
                id: "stray1".to_string(),
                file_path: "tech/stray.md".to_string(),
                ..Default::default()
            },
        );

        let report = cleanup(&store, &mut tx, false).unwrap();
        assert_eq!(report.orphans, vec!["stray1"]);
        assert!(!store.exists("tech/stray.md"));
        assert!(Registry::new(&store).load("stray1").unwrap().is_none());
    }

    #[test]
    fn test_cleanup_dry_run_traces_only() {
        let (_dir, store) = setup();
        let mut tx = store.begin();
        tx.write(manifest::MANIFEST_PATH, b"# Root Pages\n").unwrap();
        tx.write("tech/stray.md", b"content").unwrap();
        save_record(
            &store,
            &ObjectRecord {
                id: "stray1".to_string(),
                file_path: "tech/stray.md".to_string(),
                ..Default::default()
            },
        );

        let report = cleanup(&store, &mut tx, true).unwrap();
        assert_eq!(report.orphans, vec!["stray1"]);
        assert!(store.exists("tech/stray.md"));
        assert!(Registry::new(&store).load("stray1").unwrap().is_some());
    }

    #[test]
    fn test_cleanup_cycle_is_orphaned_not_fatal() {
        let (_dir, store) = setup();
        let mut tx = store.begin();
        tx.write(
            manifest::MANIFEST_PATH,
            format!("- [x] **tech**: {ROOT_URL}\n").as_bytes(),
        )
        .unwrap();
        save_record(&store, &root_record());
        save_record(
            &store,
            &ObjectRecord {
                id: "cyca".to_string(),
                parent_id: "cycb".to_string(),
                ..Default::default()
            },
        );
        save_record(
            &store,
            &ObjectRecord {
                id: "cycb".to_string(),
                parent_id: "cyca".to_string(),
                ..Default::default()
            },
        );

        let report = cleanup(&store, &mut tx, false).unwrap();
        assert_eq!(report.kept, 1);
        assert_eq!(report.orphans.len(), 2);
    }

    #[test]
    fn test_removed_manifest_row_orphans_descendants() {
        let (_dir, store) = setup();
        let mut tx = store.begin();
        // Root record exists but its row is gone from the manifest
        tx.write(manifest::MANIFEST_PATH, b"# Root Pages\n").unwrap();
        save_record(&store, &root_record());
        save_record(
            &store,
            &ObjectRecord {
                id: "child1".to_string(),
                parent_id: ROOT_ID.to_string(),
                ..Default::default()
            },
        );

        let report = cleanup(&store, &mut tx, false).unwrap();
        assert_eq!(report.kept, 0);
        assert_eq!(report.orphans.len(), 2);
    }

    #[test]
    fn test_reindex_recovers_from_frontmatter() {
        let (_dir, store) = setup();
        let mut tx = store.begin();
        tx.write(
            manifest::MANIFEST_PATH,
            format!("- [x] **tech**: {ROOT_URL}\n").as_bytes(),
        )
        .unwrap();
        let content = format!(
            "---\nntn: v1\nid: {ROOT_ID}\nkind: page\nfolder: tech\nfile: tech/wiki.md\ntitle: Wiki\nlast_synced: 2024-01-01T00:00:00Z\nis_root: true\n---\n\n# Wiki\n"
        );
        tx.write("tech/wiki.md", content.as_bytes()).unwrap();

        let report = reindex(&store, &mut tx, false).unwrap();
        assert_eq!(report.recovered, vec![ROOT_ID.to_string()]);

        let record = Registry::new(&store).load(ROOT_ID).unwrap().unwrap();
        assert_eq!(record.file_path, "tech/wiki.md");
        assert!(record.is_root);
        assert_eq!(record.title, "Wiki");
    }

    #[test]
    fn test_reindex_dry_run_writes_nothing() {
        let (_dir, store) = setup();
        let mut tx = store.begin();
        tx.write(
            manifest::MANIFEST_PATH,
            format!("- [x] **tech**: {ROOT_URL}\n").as_bytes(),
        )
        .unwrap();
        let content = format!("---\nntn: v1\nid: {ROOT_ID}\nkind: page\n---\n\n# W\n");
        tx.write("tech/wiki.md", content.as_bytes()).unwrap();

        let report = reindex(&store, &mut tx, true).unwrap();
        assert_eq!(report.recovered.len(), 1);
        assert!(Registry::new(&store).load(ROOT_ID).unwrap().is_none());
    }
}
