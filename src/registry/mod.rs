// src/registry/mod.rs

//! Durable per-object metadata under `.notion-sync/ids/`
//!
//! One pretty-printed JSON file per page/database (`page-<id>.json`,
//! `database-<id>.json`), one per downloaded binary (`file-<id>.json`), and
//! a cached user directory (`user-<id>.json`). A legacy naming scheme
//! without the kind prefix is tolerated on read; saves always write the
//! prefixed name. Loaders zero-initialize missing fields so the schema is
//! append-compatible.

mod state;

pub use state::SyncState;

use crate::config::STATE_DIR;
use crate::error::Result;
use crate::id;
use crate::store::{Store, Transaction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    #[default]
    Page,
    Database,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Page => "page",
            ObjectKind::Database => "database",
        }
    }
}

/// Durable record for a page or database.
///
/// `file_path`, once non-empty, is never changed for the lifetime of the
/// record; the path allocator enforces this.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ObjectRecord {
    pub id: String,
    pub kind: ObjectKind,
    pub folder: String,
    pub file_path: String,
    pub title: String,
    pub last_edited: Option<DateTime<Utc>>,
    pub last_synced: Option<DateTime<Utc>>,
    pub is_root: bool,
    pub enabled: bool,
    pub parent_id: String,
    pub children: Vec<String>,
    pub content_hash: String,
}

/// Record for a downloaded binary, keyed by Notion's content id.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileAssetRecord {
    pub id: String,
    pub file_path: String,
    pub source_url: String,
    pub last_synced: Option<DateTime<Utc>>,
}

/// Cached directory entry for a Notion user.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub email: Option<String>,
}

pub struct Registry<'a> {
    store: &'a Store,
}

impl<'a> Registry<'a> {
    pub fn new(store: &'a Store) -> Self {
        Registry { store }
    }

    /// Load a page/database record by id, trying both kind prefixes and the
    /// legacy unprefixed name.
    pub fn load(&self, raw_id: &str) -> Result<Option<ObjectRecord>> {
        let norm = id::normalize(raw_id);
        for name in [
            format!("page-{norm}.json"),
            format!("database-{norm}.json"),
            format!("{norm}.json"),
        ] {
            let rel = format!("{STATE_DIR}/ids/{name}");
            if self.store.exists(&rel) {
                let bytes = self.store.read(&rel)?;
                let mut record: ObjectRecord = serde_json::from_slice(&bytes)?;
                if record.id.is_empty() {
                    record.id = norm.clone();
                }
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    pub fn save(&self, tx: &mut Transaction<'_>, record: &ObjectRecord) -> Result<()> {
        let rel = object_rel(record.kind, &record.id);
        let bytes = serde_json::to_vec_pretty(record)?;
        tx.write(&rel, &bytes)
    }

    /// Remove a record and its Markdown file's registry entry, covering the
    /// legacy unprefixed name as well.
    pub fn delete(&self, tx: &mut Transaction<'_>, record: &ObjectRecord) -> Result<()> {
        let norm = id::normalize(&record.id);
        tx.delete(&object_rel(record.kind, &norm))?;
        tx.delete(&format!("{STATE_DIR}/ids/{norm}.json"))
    }

    /// All page and database records, sorted by id.
    pub fn list(&self) -> Result<Vec<ObjectRecord>> {
        let mut records = Vec::new();
        for name in self.store.list(&format!("{STATE_DIR}/ids"))? {
            if !name.ends_with(".json")
                || name.starts_with("file-")
                || name.starts_with("user-")
            {
                continue;
            }
            let rel = format!("{STATE_DIR}/ids/{name}");
            let bytes = self.store.read(&rel)?;
            let mut record: ObjectRecord = serde_json::from_slice(&bytes)?;
            if record.id.is_empty() {
                // Legacy records may predate the id field; recover it from
                // the filename
                record.id = name
                    .trim_end_matches(".json")
                    .trim_start_matches("page-")
                    .trim_start_matches("database-")
                    .to_string();
            }
            records.push(record);
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    pub fn load_asset(&self, raw_id: &str) -> Result<Option<FileAssetRecord>> {
        let norm = id::normalize(raw_id);
        let rel = format!("{STATE_DIR}/ids/file-{norm}.json");
        if !self.store.exists(&rel) {
            return Ok(None);
        }
        let bytes = self.store.read(&rel)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub fn save_asset(&self, tx: &mut Transaction<'_>, record: &FileAssetRecord) -> Result<()> {
        let rel = format!("{STATE_DIR}/ids/file-{}.json", id::normalize(&record.id));
        let bytes = serde_json::to_vec_pretty(record)?;
        tx.write(&rel, &bytes)
    }

    pub fn load_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let rel = format!("{STATE_DIR}/ids/user-{}.json", id::normalize(user_id));
        if !self.store.exists(&rel) {
            return Ok(None);
        }
        let bytes = self.store.read(&rel)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub fn save_user(&self, tx: &mut Transaction<'_>, record: &UserRecord) -> Result<()> {
        let rel = format!("{STATE_DIR}/ids/user-{}.json", id::normalize(&record.id));
        let bytes = serde_json::to_vec_pretty(record)?;
        tx.write(&rel, &bytes)
    }

    /// Walk `parent_id` links upward to the first `is_root` record, using
    /// only the registry. Returns `None` when the chain dead-ends
    /// (orphaned); a revisited id aborts the trace with a cycle error.
    pub fn trace_root(&self, raw_id: &str) -> Result<Option<ObjectRecord>> {
        let mut current = id::normalize(raw_id);
        let mut visited = std::collections::HashSet::new();
        loop {
            if !visited.insert(current.clone()) {
                return Err(crate::error::Error::Cycle(current));
            }
            let Some(record) = self.load(&current)? else {
                return Ok(None);
            };
            if record.is_root {
                return Ok(Some(record));
            }
            if record.parent_id.is_empty() {
                return Ok(None);
            }
            current = id::normalize(&record.parent_id);
        }
    }
}

fn object_rel(kind: ObjectKind, raw_id: &str) -> String {
    format!("{STATE_DIR}/ids/{}-{}.json", kind.as_str(), id::normalize(raw_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::GitConfig;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), GitConfig::default()).unwrap();
        (dir, store)
    }

    fn record(id: &str) -> ObjectRecord {
        ObjectRecord {
            id: id.to_string(),
            kind: ObjectKind::Page,
            folder: "tech".to_string(),
            file_path: "tech/page.md".to_string(),
            title: "Page".to_string(),
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let (_dir, store) = setup();
        let registry = Registry::new(&store);
        let mut tx = store.begin();
        registry.save(&mut tx, &record("abc123")).unwrap();

        let loaded = registry.load("abc123").unwrap().unwrap();
        assert_eq!(loaded.id, "abc123");
        assert_eq!(loaded.file_path, "tech/page.md");
        assert!(loaded.enabled);
    }

    #[test]
    fn test_load_normalizes_id() {
        let (_dir, store) = setup();
        let registry = Registry::new(&store);
        let mut tx = store.begin();
        registry
            .save(&mut tx, &record("668d797c76fa49349b05ad288df2d136"))
            .unwrap();
        let loaded = registry
            .load("668d797c-76fa-4934-9b05-ad288df2d136")
            .unwrap();
        assert!(loaded.is_some());
    }

    #[test]
    fn test_legacy_unprefixed_name_tolerated() {
        let (_dir, store) = setup();
        let registry = Registry::new(&store);
        let mut tx = store.begin();
        let json = serde_json::to_vec_pretty(&record("legacy1")).unwrap();
        tx.write(".notion-sync/ids/legacy1.json", &json).unwrap();

        let loaded = registry.load("legacy1").unwrap();
        assert!(loaded.is_some());
    }

    #[test]
    fn test_loader_zero_initializes_missing_fields() {
        let (_dir, store) = setup();
        let registry = Registry::new(&store);
        let mut tx = store.begin();
        tx.write(
            ".notion-sync/ids/page-partial1.json",
            br#"{"id": "partial1", "title": "Partial"}"#,
        )
        .unwrap();

        let loaded = registry.load("partial1").unwrap().unwrap();
        assert_eq!(loaded.title, "Partial");
        assert_eq!(loaded.file_path, "");
        assert!(loaded.children.is_empty());
        assert!(!loaded.enabled);
        assert!(loaded.last_edited.is_none());
    }

    #[test]
    fn test_list_skips_assets_and_users() {
        let (_dir, store) = setup();
        let registry = Registry::new(&store);
        let mut tx = store.begin();
        registry.save(&mut tx, &record("p1")).unwrap();
        registry
            .save_asset(
                &mut tx,
                &FileAssetRecord {
                    id: "f1".to_string(),
                    file_path: "tech/page/files/a.png".to_string(),
                    source_url: "https://example.com/a.png".to_string(),
                    last_synced: None,
                },
            )
            .unwrap();
        registry
            .save_user(
                &mut tx,
                &UserRecord {
                    id: "u1".to_string(),
                    name: "Alice".to_string(),
                    kind: "person".to_string(),
                    email: None,
                },
            )
            .unwrap();

        let all = registry.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "p1");
    }

    #[test]
    fn test_trace_root_finds_enabled_root() {
        let (_dir, store) = setup();
        let registry = Registry::new(&store);
        let mut tx = store.begin();
        let mut root = record("root1");
        root.is_root = true;
        registry.save(&mut tx, &root).unwrap();
        let mut child = record("child1");
        child.parent_id = "root1".to_string();
        registry.save(&mut tx, &child).unwrap();

        let found = registry.trace_root("child1").unwrap().unwrap();
        assert_eq!(found.id, "root1");
        assert!(found.enabled);
    }

    #[test]
    fn test_trace_root_orphan() {
        let (_dir, store) = setup();
        let registry = Registry::new(&store);
        let mut tx = store.begin();
        let mut child = record("child1");
        child.parent_id = "missing".to_string();
        registry.save(&mut tx, &child).unwrap();

        assert!(registry.trace_root("child1").unwrap().is_none());
    }

    #[test]
    fn test_trace_root_cycle_aborts() {
        let (_dir, store) = setup();
        let registry = Registry::new(&store);
        let mut tx = store.begin();
        let mut a = record("aaa1");
        a.parent_id = "bbb1".to_string();
        registry.save(&mut tx, &a).unwrap();
        let mut b = record("bbb1");
        b.parent_id = "aaa1".to_string();
        registry.save(&mut tx, &b).unwrap();

        match registry.trace_root("aaa1") {
            Err(crate::error::Error::Cycle(_)) => {}
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_user_cache_roundtrip() {
        let (_dir, store) = setup();
        let registry = Registry::new(&store);
        let mut tx = store.begin();
        registry
            .save_user(
                &mut tx,
                &UserRecord {
                    id: "u1".to_string(),
                    name: "Alice".to_string(),
                    kind: "person".to_string(),
                    email: Some("alice@example.com".to_string()),
                },
            )
            .unwrap();
        let user = registry.load_user("u1").unwrap().unwrap();
        assert_eq!(user.email.as_deref(), Some("alice@example.com"));
    }
}
