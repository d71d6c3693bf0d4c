// src/queue/mod.rs

//! Durable, totally-ordered, priority-biased work list
//!
//! Each entry is a JSON file under `.notion-sync/queue/`; the 8-digit
//! filename encodes priority. `00000001`–`00000999` is reserved for webhook
//! ingress and is allocated downward from `00000999`; `00001000`–∞ serves
//! pull, root reconciliation, and child discovery, allocated upward. The
//! processor always takes the lexicographically smallest name, so webhook
//! entries preempt at iteration boundaries.

use crate::config::STATE_DIR;
use crate::error::{Error, Result};
use crate::store::{Store, Transaction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// First name of the normal-priority range
const NORMAL_RANGE_START: u64 = 1000;
/// Last (highest) name of the webhook range; allocation decrements from here
const WEBHOOK_RANGE_TOP: u64 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Sync only objects not already present in the registry
    #[default]
    Init,
    /// Re-sync when the queued remote-edit time is strictly newer
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Webhook ingress; preempts normal work at iteration boundaries
    Webhook,
    Normal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedPage {
    pub id: String,
    pub last_edited: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub folder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Legacy format: plain id list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_ids: Option<Vec<String>>,
    /// New format: (id, remote-edit time) pairs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<QueuedPage>>,
    pub created_at: DateTime<Utc>,
}

impl Default for QueueEntry {
    fn default() -> Self {
        QueueEntry {
            kind: EntryKind::Init,
            folder: String::new(),
            parent_id: None,
            page_ids: None,
            pages: None,
            created_at: Utc::now(),
        }
    }
}

impl QueueEntry {
    /// New-format entry.
    pub fn with_pages(kind: EntryKind, folder: &str, pages: Vec<QueuedPage>) -> Self {
        QueueEntry {
            kind,
            folder: folder.to_string(),
            pages: Some(pages),
            ..Default::default()
        }
    }

    /// True when the entry holds no ids in either format.
    pub fn is_empty(&self) -> bool {
        self.pages.as_ref().map(|p| p.is_empty()).unwrap_or(true)
            && self.page_ids.as_ref().map(|p| p.is_empty()).unwrap_or(true)
    }
}

pub struct Queue<'a> {
    store: &'a Store,
}

impl<'a> Queue<'a> {
    pub fn new(store: &'a Store) -> Self {
        Queue { store }
    }

    /// Write `entry` atomically at the next free name in the range for
    /// `priority`. Returns the allocated name (without extension).
    pub fn create(
        &self,
        tx: &mut Transaction<'_>,
        entry: &QueueEntry,
        priority: Priority,
    ) -> Result<String> {
        let name = self.next_name(priority)?;
        let bytes = serde_json::to_vec_pretty(entry)?;
        tx.write(&entry_rel(&name), &bytes)?;
        Ok(name)
    }

    /// Entry names in lexicographic (processing) order.
    pub fn list(&self) -> Result<Vec<String>> {
        let names = self
            .store
            .list(&format!("{STATE_DIR}/queue"))?
            .into_iter()
            .filter_map(|n| n.strip_suffix(".json").map(str::to_string))
            .collect();
        Ok(names)
    }

    pub fn read(&self, name: &str) -> Result<QueueEntry> {
        let bytes = self.store.read(&entry_rel(name))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Queue(format!("entry {name}: {e}")))
    }

    /// Rewrite an entry in place after partial consumption.
    pub fn update(&self, tx: &mut Transaction<'_>, name: &str, entry: &QueueEntry) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(entry)?;
        tx.write(&entry_rel(name), &bytes)
    }

    /// Consume an entry.
    pub fn delete(&self, tx: &mut Transaction<'_>, name: &str) -> Result<()> {
        tx.delete(&entry_rel(name))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.list()?.is_empty())
    }

    fn next_name(&self, priority: Priority) -> Result<String> {
        let numbers: Vec<u64> = self
            .list()?
            .iter()
            .filter_map(|n| n.parse::<u64>().ok())
            .collect();

        let next = match priority {
            Priority::Normal => numbers
                .iter()
                .filter(|n| **n >= NORMAL_RANGE_START)
                .max()
                .map(|n| n + 1)
                .unwrap_or(NORMAL_RANGE_START),
            Priority::Webhook => {
                let lowest = numbers
                    .iter()
                    .filter(|n| **n <= WEBHOOK_RANGE_TOP)
                    .min()
                    .copied();
                match lowest {
                    Some(1) => {
                        return Err(Error::Queue(
                            "webhook priority range exhausted".to_string(),
                        ));
                    }
                    Some(n) => n - 1,
                    None => WEBHOOK_RANGE_TOP,
                }
            }
        };
        Ok(format!("{next:08}"))
    }
}

fn entry_rel(name: &str) -> String {
    format!("{STATE_DIR}/queue/{name}.json")
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

    fn entry(folder: &str) -> QueueEntry {
        QueueEntry::with_pages(
            EntryKind::Init,
            folder,
            vec![QueuedPage {
                id: "abc".to_string(),
                last_edited: None,
            }],
        )
    }

    #[test]
    fn test_normal_names_ascend_from_1000() {
        let (_dir, store) = setup();
        let queue = Queue::new(&store);
        let mut tx = store.begin();
        assert_eq!(
            queue.create(&mut tx, &entry("a"), Priority::Normal).unwrap(),
            "00001000"
        );
        assert_eq!(
            queue.create(&mut tx, &entry("b"), Priority::Normal).unwrap(),
            "00001001"
        );
    }

    #[test]
    fn test_webhook_names_descend_from_999() {
        let (_dir, store) = setup();
        let queue = Queue::new(&store);
        let mut tx = store.begin();
        assert_eq!(
            queue
                .create(&mut tx, &entry("a"), Priority::Webhook)
                .unwrap(),
            "00000999"
        );
        assert_eq!(
            queue
                .create(&mut tx, &entry("b"), Priority::Webhook)
                .unwrap(),
            "00000998"
        );
    }

    #[test]
    fn test_webhook_sorts_before_normal() {
        let (_dir, store) = setup();
        let queue = Queue::new(&store);
        let mut tx = store.begin();
        queue.create(&mut tx, &entry("n"), Priority::Normal).unwrap();
        queue
            .create(&mut tx, &entry("w"), Priority::Webhook)
            .unwrap();

        let names = queue.list().unwrap();
        assert_eq!(names, vec!["00000999", "00001000"]);
        assert_eq!(queue.read(&names[0]).unwrap().folder, "w");
    }

    #[test]
    fn test_normal_range_resumes_when_empty() {
        let (_dir, store) = setup();
        let queue = Queue::new(&store);
        let mut tx = store.begin();
        let name = queue.create(&mut tx, &entry("a"), Priority::Normal).unwrap();
        queue.delete(&mut tx, &name).unwrap();
        assert_eq!(
            queue.create(&mut tx, &entry("b"), Priority::Normal).unwrap(),
            "00001000"
        );
    }

    #[test]
    fn test_update_in_place() {
        let (_dir, store) = setup();
        let queue = Queue::new(&store);
        let mut tx = store.begin();
        let name = queue.create(&mut tx, &entry("a"), Priority::Normal).unwrap();

        let mut remaining = queue.read(&name).unwrap();
        remaining.pages = Some(vec![]);
        queue.update(&mut tx, &name, &remaining).unwrap();

        assert!(queue.read(&name).unwrap().is_empty());
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn test_legacy_entry_parses() {
        let (_dir, store) = setup();
        let queue = Queue::new(&store);
        let mut tx = store.begin();
        tx.write(
            ".notion-sync/queue/00001000.json",
            br#"{"type": "update", "folder": "tech", "page_ids": ["a", "b"], "created_at": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let entry = queue.read("00001000").unwrap();
        assert_eq!(entry.kind, EntryKind::Update);
        assert_eq!(entry.page_ids.as_ref().unwrap().len(), 2);
        assert!(entry.pages.is_none());
    }
}
