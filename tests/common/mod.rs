// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

// Each test binary uses a different subset of these helpers
#![allow(dead_code)]

use ntnsync::notion::{Block, BlockChildren, Database, NotionApi, Page, User};
use ntnsync::{Config, Error, GitConfig, Result, Store};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use tempfile::TempDir;

/// Create a working copy in a temp dir. Keep the TempDir alive to prevent
/// cleanup.
pub fn setup_store() -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path(), GitConfig::default()).unwrap();
    (dir, store)
}

/// Config suitable for driving the crawler in tests.
pub fn test_config(dir: &TempDir) -> Config {
    Config {
        dir: dir.path().to_path_buf(),
        ..Config::default()
    }
}

/// Build a page value the way the wire would deliver it.
pub fn make_page(id: &str, title: &str, parent: Value, last_edited: &str) -> Page {
    serde_json::from_value(json!({
        "id": id,
        "last_edited_time": last_edited,
        "parent": parent,
        "url": format!("https://www.notion.so/{}", ntnsync::id::normalize(id)),
        "properties": {
            "title": {"type": "title", "title": [{"plain_text": title}]}
        }
    }))
    .unwrap()
}

pub fn workspace_parent() -> Value {
    json!({"type": "workspace", "workspace": true})
}

pub fn page_parent(id: &str) -> Value {
    json!({"type": "page_id", "page_id": id})
}

pub fn paragraph(id: &str, text: &str) -> Block {
    serde_json::from_value(json!({
        "id": id,
        "type": "paragraph",
        "paragraph": {"rich_text": [{"plain_text": text}]}
    }))
    .unwrap()
}

pub fn child_page_block(id: &str, title: &str) -> Block {
    serde_json::from_value(json!({
        "id": id,
        "type": "child_page",
        "has_children": true,
        "last_edited_time": "2024-05-01T00:00:00Z",
        "child_page": {"title": title}
    }))
    .unwrap()
}

pub fn image_block(id: &str, url: &str) -> Block {
    serde_json::from_value(json!({
        "id": id,
        "type": "image",
        "image": {"type": "external", "external": {"url": url}, "caption": []}
    }))
    .unwrap()
}

#[derive(Default)]
struct StubInner {
    pages: HashMap<String, Page>,
    children: HashMap<String, Vec<Block>>,
    databases: HashMap<String, Database>,
    rows: HashMap<String, Vec<Page>>,
    /// id → (status, code): returned for any lookup of that id
    failures: HashMap<String, (u16, String)>,
}

/// In-memory stand-in for the remote workspace.
#[derive(Default)]
pub struct StubNotion {
    inner: Mutex<StubInner>,
}

impl StubNotion {
    pub fn new() -> Self {
        StubNotion::default()
    }

    pub fn add_page(&self, page: Page) {
        let key = ntnsync::id::normalize(&page.id);
        self.inner.lock().pages.insert(key, page);
    }

    pub fn add_children(&self, object_id: &str, blocks: Vec<Block>) {
        self.inner
            .lock()
            .children
            .insert(ntnsync::id::normalize(object_id), blocks);
    }

    pub fn add_database(&self, database: Database, rows: Vec<Page>) {
        let key = ntnsync::id::normalize(&database.id);
        let mut inner = self.inner.lock();
        inner.rows.insert(key.clone(), rows);
        inner.databases.insert(key, database);
    }

    pub fn fail_with(&self, id: &str, status: u16, code: &str) {
        self.inner
            .lock()
            .failures
            .insert(ntnsync::id::normalize(id), (status, code.to_string()));
    }

    fn check_failure(&self, id: &str) -> Result<()> {
        if let Some((status, code)) = self.inner.lock().failures.get(id) {
            return Err(Error::Api {
                status: *status,
                code: code.clone(),
                message: format!("stubbed failure for {id}"),
            });
        }
        Ok(())
    }
}

impl NotionApi for StubNotion {
    fn get_page(&self, id: &str) -> Result<Page> {
        let key = ntnsync::id::normalize(id);
        self.check_failure(&key)?;
        let inner = self.inner.lock();
        if inner.databases.contains_key(&key) {
            return Err(Error::DatabaseIsNotPage(key));
        }
        inner.pages.get(&key).cloned().ok_or(Error::Api {
            status: 404,
            code: "object_not_found".to_string(),
            message: format!("{key} is not shared or does not exist"),
        })
    }

    fn get_database(&self, id: &str) -> Result<Database> {
        let key = ntnsync::id::normalize(id);
        self.check_failure(&key)?;
        self.inner
            .lock()
            .databases
            .get(&key)
            .cloned()
            .ok_or(Error::Api {
                status: 404,
                code: "object_not_found".to_string(),
                message: format!("database {key} not found"),
            })
    }

    fn query_database(&self, id: &str) -> Result<Vec<Page>> {
        let key = ntnsync::id::normalize(id);
        Ok(self.inner.lock().rows.get(&key).cloned().unwrap_or_default())
    }

    fn get_block(&self, id: &str) -> Result<Block> {
        Err(Error::NotFound(id.to_string()))
    }

    fn get_block_children(&self, id: &str, _cursor: Option<&str>) -> Result<BlockChildren> {
        let key = ntnsync::id::normalize(id);
        Ok(BlockChildren {
            results: self.inner.lock().children.get(&key).cloned().unwrap_or_default(),
            has_more: false,
            next_cursor: None,
        })
    }

    fn get_user(&self, id: &str) -> Result<User> {
        Err(Error::NotFound(id.to_string()))
    }

    fn search_all_pages_with_stop(
        &self,
        should_stop: &mut dyn FnMut(&Page) -> bool,
    ) -> Result<Vec<Page>> {
        // Newest-edited first, like the real endpoint
        let mut pages: Vec<Page> = self.inner.lock().pages.values().cloned().collect();
        pages.sort_by(|a, b| b.last_edited_time.cmp(&a.last_edited_time));
        let mut out = Vec::new();
        for page in pages {
            if should_stop(&page) {
                break;
            }
            out.push(page);
        }
        Ok(out)
    }
}
