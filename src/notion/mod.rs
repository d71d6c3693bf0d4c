// src/notion/mod.rs

//! Typed model of the Notion API surface the engine consumes
//!
//! The [`NotionApi`] trait is the seam between the sync engine and the
//! remote workspace: the crawler, fetcher, and commands only ever see this
//! trait. [`client::NotionClient`] is the production implementation;
//! integration tests drive the engine with an in-memory stub.
//!
//! Block payloads are kept as raw JSON (`serde_json::Value`) behind typed
//! accessors; Notion's block vocabulary is wide and only the parts the
//! converter renders need structure.

pub mod client;

pub use client::NotionClient;

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operations the sync engine needs from the remote workspace.
///
/// Implementations own rate-limit backoff and HTTP retry; what surfaces
/// here is either success or a typed error the processor can classify.
pub trait NotionApi: Send + Sync {
    fn get_page(&self, id: &str) -> Result<Page>;
    fn get_database(&self, id: &str) -> Result<Database>;
    /// All rows of a database; pagination is exhausted internally.
    fn query_database(&self, id: &str) -> Result<Vec<Page>>;
    fn get_block(&self, id: &str) -> Result<Block>;
    fn get_block_children(&self, id: &str, cursor: Option<&str>) -> Result<BlockChildren>;
    fn get_user(&self, id: &str) -> Result<User>;
    /// Paginated search over all pages, newest-edited first, stopping as
    /// soon as `should_stop` returns true for a result (that result is not
    /// included).
    fn search_all_pages_with_stop(
        &self,
        should_stop: &mut dyn FnMut(&Page) -> bool,
    ) -> Result<Vec<Page>>;
}

/// Reference to a user as it appears inline on pages and blocks.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PartialUser {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Parent {
    PageId { page_id: String },
    DatabaseId { database_id: String },
    BlockId { block_id: String },
    Workspace {
        #[serde(default)]
        workspace: bool,
    },
}

impl Parent {
    /// The referenced object id; None for the workspace root.
    pub fn id(&self) -> Option<&str> {
        match self {
            Parent::PageId { page_id } => Some(page_id),
            Parent::DatabaseId { database_id } => Some(database_id),
            Parent::BlockId { block_id } => Some(block_id),
            Parent::Workspace { .. } => None,
        }
    }

    pub fn is_workspace(&self) -> bool {
        matches!(self, Parent::Workspace { .. })
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Parent::BlockId { .. })
    }

    pub fn is_database(&self) -> bool {
        matches!(self, Parent::DatabaseId { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Page {
    pub id: String,
    pub created_time: Option<DateTime<Utc>>,
    pub last_edited_time: Option<DateTime<Utc>>,
    pub created_by: Option<PartialUser>,
    pub last_edited_by: Option<PartialUser>,
    pub parent: Option<Parent>,
    pub archived: bool,
    pub properties: serde_json::Map<String, Value>,
    pub url: Option<String>,
}

impl Page {
    /// Plain-text title, joined from the `title`-type property.
    pub fn title(&self) -> String {
        for prop in self.properties.values() {
            if prop.get("type").and_then(Value::as_str) == Some("title")
                && let Some(parts) = prop.get("title").and_then(Value::as_array)
            {
                return join_plain_text(parts);
            }
        }
        String::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Database {
    pub id: String,
    pub created_time: Option<DateTime<Utc>>,
    pub last_edited_time: Option<DateTime<Utc>>,
    pub created_by: Option<PartialUser>,
    pub last_edited_by: Option<PartialUser>,
    pub parent: Option<Parent>,
    pub archived: bool,
    pub title: Vec<Value>,
    pub description: Vec<Value>,
    pub url: Option<String>,
}

impl Database {
    pub fn title_text(&self) -> String {
        join_plain_text(&self.title)
    }

    pub fn description_text(&self) -> String {
        join_plain_text(&self.description)
    }
}

/// A content block. The per-type payload stays raw JSON under its type key
/// (flattened); `children` is populated by the fetcher, not the wire.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: String,
    pub has_children: bool,
    pub parent: Option<Parent>,
    pub last_edited_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub data: serde_json::Map<String, Value>,
    #[serde(skip)]
    pub children: Vec<Block>,
}

impl Block {
    /// The payload object stored under the block's own type key.
    pub fn payload(&self) -> Option<&Value> {
        self.data.get(&self.block_type)
    }

    /// Rich-text runs of the payload, empty for block types without text.
    pub fn rich_text(&self) -> Vec<RichText> {
        self.payload()
            .and_then(|p| p.get("rich_text"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Title of a `child_page` block.
    pub fn child_page_title(&self) -> Option<String> {
        if self.block_type != "child_page" {
            return None;
        }
        self.payload()
            .and_then(|p| p.get("title"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Annotations {
    pub bold: bool,
    pub italic: bool,
    pub strikethrough: bool,
    pub underline: bool,
    pub code: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RichText {
    pub plain_text: String,
    pub href: Option<String>,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PersonInfo {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct User {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub person: Option<PersonInfo>,
}

impl User {
    pub fn email(&self) -> Option<&str> {
        self.person.as_ref().and_then(|p| p.email.as_deref())
    }
}

/// One page of block children plus the pagination cursor.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BlockChildren {
    pub results: Vec<Block>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

fn join_plain_text(parts: &[Value]) -> String {
    parts
        .iter()
        .filter_map(|p| p.get("plain_text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
}
