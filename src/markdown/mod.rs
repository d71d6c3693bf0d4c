// src/markdown/mod.rs

//! Conversion of fetched Notion objects into Markdown files
//!
//! The crawler hands over the fetched data plus a [`ConvertOptions`] value
//! and a file-processor callback; the converter returns the complete file
//! bytes (frontmatter + body). Asset URLs run through the callback so the
//! emitted links point at local downloads.

mod blocks;
pub mod frontmatter;

pub use blocks::{render_blocks, render_rich_text};
pub use frontmatter::format_go_duration;

use crate::id;
use crate::notion::{Block, Database, Page};
use crate::registry::ObjectKind;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

/// Everything the converter needs besides the fetched data itself.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Normalized object id
    pub id: String,
    pub kind: ObjectKind,
    pub folder: String,
    pub title: String,
    pub file_path: String,
    pub now: DateTime<Utc>,
    pub last_edited: Option<DateTime<Utc>>,
    pub is_root: bool,
    pub parent_id: Option<String>,
    /// Set when block recursion was truncated by the configured cap
    pub simplified_depth: Option<u32>,
    pub fetch_duration: Option<Duration>,
    /// Preformatted `Name <email> [short-id]`
    pub created_by: Option<String>,
    pub last_edited_by: Option<String>,
    /// Flattened property values for database rows
    pub properties: Option<BTreeMap<String, String>>,
}

/// Convert a page and its block tree into file bytes.
pub fn convert_page(
    page: &Page,
    blocks: &[Block],
    options: &ConvertOptions,
    rewrite_url: &mut dyn FnMut(&str) -> String,
) -> Vec<u8> {
    let mut out = frontmatter::render(options, page.url.as_deref());
    let _ = writeln!(out, "# {}\n", options.title);
    out.push_str(&render_blocks(blocks, rewrite_url));
    normalize_trailing(&mut out);
    out.into_bytes()
}

/// Convert a database and its rows into file bytes. Rows are listed as
/// links; each row is also synced as a child page in its own file.
pub fn convert_database(
    database: &Database,
    rows: &[Page],
    options: &ConvertOptions,
    _rewrite_url: &mut dyn FnMut(&str) -> String,
) -> Vec<u8> {
    let mut out = frontmatter::render(options, database.url.as_deref());
    let _ = writeln!(out, "# {}\n", options.title);

    let description = database.description_text();
    if !description.is_empty() {
        let _ = writeln!(out, "{description}\n");
    }

    for row in rows {
        let title = row.title();
        let title = if title.is_empty() { "untitled" } else { &title };
        let norm = id::normalize(&row.id);
        let _ = writeln!(out, "- [{title}](https://www.notion.so/{norm})");
    }
    if !rows.is_empty() {
        out.push('\n');
    }
    normalize_trailing(&mut out);
    out.into_bytes()
}

/// Flatten a database row's property map into displayable strings for the
/// frontmatter `properties` sub-map. Title properties are skipped (the
/// title is already a first-class field).
pub fn flatten_properties(page: &Page) -> BTreeMap<String, String> {
    let mut flat = BTreeMap::new();
    for (name, prop) in &page.properties {
        let Some(prop_type) = prop.get("type").and_then(serde_json::Value::as_str) else {
            continue;
        };
        let value = match prop_type {
            "title" => continue,
            "rich_text" => prop
                .get("rich_text")
                .and_then(serde_json::Value::as_array)
                .map(join_plain)
                .unwrap_or_default(),
            "number" => prop
                .get("number")
                .map(|v| v.to_string())
                .unwrap_or_default(),
            "select" => prop
                .pointer("/select/name")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            "multi_select" => prop
                .get("multi_select")
                .and_then(serde_json::Value::as_array)
                .map(|opts| {
                    opts.iter()
                        .filter_map(|o| o.get("name").and_then(serde_json::Value::as_str))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default(),
            "status" => prop
                .pointer("/status/name")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            "checkbox" => prop
                .get("checkbox")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false)
                .to_string(),
            "date" => prop
                .pointer("/date/start")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            "url" => prop
                .get("url")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            "email" => prop
                .get("email")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => continue,
        };
        if !value.is_empty() && value != "null" {
            flat.insert(name.clone(), value);
        }
    }
    flat
}

fn join_plain(parts: &Vec<serde_json::Value>) -> String {
    parts
        .iter()
        .filter_map(|p| p.get("plain_text").and_then(serde_json::Value::as_str))
        .collect::<Vec<_>>()
        .join("")
}

/// Exactly one trailing newline.
fn normalize_trailing(out: &mut String) {
    while out.ends_with("\n\n") {
        out.pop();
    }
    if !out.ends_with('\n') {
        out.push('\n');
    }
}
