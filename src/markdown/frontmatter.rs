// src/markdown/frontmatter.rs

//! Frontmatter emission and parsing
//!
//! Field order is fixed so diffs stay minimal across syncs. Optional fields
//! are omitted entirely rather than written empty.

use crate::markdown::ConvertOptions;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

/// Format version marker written as the first frontmatter field
pub const FORMAT_VERSION: &str = "v1";

pub fn render(options: &ConvertOptions, url: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str("---\n");
    let _ = writeln!(out, "ntn: {FORMAT_VERSION}");
    let _ = writeln!(out, "id: {}", options.id);
    let _ = writeln!(out, "kind: {}", options.kind.as_str());
    let _ = writeln!(out, "folder: {}", options.folder);
    let _ = writeln!(out, "file: {}", options.file_path);
    let _ = writeln!(out, "title: {}", quote(&options.title));
    if let Some(last_edited) = options.last_edited {
        let _ = writeln!(out, "last_edited: {}", last_edited.to_rfc3339());
    }
    let _ = writeln!(out, "last_synced: {}", options.now.to_rfc3339());
    if let Some(parent_id) = &options.parent_id {
        let _ = writeln!(out, "notion_parent_id: {parent_id}");
    }
    let _ = writeln!(out, "is_root: {}", options.is_root);
    if let Some(url) = url {
        let _ = writeln!(out, "url: {url}");
    }
    if let Some(depth) = options.simplified_depth {
        let _ = writeln!(out, "simplified_depth: {depth}");
    }
    if let Some(duration) = options.fetch_duration {
        let _ = writeln!(out, "download_duration: {}", format_go_duration(duration));
    }
    if let Some(created_by) = &options.created_by {
        let _ = writeln!(out, "created_by: {created_by}");
    }
    if let Some(last_edited_by) = &options.last_edited_by {
        let _ = writeln!(out, "last_edited_by: {last_edited_by}");
    }
    if let Some(properties) = &options.properties
        && !properties.is_empty()
    {
        out.push_str("properties:\n");
        for (key, value) in properties {
            let _ = writeln!(out, "  {}: {}", quote(key), quote(value));
        }
    }
    out.push_str("---\n\n");
    out
}

/// Minimal frontmatter read-back used by `reindex`: returns the key/value
/// pairs of the leading `---` block, or None when the file has none.
pub fn parse(content: &str) -> Option<BTreeMap<String, String>> {
    let rest = content.strip_prefix("---\n")?;
    let end = rest.find("\n---")?;
    let mut fields = BTreeMap::new();
    for line in rest[..end].lines() {
        if line.starts_with(' ') {
            // Nested maps (properties) are not needed by reindex
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.trim().to_string(), unquote(value.trim()));
        }
    }
    Some(fields)
}

/// Quote a YAML scalar when it needs it.
fn quote(value: &str) -> String {
    let needs_quoting = value.is_empty()
        || value
            .chars()
            .any(|c| matches!(c, ':' | '#' | '"' | '\'' | '[' | ']' | '{' | '}' | '\n'))
        || value.starts_with(' ')
        || value.ends_with(' ');
    if needs_quoting {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1]
            .replace("\\\"", "\"")
            .replace("\\\\", "\\")
    } else {
        value.to_string()
    }
}

/// Go-style duration string: `250ms`, `1.234s`, `12s`.
pub fn format_go_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        let secs = format!("{:.3}", d.as_secs_f64());
        let secs = secs.trim_end_matches('0').trim_end_matches('.');
        format!("{secs}s")
    }
}
