// src/markdown/blocks.rs

//! Block-tree to Markdown rendering
//!
//! Handles the block vocabulary the engine commits to; anything else
//! degrades to an HTML comment placeholder instead of failing the page.
//! Asset URLs pass through the file-processor callback so embedded images
//! point at their downloaded local copies.

use crate::notion::{Block, RichText};
use serde_json::Value;
use std::fmt::Write as _;

/// Render a block tree. `rewrite_url` is the file-processor callback from
/// the conversion options.
pub fn render_blocks(
    blocks: &[Block],
    rewrite_url: &mut dyn FnMut(&str) -> String,
) -> String {
    let mut out = String::new();
    render_level(blocks, 0, &mut out, rewrite_url);
    out
}

fn render_level(
    blocks: &[Block],
    depth: usize,
    out: &mut String,
    rewrite_url: &mut dyn FnMut(&str) -> String,
) {
    let indent = "  ".repeat(depth);
    let mut numbered = 0usize;

    for block in blocks {
        if block.block_type == "numbered_list_item" {
            numbered += 1;
        } else {
            numbered = 0;
        }
        render_block(block, depth, &indent, numbered, out, rewrite_url);
    }
}

fn render_block(
    block: &Block,
    depth: usize,
    indent: &str,
    numbered: usize,
    out: &mut String,
    rewrite_url: &mut dyn FnMut(&str) -> String,
) {
    let text = render_rich_text(&block.rich_text());
    match block.block_type.as_str() {
        "paragraph" => {
            if !text.is_empty() {
                let _ = writeln!(out, "{indent}{text}");
            }
            out.push('\n');
            render_level(&block.children, depth, out, rewrite_url);
        }
        "heading_1" => heading(out, indent, "#", &text),
        "heading_2" => heading(out, indent, "##", &text),
        "heading_3" => heading(out, indent, "###", &text),
        "bulleted_list_item" => {
            let _ = writeln!(out, "{indent}- {text}");
            render_level(&block.children, depth + 1, out, rewrite_url);
        }
        "numbered_list_item" => {
            let _ = writeln!(out, "{indent}{numbered}. {text}");
            render_level(&block.children, depth + 1, out, rewrite_url);
        }
        "to_do" => {
            let checked = block
                .payload()
                .and_then(|p| p.get("checked"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let mark = if checked { "x" } else { " " };
            let _ = writeln!(out, "{indent}- [{mark}] {text}");
            render_level(&block.children, depth + 1, out, rewrite_url);
        }
        "toggle" => {
            let _ = writeln!(out, "{indent}- {text}");
            render_level(&block.children, depth + 1, out, rewrite_url);
        }
        "quote" => {
            let _ = writeln!(out, "{indent}> {text}");
            out.push('\n');
            render_level(&block.children, depth, out, rewrite_url);
        }
        "callout" => {
            let icon = block
                .payload()
                .and_then(|p| p.get("icon"))
                .and_then(|i| i.get("emoji"))
                .and_then(Value::as_str)
                .unwrap_or("💡");
            let _ = writeln!(out, "{indent}> {icon} {text}");
            out.push('\n');
        }
        "code" => {
            let language = block
                .payload()
                .and_then(|p| p.get("language"))
                .and_then(Value::as_str)
                .unwrap_or("");
            let raw: String = block
                .rich_text()
                .iter()
                .map(|t| t.plain_text.as_str())
                .collect();
            let _ = writeln!(out, "{indent}```{language}");
            for line in raw.lines() {
                let _ = writeln!(out, "{indent}{line}");
            }
            let _ = writeln!(out, "{indent}```");
            out.push('\n');
        }
        "divider" => {
            let _ = writeln!(out, "{indent}---");
            out.push('\n');
        }
        "image" => {
            if let Some(url) = media_url(block) {
                let caption = block
                    .payload()
                    .and_then(|p| p.get("caption"))
                    .and_then(Value::as_array)
                    .map(|parts| {
                        parts
                            .iter()
                            .filter_map(|v| v.get("plain_text").and_then(Value::as_str))
                            .collect::<Vec<_>>()
                            .join("")
                    })
                    .unwrap_or_default();
                let local = rewrite_url(&url);
                let _ = writeln!(out, "{indent}![{caption}]({local})");
                out.push('\n');
            }
        }
        "file" | "pdf" | "video" => {
            if let Some(url) = media_url(block) {
                let local = rewrite_url(&url);
                let _ = writeln!(out, "{indent}[{}]({local})", block.block_type);
                out.push('\n');
            }
        }
        "bookmark" => {
            if let Some(url) = block
                .payload()
                .and_then(|p| p.get("url"))
                .and_then(Value::as_str)
            {
                let _ = writeln!(out, "{indent}<{url}>");
                out.push('\n');
            }
        }
        "equation" => {
            if let Some(expr) = block
                .payload()
                .and_then(|p| p.get("expression"))
                .and_then(Value::as_str)
            {
                let _ = writeln!(out, "{indent}$$\n{indent}{expr}\n{indent}$$");
                out.push('\n');
            }
        }
        "child_page" => {
            let title = block.child_page_title().unwrap_or_default();
            let norm = crate::id::normalize(&block.id);
            let _ = writeln!(out, "{indent}[{title}](https://www.notion.so/{norm})");
            out.push('\n');
        }
        "child_database" => {
            let title = block
                .payload()
                .and_then(|p| p.get("title"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let norm = crate::id::normalize(&block.id);
            let _ = writeln!(out, "{indent}[{title}](https://www.notion.so/{norm})");
            out.push('\n');
        }
        "table" => {
            render_table(block, indent, out);
        }
        other => {
            let _ = writeln!(out, "{indent}<!-- unsupported block: {other} -->");
            out.push('\n');
        }
    }
}

fn heading(out: &mut String, indent: &str, marker: &str, text: &str) {
    let _ = writeln!(out, "{indent}{marker} {text}");
    out.push('\n');
}

fn render_table(block: &Block, indent: &str, out: &mut String) {
    let has_header = block
        .payload()
        .and_then(|p| p.get("has_column_header"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let rows: Vec<Vec<String>> = block
        .children
        .iter()
        .filter(|c| c.block_type == "table_row")
        .map(|row| {
            row.payload()
                .and_then(|p| p.get("cells"))
                .and_then(Value::as_array)
                .map(|cells| {
                    cells
                        .iter()
                        .map(|cell| {
                            cell.as_array()
                                .map(|parts| {
                                    parts
                                        .iter()
                                        .filter_map(|v| {
                                            v.get("plain_text").and_then(Value::as_str)
                                        })
                                        .collect::<Vec<_>>()
                                        .join("")
                                })
                                .unwrap_or_default()
                        })
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect();

    if rows.is_empty() {
        return;
    }

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut iter = rows.into_iter();

    let header: Vec<String> = if has_header {
        iter.next().unwrap_or_default()
    } else {
        vec![String::new(); width]
    };
    let _ = writeln!(out, "{indent}| {} |", pad_row(&header, width).join(" | "));
    let _ = writeln!(
        out,
        "{indent}|{}",
        " --- |".repeat(width)
    );
    for row in iter {
        let _ = writeln!(out, "{indent}| {} |", pad_row(&row, width).join(" | "));
    }
    out.push('\n');
}

fn pad_row(row: &[String], width: usize) -> Vec<String> {
    let mut cells: Vec<String> = row.to_vec();
    cells.resize(width, String::new());
    cells
}

fn media_url(block: &Block) -> Option<String> {
    let payload = block.payload()?;
    let source = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("external");
    payload
        .get(source)
        .and_then(|s| s.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Apply rich-text annotations and links.
pub fn render_rich_text(parts: &[RichText]) -> String {
    let mut out = String::new();
    for part in parts {
        let mut text = part.plain_text.clone();
        if part.annotations.code {
            text = format!("`{text}`");
        }
        if part.annotations.bold {
            text = format!("**{text}**");
        }
        if part.annotations.italic {
            text = format!("*{text}*");
        }
        if part.annotations.strikethrough {
            text = format!("~~{text}~~");
        }
        if part.annotations.underline {
            // Markdown has no underline; degrade to inline HTML
            text = format!("<u>{text}</u>");
        }
        if let Some(href) = &part.href {
            text = format!("[{text}]({href})");
        }
        out.push_str(&text);
    }
    out
}
