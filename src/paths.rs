// src/paths.rs

//! Stable filesystem path allocation
//!
//! The path assigned to a remote object on first sync never changes: if the
//! registry already holds a non-empty file_path for the id, that path is
//! returned unchanged no matter how the object was renamed or re-parented
//! upstream. Everything else here only applies to first placement.

use crate::error::Result;
use crate::id;
use crate::registry::Registry;
use std::path::Path;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Maximum length of a sanitized base name
const MAX_BASE_LEN: usize = 100;

/// Sanitize a page title into a filename base.
///
/// Lowercases, transliterates accents by NFD decomposition and stripping
/// combining marks, maps separator characters to dashes, drops everything
/// else outside `[a-z0-9]`, collapses dash runs, trims dashes, strips
/// leading non-letters, and caps the length. An empty result becomes
/// `untitled`.
pub fn sanitize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let decomposed: String = lowered.nfd().filter(|c| !is_combining_mark(*c)).collect();

    let mut mapped = String::with_capacity(decomposed.len());
    for c in decomposed.chars() {
        match c {
            ' ' | '/' | '\\' | ':' | '|' | '_' | '-' => mapped.push('-'),
            c if c.is_ascii_lowercase() || c.is_ascii_digit() => mapped.push(c),
            _ => {}
        }
    }

    let mut collapsed = String::with_capacity(mapped.len());
    let mut prev_dash = false;
    for c in mapped.chars() {
        if c == '-' {
            if !prev_dash {
                collapsed.push('-');
            }
            prev_dash = true;
        } else {
            collapsed.push(c);
            prev_dash = false;
        }
    }

    let trimmed = collapsed.trim_matches('-');
    // File names start with a letter
    let mut base = match trimmed.find(|c: char| c.is_ascii_lowercase()) {
        Some(i) => trimmed[i..].to_string(),
        None => String::new(),
    };
    if base.len() > MAX_BASE_LEN {
        base.truncate(MAX_BASE_LEN);
    }
    let base = base.trim_end_matches('-');

    if base.is_empty() {
        "untitled".to_string()
    } else {
        base.to_string()
    }
}

/// Assign the file path for an object.
///
/// The stability rule dominates: an id already registered with a non-empty
/// file_path keeps it. New objects are placed under their folder (roots) or
/// under their parent's directory (children), with a short-id suffix when
/// another record in the same directory already claimed the base name.
pub fn allocate(
    registry: &Registry<'_>,
    raw_id: &str,
    title: &str,
    is_root: bool,
    parent_id: &str,
    folder: &str,
) -> Result<String> {
    let norm = id::normalize(raw_id);
    if let Some(existing) = registry.load(&norm)?
        && !existing.file_path.is_empty()
    {
        return Ok(existing.file_path);
    }

    let base = sanitize_title(title);

    let directory = if is_root {
        folder.to_string()
    } else {
        match registry.load(parent_id)? {
            Some(parent) if !parent.file_path.is_empty() => {
                let parent_path = Path::new(&parent.file_path);
                let parent_dir = parent_path
                    .parent()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let parent_base = parent_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if parent_dir.is_empty() {
                    parent_base
                } else {
                    format!("{parent_dir}/{parent_base}")
                }
            }
            _ => folder.to_string(),
        }
    };

    let base = if base_taken(registry, &directory, &base, &norm)? {
        format!("{base}-{}", id::short(&norm))
    } else {
        base
    };

    Ok(format!("{directory}/{base}.md"))
}

/// Case-insensitive collision check against every record already placed in
/// `directory`.
fn base_taken(
    registry: &Registry<'_>,
    directory: &str,
    base: &str,
    own_id: &str,
) -> Result<bool> {
    let target = base.to_lowercase();
    for record in registry.list()? {
        if record.id == own_id || record.file_path.is_empty() {
            continue;
        }
        let path = Path::new(&record.file_path);
        let dir = path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        if dir != directory {
            continue;
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if stem == target {
            return Ok(true);
        }
    }
    Ok(false)
}
