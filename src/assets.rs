// src/assets.rs

//! Download pipeline for binaries referenced by pages
//!
//! Each referenced URL is either rewritten to a stable local relative path
//! (workspace-hosted assets, deduplicated by content id) or passed through
//! unchanged (external URLs, oversized files, download failures). Errors
//! never fail the page; the original URL is kept and a warning logged.

use crate::error::{Error, Result};
use crate::id;
use crate::paths::sanitize_title;
use crate::registry::{FileAssetRecord, Registry};
use crate::store::Transaction;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Attempts at resolving a same-name/different-content collision
const MAX_NAME_ATTEMPTS: usize = 10;

/// Manifest written next to each downloaded asset, used to tell
/// same-name/same-content apart from a genuine collision.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SiblingManifest {
    pub file_id: String,
    pub parent_page_id: String,
    pub downloaded_at: Option<DateTime<Utc>>,
}

pub struct AssetPipeline {
    http: Client,
    max_file_size: u64,
}

impl AssetPipeline {
    pub fn new(max_file_size: u64) -> Result<Self> {
        let http = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(AssetPipeline {
            http,
            max_file_size,
        })
    }

    /// Process one referenced URL for the page at `page_path`. Returns the
    /// URL to embed in the Markdown: a relative local path on success, the
    /// original URL otherwise.
    pub fn process(
        &self,
        registry: &Registry<'_>,
        tx: &mut Transaction<'_>,
        page_path: &str,
        page_id: &str,
        url: &str,
    ) -> String {
        let Some(content_id) = extract_content_id(url) else {
            return url.to_string();
        };
        match self.download(registry, tx, page_path, page_id, url, &content_id) {
            Ok(Some(local)) => local,
            Ok(None) => url.to_string(),
            Err(e) => {
                warn!(%url, page = page_id, error = %e, "asset download failed, keeping remote url");
                url.to_string()
            }
        }
    }

    fn download(
        &self,
        registry: &Registry<'_>,
        tx: &mut Transaction<'_>,
        page_path: &str,
        page_id: &str,
        url: &str,
        content_id: &str,
    ) -> Result<Option<String>> {
        let page_dir = parent_dir(page_path);

        // Dedup by content id across the whole tree
        if let Some(existing) = registry.load_asset(content_id)? {
            debug!(asset = content_id, "asset already downloaded");
            return Ok(Some(rel_path(&page_dir, &existing.file_path)));
        }

        let filename = derive_filename(url);
        let target_dir = asset_dir(page_path);

        let target = match self.resolve_collision(registry, tx, &target_dir, &filename, content_id)? {
            Some(target) => target,
            None => {
                // Same content already on disk under this name; the
                // collision pass recorded it, so point at that copy
                return match registry.load_asset(content_id)? {
                    Some(reused) => Ok(Some(rel_path(&page_dir, &reused.file_path))),
                    None => Ok(None),
                };
            }
        };

        // HEAD first: skip oversized files without transferring them
        if let Ok(response) = self.http.head(url).send()
            && let Some(length) = content_length(&response)
            && length > self.max_file_size
        {
            warn!(%url, length, cap = self.max_file_size, "asset exceeds size cap, skipping");
            return Ok(None);
        }

        let response = self.http.get(url).send()?;
        if !response.status().is_success() {
            return Err(Error::Download(format!(
                "HTTP {} fetching {url}",
                response.status()
            )));
        }

        // The capped reader is the safety net against lying servers
        let mut reader = response.take(self.max_file_size + 1);
        let written = tx.write_stream(&target, &mut reader)?;
        if written > self.max_file_size {
            warn!(%url, written, cap = self.max_file_size, "asset exceeded size cap mid-stream, discarding");
            tx.delete(&target)?;
            return Ok(None);
        }

        let now = Utc::now();
        registry.save_asset(
            tx,
            &FileAssetRecord {
                id: content_id.to_string(),
                file_path: target.clone(),
                source_url: url.to_string(),
                last_synced: Some(now),
            },
        )?;
        let manifest = SiblingManifest {
            file_id: content_id.to_string(),
            parent_page_id: id::normalize(page_id),
            downloaded_at: Some(now),
        };
        tx.write(
            &format!("{target}.meta.json"),
            &serde_json::to_vec_pretty(&manifest)?,
        )?;

        debug!(asset = content_id, path = %target, bytes = written, "downloaded asset");
        Ok(Some(rel_path(&page_dir, &target)))
    }

    /// Find a free (or reusable) name in the target directory. Returns
    /// None when an existing same-id sibling makes the download
    /// unnecessary; the caller re-reads the asset record in that case.
    fn resolve_collision(
        &self,
        registry: &Registry<'_>,
        tx: &mut Transaction<'_>,
        target_dir: &str,
        filename: &str,
        content_id: &str,
    ) -> Result<Option<String>> {
        let (stem, ext) = split_name(filename);
        let short = id::short(content_id);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate_name = match attempt {
                0 => filename.to_string(),
                1 => join_name(&format!("{stem}-{short}"), &ext),
                n => join_name(&format!("{stem}-{short}-{n}"), &ext),
            };
            let candidate = format!("{target_dir}/{candidate_name}");

            if !tx_exists(tx, &candidate) {
                return Ok(Some(candidate));
            }
            // Same content already there under this name?
            let manifest_rel = format!("{candidate}.meta.json");
            if let Ok(bytes) = read_via_tx(tx, &manifest_rel)
                && let Ok(manifest) = serde_json::from_slice::<SiblingManifest>(&bytes)
                && manifest.file_id == content_id
            {
                // Ensure the asset record exists so future lookups hit the
                // dedup path directly
                if registry.load_asset(content_id)?.is_none() {
                    registry.save_asset(
                        tx,
                        &FileAssetRecord {
                            id: content_id.to_string(),
                            file_path: candidate,
                            source_url: String::new(),
                            last_synced: manifest.downloaded_at,
                        },
                    )?;
                }
                return Ok(None);
            }
        }
        Err(Error::Download(format!(
            "no free name for {filename} in {target_dir} after {MAX_NAME_ATTEMPTS} attempts"
        )))
    }
}

/// Extract and normalize the content id from a workspace-hosted asset URL.
/// External URLs yield None and are left untouched.
pub fn extract_content_id(raw: &str) -> Option<String> {
    let url = url::Url::parse(raw).ok()?;
    let host = url.host_str()?;
    let hosted = host.ends_with("amazonaws.com")
        || host == "file.notion.so"
        || host == "files.notion.so"
        || host.ends_with("notion-static.com");
    if !hosted {
        return None;
    }

    let segments: Vec<&str> = url.path_segments()?.collect();
    if segments.len() < 2 {
        return None;
    }
    // The content id sits in the path just before the filename
    for segment in segments[..segments.len() - 1].iter().rev() {
        let norm = id::normalize(segment);
        if norm.len() == 32 && norm.chars().all(|c| c.is_ascii_hexdigit()) {
            return Some(norm.to_lowercase());
        }
    }
    None
}

/// Filename from the last URL path segment: percent-decoded, stem
/// sanitized, extension lowercased. Empty results become `file`.
pub fn derive_filename(raw: &str) -> String {
    let last = url::Url::parse(raw)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .unwrap_or_default();
    let decoded = urlencoding::decode(&last)
        .map(|c| c.into_owned())
        .unwrap_or(last);

    let (stem, ext) = split_name(&decoded);
    let clean_stem = match sanitize_title(&stem) {
        s if s == "untitled" => "file".to_string(),
        s => s,
    };
    join_name(&clean_stem, &ext.to_lowercase())
}

/// `<dir-of-page>/<page-base>/files`
pub fn asset_dir(page_path: &str) -> String {
    let path = Path::new(page_path);
    let dir = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if dir.is_empty() {
        format!("{base}/files")
    } else {
        format!("{dir}/{base}/files")
    }
}

fn parent_dir(page_path: &str) -> String {
    Path::new(page_path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Relative path from `from_dir` (repo-relative) to `to` (repo-relative).
fn rel_path(from_dir: &str, to: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty()).collect();
    let to_parts: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();

    let common = from
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = vec!["..".to_string(); from.len() - common];
    parts.extend(to_parts[common..].iter().map(|s| s.to_string()));
    parts.join("/")
}

fn split_name(name: &str) -> (String, String) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            (stem.to_string(), ext.to_string())
        }
        _ => (name.to_string(), String::new()),
    }
}

fn join_name(stem: &str, ext: &str) -> String {
    if ext.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{ext}")
    }
}

fn tx_exists(tx: &Transaction<'_>, rel: &str) -> bool {
    tx.store().exists(rel)
}

fn read_via_tx(tx: &Transaction<'_>, rel: &str) -> Result<Vec<u8>> {
    tx.store().read(rel)
}

fn content_length(response: &reqwest::blocking::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
