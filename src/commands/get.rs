// src/commands/get.rs
//! Sync a single object immediately

use crate::config::Config;
use crate::crawler::Crawler;
use crate::error::Error;
use crate::fetcher;
use crate::id;
use crate::notion::{NotionApi, NotionClient};
use crate::registry::Registry;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

pub fn cmd_get(config: &Config, target: &str, folder: Option<String>) -> Result<()> {
    let Some(page_id) = id::from_url(target).or_else(|| {
        let norm = id::normalize(target);
        (norm.len() == 32 && norm.chars().all(|c| c.is_ascii_hexdigit())).then_some(norm)
    }) else {
        bail!("{target:?} is not a Notion URL or id");
    };

    let store = super::open_and_reconcile(config)?;
    let client = NotionClient::new(config.token()?)?;
    let registry = Registry::new(&store);
    let requested = folder.unwrap_or_default();

    // Resolve the folder through the ancestry before syncing so the object
    // lands under its root, not under a guess
    let target_folder = match client.get_page(&page_id) {
        Ok(page) => {
            fetcher::trace_parent_chain(&client, &registry, &page, &requested)
                .context("Parent chain resolution failed")?
                .folder
        }
        Err(Error::DatabaseIsNotPage(_)) => {
            // Databases resolve through their own record or the request
            registry
                .load(&page_id)?
                .map(|r| r.folder)
                .filter(|f| !f.is_empty())
                .unwrap_or_else(|| {
                    if requested.is_empty() {
                        "default".to_string()
                    } else {
                        requested.clone()
                    }
                })
        }
        Err(e) => return Err(e.into()),
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let crawler = Crawler::new(&client, &store, config, cancel)?;
    let files = crawler.sync_object(&page_id, &target_folder)?;

    println!("Synced {page_id} into {target_folder} ({files} file(s) written).");
    super::finish(config, &store, &format!("ntnsync: get {page_id}"))?;
    Ok(())
}
