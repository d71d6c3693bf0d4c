// src/commands/mod.rs
//! Command handlers for the ntnsync CLI

mod get;
mod list;
mod maintenance;
mod pull;
mod scan;
mod serve;
mod status;
mod sync;

pub use get::cmd_get;
pub use list::cmd_list;
pub use maintenance::{cmd_cleanup, cmd_reindex};
pub use pull::cmd_pull;
pub use scan::cmd_scan;
pub use serve::cmd_serve;
pub use status::cmd_status;
pub use sync::cmd_sync;

use crate::config::Config;
use crate::manifest;
use crate::store::{GitConfig, Store};
use anyhow::{Context, Result};

/// Open the working copy and run root-manifest reconciliation, which
/// precedes every command.
pub(crate) fn open_and_reconcile(config: &Config) -> Result<Store> {
    let store = Store::open(config.dir.clone(), GitConfig::from_config(config))
        .context("Failed to open working copy")?;
    let mut tx = store.begin();
    manifest::reconcile(&store, &mut tx).context("Root manifest reconciliation failed")?;
    Ok(store)
}

/// Commit and push per configuration after a mutating command.
pub(crate) fn finish(config: &Config, store: &Store, message: &str) -> Result<()> {
    if config.commit {
        let mut tx = store.begin();
        tx.commit(message).context("Commit failed")?;
    }
    if config.push {
        store.push().context("Push failed")?;
    }
    Ok(())
}
