// src/commands/serve.rs
//! Webhook server mode

use crate::config::Config;
use crate::server;
use anyhow::{Context, Result};

pub fn cmd_serve(config: &Config) -> Result<()> {
    // Reconcile once at startup, then hand the working copy to the server
    // (the store's process lock forbids two concurrent opens)
    {
        let _store = super::open_and_reconcile(config)?;
    }
    server::run(config.clone()).context("Server failed")?;
    Ok(())
}
