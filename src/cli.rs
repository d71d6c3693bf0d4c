// src/cli.rs
//! CLI definitions for ntnsync
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ntnsync")]
#[command(version)]
#[command(about = "Sync a Notion workspace into a git-backed tree of Markdown files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search the workspace for recently edited pages and enqueue them
    Pull {
        /// Only enqueue into this folder
        #[arg(long)]
        folder: Option<String>,

        /// Look back this far (e.g. 30d, 12h); defaults to the last pull
        #[arg(long)]
        since: Option<String>,

        /// Stop after this many pages (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        max_pages: u32,

        /// Ignore the pull cursor and look at everything
        #[arg(long)]
        all: bool,

        /// Show what would be enqueued without writing queue entries
        #[arg(long)]
        dry_run: bool,
    },

    /// Drain the work queue
    Sync {
        /// Only process entries for this folder
        #[arg(long)]
        folder: Option<String>,

        /// Stop after this many pages (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        max_pages: u32,

        /// Stop after writing this many files (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        max_files: u32,

        /// Stop after this much wall-clock time (e.g. 10m; 0 = unlimited)
        #[arg(long)]
        max_time: Option<String>,

        /// Stop after consuming this many queue entries (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        max_queue_files: u32,
    },

    /// Sync a single page or database immediately
    Get {
        /// Notion URL or id
        target: String,

        /// Folder to place the object under when its ancestry is unknown
        #[arg(long)]
        folder: Option<String>,
    },

    /// Search the whole workspace and enqueue unregistered pages
    Scan {
        /// Folder to enqueue discovered pages into
        #[arg(long)]
        folder: Option<String>,
    },

    /// List synced objects
    List {
        /// Only list objects in this folder
        #[arg(long)]
        folder: Option<String>,

        /// Show the parent/child hierarchy
        #[arg(long)]
        tree: bool,
    },

    /// Show sync state and queue backlog
    Status {
        /// Only show this folder
        #[arg(long)]
        folder: Option<String>,
    },

    /// Delete objects that no longer trace to a manifest root
    Cleanup {
        /// Trace without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Rebuild missing registry records from file frontmatter
    Reindex {
        /// Report without writing records
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the webhook server
    Serve,
}
