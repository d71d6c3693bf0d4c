// src/fetcher.rs

//! Bounded remote resolution: block trees, ancestor chains, users
//!
//! Three procedures, all depth-bounded. Block fetching exhausts pagination
//! per level before recursing and swallows per-child failures (the partial
//! tree is still convertible); only a failure on the root object's direct
//! children fails the call.

use crate::error::{Error, Result};
use crate::id;
use crate::notion::{Block, NotionApi, Page, Parent, PartialUser};
use crate::registry::{Registry, UserRecord};
use crate::store::Transaction;
use tracing::{debug, warn};

/// Hard bound on block→object parent hops
const MAX_RESOLUTION_DEPTH: usize = 50;

/// Result of a recursive block fetch.
#[derive(Debug, Default)]
pub struct FetchedBlocks {
    pub blocks: Vec<Block>,
    /// True when recursion stopped at the configured cap somewhere
    pub was_limited: bool,
    /// The cap in force when limiting occurred
    pub depth_limit: u32,
}

/// Fetch the block tree under `object_id`, recursing into blocks whose
/// `has_children` flag is set. `max_depth == 0` means unlimited.
pub fn fetch_blocks(api: &dyn NotionApi, object_id: &str, max_depth: u32) -> Result<FetchedBlocks> {
    let mut result = FetchedBlocks {
        depth_limit: max_depth,
        ..Default::default()
    };
    result.blocks = fetch_level(api, object_id, 1, max_depth, &mut result.was_limited)?;
    Ok(result)
}

fn fetch_level(
    api: &dyn NotionApi,
    parent_id: &str,
    level: u32,
    max_depth: u32,
    limited: &mut bool,
) -> Result<Vec<Block>> {
    // Exhaust pagination at this level before recursing
    let mut blocks = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let batch = api.get_block_children(parent_id, cursor.as_deref())?;
        blocks.extend(batch.results);
        if !batch.has_more {
            break;
        }
        cursor = batch.next_cursor;
        if cursor.is_none() {
            break;
        }
    }

    for block in &mut blocks {
        if !block.has_children || is_separate_object(block) {
            continue;
        }
        if max_depth > 0 && level == max_depth {
            *limited = true;
            continue;
        }
        match fetch_level(api, &block.id, level + 1, max_depth, limited) {
            Ok(children) => block.children = children,
            Err(e) => {
                // Partial trees are fine below the root level
                warn!(block = %block.id, error = %e, "failed to fetch block children, skipping subtree");
            }
        }
    }
    Ok(blocks)
}

/// Child pages and databases are synced as their own objects; their
/// subtrees are never inlined.
fn is_separate_object(block: &Block) -> bool {
    matches!(block.block_type.as_str(), "child_page" | "child_database")
}

/// What a block chain resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedObject {
    Page(String),
    Database(String),
    Workspace,
}

impl ResolvedObject {
    pub fn id(&self) -> Option<&str> {
        match self {
            ResolvedObject::Page(id) | ResolvedObject::Database(id) => Some(id),
            ResolvedObject::Workspace => None,
        }
    }
}

/// Walk `parent` links upward through block→block hops until a page,
/// database, or workspace parent appears. Bounded to stop pathological
/// loops.
pub fn resolve_block_to_object(api: &dyn NotionApi, block_id: &str) -> Result<ResolvedObject> {
    let mut current = block_id.to_string();
    for _ in 0..MAX_RESOLUTION_DEPTH {
        let block = api.get_block(&current)?;
        match block.parent {
            Some(Parent::PageId { page_id }) => {
                return Ok(ResolvedObject::Page(id::normalize(&page_id)));
            }
            Some(Parent::DatabaseId { database_id }) => {
                return Ok(ResolvedObject::Database(id::normalize(&database_id)));
            }
            Some(Parent::BlockId { block_id }) => {
                current = block_id;
            }
            Some(Parent::Workspace { .. }) | None => return Ok(ResolvedObject::Workspace),
        }
    }
    Err(Error::ResolutionDepthExceeded(MAX_RESOLUTION_DEPTH))
}

/// An ancestor that is not yet in the registry, fetched remotely while
/// tracing. Databases encountered on the way are represented as synthetic
/// pages so the chain stays uniform.
#[derive(Debug, Clone)]
pub struct MissingAncestor {
    pub id: String,
    pub title: String,
    pub is_database: bool,
    pub parent_id: Option<String>,
}

/// Result of a parent-chain trace.
#[derive(Debug)]
pub struct TracedChain {
    /// Folder of the first registered ancestor's root, or the requested
    /// folder when the chain reaches the workspace
    pub folder: String,
    /// Ancestors to materialize, child-first
    pub missing: Vec<MissingAncestor>,
}

/// Trace a page's ancestry: registry first, remote for the gaps.
///
/// Stops at the first ancestor already recorded under a root and returns
/// that root's folder. Unrecorded ancestors are fetched remotely and
/// accumulated child-first; reaching the workspace falls back to
/// `requested_folder` (or `default`).
pub fn trace_parent_chain(
    api: &dyn NotionApi,
    registry: &Registry<'_>,
    page: &Page,
    requested_folder: &str,
) -> Result<TracedChain> {
    let fallback = if requested_folder.is_empty() {
        "default".to_string()
    } else {
        requested_folder.to_string()
    };

    let mut missing = Vec::new();
    let mut parent = page.parent.clone();
    let mut visited = std::collections::HashSet::new();
    visited.insert(id::normalize(&page.id));

    loop {
        let parent_id = match &parent {
            None | Some(Parent::Workspace { .. }) => {
                return Ok(TracedChain {
                    folder: fallback,
                    missing,
                });
            }
            Some(Parent::BlockId { block_id }) => match resolve_block_to_object(api, block_id)? {
                ResolvedObject::Workspace => {
                    return Ok(TracedChain {
                        folder: fallback,
                        missing,
                    });
                }
                resolved => id::normalize(resolved.id().unwrap_or_default()),
            },
            Some(other) => id::normalize(other.id().unwrap_or_default()),
        };

        if !visited.insert(parent_id.clone()) {
            return Err(Error::Cycle(parent_id));
        }

        // Registry first: a recorded ancestor ends the trace at its root
        if let Some(record) = registry.load(&parent_id)? {
            let folder = match registry.trace_root(&parent_id)? {
                Some(root) => root.folder,
                None if !record.folder.is_empty() => record.folder,
                None => fallback,
            };
            return Ok(TracedChain { folder, missing });
        }

        // Gap: fetch the parent remotely, tolerating the database shape
        match api.get_page(&parent_id) {
            Ok(remote) => {
                debug!(parent = %parent_id, "fetched missing ancestor");
                parent = remote.parent.clone();
                missing.push(MissingAncestor {
                    id: parent_id,
                    title: remote.title(),
                    is_database: false,
                    parent_id: remote.parent.as_ref().and_then(|p| p.id()).map(id::normalize),
                });
            }
            Err(Error::DatabaseIsNotPage(_)) => {
                let database = api.get_database(&parent_id)?;
                parent = database.parent.clone();
                missing.push(MissingAncestor {
                    id: parent_id,
                    title: database.title_text(),
                    is_database: true,
                    parent_id: database
                        .parent
                        .as_ref()
                        .and_then(|p| p.id())
                        .map(id::normalize),
                });
            }
            Err(e) => return Err(e),
        }
    }
}

/// Resolve a user reference through the on-disk cache, consulting the
/// remote endpoint on a miss. Failures degrade silently.
pub fn resolve_user(
    api: &dyn NotionApi,
    registry: &Registry<'_>,
    tx: &mut Transaction<'_>,
    user_ref: &PartialUser,
) -> Option<UserRecord> {
    if user_ref.id.is_empty() {
        return None;
    }
    match registry.load_user(&user_ref.id) {
        Ok(Some(cached)) => return Some(cached),
        Ok(None) => {}
        Err(e) => {
            warn!(user = %user_ref.id, error = %e, "user cache read failed");
            return None;
        }
    }
    match api.get_user(&user_ref.id) {
        Ok(user) => {
            let record = UserRecord {
                id: id::normalize(&user.id),
                name: user.name.clone().unwrap_or_default(),
                kind: user.kind.clone().unwrap_or_else(|| "person".to_string()),
                email: user.email().map(str::to_string),
            };
            if let Err(e) = registry.save_user(tx, &record) {
                warn!(user = %record.id, error = %e, "user cache write failed");
            }
            Some(record)
        }
        Err(e) => {
            warn!(user = %user_ref.id, error = %e, "user lookup failed");
            None
        }
    }
}

/// Frontmatter form of a user: `Name <email> [short-id]`.
pub fn format_user(record: &UserRecord) -> String {
    let short = id::short(&record.id);
    match &record.email {
        Some(email) => format!("{} <{}> [{}]", record.name, email, short),
        None => format!("{} [{}]", record.name, short),
    }
}
