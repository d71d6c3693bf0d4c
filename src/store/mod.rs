// src/store/mod.rs

//! Transactional filesystem over a git working copy
//!
//! All mutation goes through a [`Transaction`]; reads may be performed
//! directly. Writes publish atomically (temp file in the target directory,
//! then rename) and are visible to readers immediately. Commits are coarse
//! batching points decided by the caller: a single transaction may produce
//! many commits, and `rollback` discards only what is not yet committed.
//!
//! Locking is cooperative. The store does not take its own mutex inside
//! individual operations; the single-task CLI path never contends, and the
//! server path brackets its short write/commit bursts with [`Store::lock`]
//! while long network work runs unlocked. A separate fs2 flock on
//! `.notion-sync/lock` rejects a second process on the same checkout.

mod git;

pub use git::GitConfig;

use crate::config::STATE_DIR;
use crate::error::{Error, Result};
use fs2::FileExt;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Default mode for newly published files
const FILE_MODE: u32 = 0o644;
/// Mode for created parent directories (directory-execute for traversal)
const DIR_MODE: u32 = 0o755;

pub struct Store {
    root: PathBuf,
    git: GitConfig,
    mutex: RwLock<()>,
    /// Held for the lifetime of the store; flock released on drop
    _process_lock: File,
}

impl Store {
    /// Open (or initialize) the working copy at `root`.
    ///
    /// Creates the directory, the hidden state directory, and the git
    /// repository if absent, and takes the single-process flock.
    pub fn open(root: impl Into<PathBuf>, git: GitConfig) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(STATE_DIR))?;
        git::open_or_init(&root, &git)?;

        // The flock file must never be committed or cleaned by rollback
        let gitignore = root.join(STATE_DIR).join(".gitignore");
        if !gitignore.exists() {
            fs::write(&gitignore, "lock\n")?;
        }

        let lock_path = root.join(STATE_DIR).join("lock");
        let process_lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        process_lock.try_lock_exclusive().map_err(|_| {
            Error::Config(format!(
                "another process holds the working copy at {}",
                root.display()
            ))
        })?;

        Ok(Store {
            root,
            git,
            mutex: RwLock::new(()),
            _process_lock: process_lock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Acquire the working-copy mutex in write mode. The webhook worker
    /// widens its write/commit burst across several calls with this guard.
    pub fn lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.mutex.write()
    }

    /// Acquire the working-copy mutex in read mode.
    pub fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.mutex.read()
    }

    /// Read a file relative to the working copy root.
    pub fn read(&self, rel: &str) -> Result<Vec<u8>> {
        let path = self.abs(rel)?;
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(rel.to_string())
            } else {
                Error::Io(e)
            }
        })
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.abs(rel).map(|p| p.exists()).unwrap_or(false)
    }

    pub fn is_dir(&self, rel: &str) -> bool {
        self.abs(rel).map(|p| p.is_dir()).unwrap_or(false)
    }

    /// List entry names directly under `rel`, sorted. Empty if the
    /// directory does not exist; never recurses.
    pub fn list(&self, rel: &str) -> Result<Vec<String>> {
        let path = self.abs(rel)?;
        let mut names = Vec::new();
        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(Error::Io(e)),
        };
        for entry in entries {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Start a transaction. The handle may outlive many commits.
    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            store: self,
            modified: BTreeSet::new(),
        }
    }

    /// Push the configured branch. A non-fast-forward rejection triggers one
    /// `pull` and a single retry; repeated failure surfaces.
    pub fn push(&self) -> Result<()> {
        match git::push(&self.root, &self.git) {
            Ok(()) => Ok(()),
            Err(e) if git::is_non_fast_forward(&e) => {
                warn!("push rejected (non-fast-forward), pulling and retrying once");
                self.pull()?;
                git::push(&self.root, &self.git)
            }
            Err(e) => Err(e),
        }
    }

    /// Pull the configured branch. On divergence the remote is
    /// authoritative: fetch then hard reset. An empty remote is success.
    pub fn pull(&self) -> Result<()> {
        git::pull(&self.root, &self.git)
    }

    /// Resolve a repository-relative path, rejecting escapes.
    fn abs(&self, rel: &str) -> Result<PathBuf> {
        let rel_path = Path::new(rel);
        if rel_path.is_absolute() {
            return Err(Error::Config(format!("absolute path not allowed: {rel}")));
        }
        for component in rel_path.components() {
            if matches!(component, Component::ParentDir) {
                return Err(Error::Config(format!("path escapes working copy: {rel}")));
            }
        }
        Ok(self.root.join(rel_path))
    }
}

/// Handle for transactional writes. Commits are explicit batching points;
/// uncommitted writes are discarded by `rollback`.
pub struct Transaction<'a> {
    store: &'a Store,
    modified: BTreeSet<String>,
}

impl<'a> Transaction<'a> {
    /// Atomically publish `bytes` at `rel`. Parent directories are created
    /// as needed; an existing file keeps its permissions.
    pub fn write(&mut self, rel: &str, bytes: &[u8]) -> Result<()> {
        let path = self.store.abs(rel)?;
        let mode = existing_mode(&path).unwrap_or(FILE_MODE);
        let parent = ensure_parent(&path)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode))?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;

        debug!(path = rel, bytes = bytes.len(), "wrote file");
        self.modified.insert(rel.to_string());
        Ok(())
    }

    /// Same atomicity as `write`, streaming from `reader` without
    /// materializing the body. Returns the number of bytes written.
    pub fn write_stream(&mut self, rel: &str, reader: &mut dyn Read) -> Result<u64> {
        let path = self.store.abs(rel)?;
        let mode = existing_mode(&path).unwrap_or(FILE_MODE);
        let parent = ensure_parent(&path)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        let written = std::io::copy(reader, &mut tmp)?;
        tmp.as_file().sync_all()?;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode))?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;

        debug!(path = rel, bytes = written, "wrote streamed file");
        self.modified.insert(rel.to_string());
        Ok(written)
    }

    /// Idempotent delete; an absent file is success.
    pub fn delete(&mut self, rel: &str) -> Result<()> {
        let path = self.store.abs(rel)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                self.modified.insert(rel.to_string());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Recursive, idempotent directory creation.
    pub fn mkdir(&mut self, rel: &str) -> Result<()> {
        let path = self.store.abs(rel)?;
        fs::create_dir_all(&path)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(DIR_MODE))?;
        Ok(())
    }

    /// Stage every modified path under the working copy and create a single
    /// commit with the configured author. An empty stage is a no-op success.
    /// The transaction stays usable for further writes and commits.
    pub fn commit(&mut self, message: &str) -> Result<()> {
        match git::commit_all(&self.store.root, &self.store.git, message)? {
            Some(oid) => {
                info!(commit = %oid, files = self.modified.len(), "committed");
            }
            None => {
                debug!("nothing to commit");
            }
        }
        self.modified.clear();
        Ok(())
    }

    /// Discard uncommitted changes: hard reset to the branch tip and close
    /// the transaction.
    pub fn rollback(self) -> Result<()> {
        git::hard_reset_to_head(&self.store.root)?;
        info!(files = self.modified.len(), "rolled back");
        Ok(())
    }

    /// Paths written or deleted since the last commit.
    pub fn modified(&self) -> impl Iterator<Item = &str> {
        self.modified.iter().map(String::as_str)
    }

    /// The store this transaction writes to; handy for callers that
    /// interleave reads with transactional writes.
    pub fn store(&self) -> &'a Store {
        self.store
    }
}

fn ensure_parent(path: &Path) -> Result<&Path> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Config(format!("path has no parent: {}", path.display())))?;
    if !parent.exists() {
        fs::create_dir_all(parent)?;
        fs::set_permissions(parent, fs::Permissions::from_mode(DIR_MODE))?;
    }
    Ok(parent)
}

fn existing_mode(path: &Path) -> Option<u32> {
    fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o777)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), GitConfig::default()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_write_then_read() {
        let (_dir, store) = test_store();
        let mut tx = store.begin();
        tx.write("tech/page.md", b"# Hello").unwrap();
        assert_eq!(store.read("tech/page.md").unwrap(), b"# Hello");
        assert!(store.exists("tech/page.md"));
    }

    #[test]
    fn test_read_absent_is_not_found() {
        let (_dir, store) = test_store();
        match store.read("missing.md") {
            Err(Error::NotFound(p)) => assert_eq!(p, "missing.md"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_list_absent_dir_is_empty() {
        let (_dir, store) = test_store();
        assert!(store.list("nothing/here").unwrap().is_empty());
    }

    #[test]
    fn test_list_is_sorted_and_shallow() {
        let (_dir, store) = test_store();
        let mut tx = store.begin();
        tx.write("q/b.json", b"{}").unwrap();
        tx.write("q/a.json", b"{}").unwrap();
        tx.write("q/sub/c.json", b"{}").unwrap();
        assert_eq!(store.list("q").unwrap(), vec!["a.json", "b.json", "sub"]);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_dir, store) = test_store();
        let mut tx = store.begin();
        tx.write("x.md", b"x").unwrap();
        tx.delete("x.md").unwrap();
        tx.delete("x.md").unwrap();
        assert!(!store.exists("x.md"));
    }

    #[test]
    fn test_mkdir_recursive_idempotent() {
        let (_dir, store) = test_store();
        let mut tx = store.begin();
        tx.mkdir("a/b/c").unwrap();
        tx.mkdir("a/b/c").unwrap();
        assert!(store.is_dir("a/b/c"));
    }

    #[test]
    fn test_write_stream_counts_bytes() {
        let (_dir, store) = test_store();
        let mut tx = store.begin();
        let mut reader = std::io::Cursor::new(b"streamed body".to_vec());
        let written = tx.write_stream("files/blob.bin", &mut reader).unwrap();
        assert_eq!(written, 13);
        assert_eq!(store.read("files/blob.bin").unwrap(), b"streamed body");
    }

    #[test]
    fn test_path_escape_rejected() {
        let (_dir, store) = test_store();
        assert!(store.read("../outside").is_err());
        let mut tx = store.begin();
        assert!(tx.write("/etc/passwd", b"no").is_err());
    }

    #[test]
    fn test_write_preserves_permissions() {
        let (_dir, store) = test_store();
        let mut tx = store.begin();
        tx.write("script.md", b"v1").unwrap();
        let path = store.root().join("script.md");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        tx.write("script.md", b"v2").unwrap();
        assert_eq!(existing_mode(&path), Some(0o600));
    }

    #[test]
    fn test_second_store_on_same_checkout_rejected() {
        let (dir, _store) = test_store();
        assert!(Store::open(dir.path(), GitConfig::default()).is_err());
    }

    #[test]
    fn test_commit_and_rollback() {
        let (_dir, store) = test_store();
        let mut tx = store.begin();
        tx.write("a.md", b"committed").unwrap();
        tx.commit("first").unwrap();

        tx.write("a.md", b"dirty").unwrap();
        tx.write("b.md", b"dirty too").unwrap();
        tx.rollback().unwrap();

        assert_eq!(store.read("a.md").unwrap(), b"committed");
        assert!(!store.exists("b.md"));
    }

    #[test]
    fn test_empty_commit_is_noop() {
        let (_dir, store) = test_store();
        let mut tx = store.begin();
        tx.write("a.md", b"x").unwrap();
        tx.commit("first").unwrap();
        // Nothing changed since: still succeeds
        tx.commit("second").unwrap();
    }

    #[test]
    fn test_transaction_survives_commit() {
        let (_dir, store) = test_store();
        let mut tx = store.begin();
        tx.write("a.md", b"one").unwrap();
        tx.commit("one").unwrap();
        tx.write("b.md", b"two").unwrap();
        tx.commit("two").unwrap();
        assert!(store.exists("a.md"));
        assert!(store.exists("b.md"));
    }
}
