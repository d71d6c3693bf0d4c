// src/registry/state.rs

//! Process-wide sync state, rewritten atomically as a whole
//!
//! Tracks the folder set and the pull cursor: the wall-clock time of the
//! last pull and the smallest remote-edit time observed in its results.

use crate::config::STATE_DIR;
use crate::error::Result;
use crate::store::{Store, Transaction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SyncState {
    pub folders: BTreeSet<String>,
    pub last_pull_time: Option<DateTime<Utc>>,
    /// Smallest remote-edit time seen in the last pull's results; the next
    /// pull can stop paginating once it crosses this
    pub oldest_pull_result: Option<DateTime<Utc>>,
}

impl SyncState {
    pub fn load(store: &Store) -> Result<SyncState> {
        let rel = format!("{STATE_DIR}/state.json");
        if !store.exists(&rel) {
            return Ok(SyncState::default());
        }
        let bytes = store.read(&rel)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, tx: &mut Transaction<'_>) -> Result<()> {
        let rel = format!("{STATE_DIR}/state.json");
        let bytes = serde_json::to_vec_pretty(self)?;
        tx.write(&rel, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::GitConfig;
    use tempfile::TempDir;

    #[test]
    fn test_default_when_absent() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), GitConfig::default()).unwrap();
        let state = SyncState::load(&store).unwrap();
        assert!(state.folders.is_empty());
        assert!(state.last_pull_time.is_none());
    }

    #[test]
    fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), GitConfig::default()).unwrap();

        let mut state = SyncState::default();
        state.folders.insert("tech".to_string());
        state.last_pull_time = Some(Utc::now());

        let mut tx = store.begin();
        state.save(&mut tx).unwrap();

        let loaded = SyncState::load(&store).unwrap();
        assert!(loaded.folders.contains("tech"));
        assert!(loaded.last_pull_time.is_some());
    }
}
