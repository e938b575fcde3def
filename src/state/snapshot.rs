//! State snapshot persistence
//!
//! Persists per-equipment state to a local sled tree so PID integrals,
//! hysteresis latches, and runtime counters survive a restart. Values are
//! JSON; keys are equipment ids (or `group:` keys). Loaded once at
//! startup, flushed on a slow cadence and at shutdown. Corrupt entries are
//! dropped with a warning, never fatal.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{EquipmentState, StateStore};

/// Error type for snapshot operations.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sled-backed snapshot of the state store.
#[derive(Clone)]
pub struct StateSnapshot {
    db: Arc<sled::Db>,
}

impl StateSnapshot {
    /// Open or create the snapshot database at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        let db = sled::open(path)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Load every persisted entry. Undecodable values are skipped with a
    /// warning; a fresh engine must never be blocked by stale state.
    pub fn load_all(&self) -> HashMap<String, EquipmentState> {
        let mut entries = HashMap::new();
        for item in self.db.iter() {
            let (key, value) = match item {
                Ok(kv) => kv,
                Err(e) => {
                    warn!("State snapshot iteration error: {}", e);
                    continue;
                }
            };
            let id = String::from_utf8_lossy(&key).to_string();
            match serde_json::from_slice::<EquipmentState>(&value) {
                Ok(state) => {
                    entries.insert(id, state);
                }
                Err(e) => {
                    warn!("Dropping corrupt state snapshot entry {}: {}", id, e);
                }
            }
        }
        entries
    }

    /// Write the full store contents. Called on the flush cadence and at
    /// shutdown; sled handles durability via background flushing.
    pub fn save(&self, store: &StateStore) -> Result<usize, SnapshotError> {
        let entries = store.export();
        let count = entries.len();
        for (id, state) in entries {
            let value = serde_json::to_vec(&state)?;
            self.db.insert(id.as_bytes(), value)?;
        }
        debug!("State snapshot saved ({} entries)", count);
        Ok(count)
    }

    /// Force a sync flush (shutdown path).
    pub fn flush(&self) -> Result<(), SnapshotError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new();
        let mut state = EquipmentState::new();
        state.set_f64("runtime_hours", 100.25);
        state.set_bool("latch.enable", true);
        store.merge("pump-1", state.clone());

        let snapshot = StateSnapshot::open(dir.path()).expect("open sled");
        snapshot.save(&store).expect("save");
        snapshot.flush().expect("flush");

        let loaded = snapshot.load_all();
        assert_eq!(loaded.get("pump-1"), Some(&state));
    }

    #[test]
    fn corrupt_entries_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let snapshot = StateSnapshot::open(dir.path()).expect("open sled");
        snapshot
            .db
            .insert(b"bad-entry", b"not json".to_vec())
            .expect("insert");

        let store = StateStore::new();
        let mut state = EquipmentState::new();
        state.set_f64("x", 1.0);
        store.merge("good", state);
        snapshot.save(&store).expect("save");

        let loaded = snapshot.load_all();
        assert!(loaded.contains_key("good"));
        assert!(!loaded.contains_key("bad-entry"));
    }
}
