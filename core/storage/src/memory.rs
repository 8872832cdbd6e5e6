//! In-memory state store for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::store::{Snapshot, StateStore};
use stepsync_common::{Error, Result};

/// In-memory state store.
///
/// Useful for testing and development. Clones share the same storage, so a
/// test can keep one handle to inspect what an engine persisted.
#[derive(Clone, Default)]
pub struct MemoryStore {
    snapshot: Arc<RwLock<Option<Snapshot>>>,
    saves: Arc<AtomicUsize>,
    fail_saves: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory store that already holds a snapshot.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::new();
        if let Ok(mut slot) = store.snapshot.write() {
            *slot = Some(snapshot);
        }
        store
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// The last saved snapshot, if any.
    pub fn persisted(&self) -> Option<Snapshot> {
        self.snapshot.read().ok().and_then(|slot| slot.clone())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self) -> Result<Snapshot> {
        let slot = self
            .snapshot
            .read()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))?;
        Ok(slot.clone().unwrap_or_default())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Storage("Memory store configured to fail".to_string()));
        }
        let mut slot = self
            .snapshot
            .write()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))?;
        *slot = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
