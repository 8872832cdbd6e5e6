//! State store trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stepsync_common::{LocalState, OutboxItem, Result};

/// Everything that must survive a restart, saved and loaded as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    /// Local authoritative values.
    pub state: LocalState,
    /// Pending operations, oldest first.
    pub outbox: Vec<OutboxItem>,
}

impl Snapshot {
    /// Create a snapshot from its parts.
    pub fn new(state: LocalState, outbox: Vec<OutboxItem>) -> Self {
        Self { state, outbox }
    }
}

/// Durable storage for the device snapshot.
///
/// Implementations must make `save` atomic from the caller's perspective:
/// a crash during a save leaves either the previous snapshot or the new
/// one, never a state without its matching outbox.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get the store name (e.g., "file", "sqlite", "memory").
    fn name(&self) -> &str;

    /// Load the persisted snapshot.
    ///
    /// # Postconditions
    /// - Returns `Snapshot::default()` if nothing was ever saved
    ///
    /// # Errors
    /// - Persisted data exists but cannot be read or decoded
    async fn load(&self) -> Result<Snapshot>;

    /// Persist state and outbox together.
    ///
    /// # Errors
    /// - I/O or database errors; the previous snapshot stays intact
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;
}
