//! Choosing a backend from the state path.

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::file::FileStore;
use crate::sqlite::SqliteStore;
use crate::store::StateStore;
use stepsync_common::Result;

/// Pick the store kind matching a state path's extension.
///
/// `.db`, `.sqlite` and `.sqlite3` select SQLite; anything else is a JSON file.
pub fn store_kind_for_path(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("db") | Some("sqlite") | Some("sqlite3") => "sqlite",
        _ => "file",
    }
}

/// Open the store for a state path, taking its exclusive lock.
///
/// # Errors
/// - `Locked` if another process has the same state open
/// - The backend cannot be opened
pub fn open_store(path: &Path) -> Result<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match store_kind_for_path(path) {
        "sqlite" => Arc::new(SqliteStore::open(path)?),
        _ => Arc::new(FileStore::new(path)?),
    };
    info!("Opened {} store at {}", store.name(), path.display());
    Ok(store)
}
