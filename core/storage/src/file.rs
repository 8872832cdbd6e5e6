//! JSON file state store.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::lock::StateLock;
use crate::store::{Snapshot, StateStore};
use stepsync_common::{Error, Result};

/// Stores the snapshot as a single JSON document.
///
/// Saves go to a sibling temporary file which is flushed to disk and then
/// renamed over the target, so readers only ever see a complete document.
pub struct FileStore {
    path: PathBuf,
    _lock: StateLock,
}

impl FileStore {
    /// Create a file store at the given path.
    ///
    /// # Postconditions
    /// - Parent directory is created if it doesn't exist
    /// - The path is locked until the store is dropped
    ///
    /// # Errors
    /// - Parent directory cannot be created
    /// - `Locked` if another store has the path open
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let lock = StateLock::acquire(&path)?;
        Ok(Self { path, _lock: lock })
    }

    /// Path of the JSON document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn write_and_rename(&self, temp: &Path, json: &[u8]) -> Result<()> {
        let mut file = fs::File::create(temp).await?;
        file.write_all(json).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(temp, &self.path).await?;
        Ok(())
    }
}

/// Flush the directory entry so a completed rename survives power loss.
#[cfg(unix)]
async fn sync_parent(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::File::open(parent).await?.sync_all().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn sync_parent(_path: &Path) -> Result<()> {
    Ok(())
}

#[async_trait]
impl StateStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self) -> Result<Snapshot> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, using defaults", self.path.display());
                return Ok(Snapshot::default());
            }
            Err(e) => return Err(Error::Io(e)),
        };

        serde_json::from_str(&content).map_err(|e| {
            Error::Serialization(format!(
                "Corrupt state file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        let temp = self.temp_path();

        if let Err(e) = self.write_and_rename(&temp, &json).await {
            match fs::remove_file(&temp).await {
                Ok(()) => {}
                Err(cleanup) if cleanup.kind() == std::io::ErrorKind::NotFound => {}
                Err(cleanup) => warn!("Failed to remove {}: {}", temp.display(), cleanup),
            }
            return Err(e);
        }
        sync_parent(&self.path).await?;

        debug!(
            "Saved state to {} ({} pending)",
            self.path.display(),
            snapshot.outbox.len()
        );
        Ok(())
    }
}
