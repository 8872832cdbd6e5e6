//! Exclusive ownership of a state path.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use stepsync_common::{Error, Result};

/// Advisory lock on `<state>.lock`, held for as long as a store is open.
///
/// A store keeps its snapshot in memory between saves, so a second writer
/// on the same path would overwrite the other's queue on its next save.
/// The lock makes the second open fail instead.
#[derive(Debug)]
pub struct StateLock {
    _file: File,
    path: PathBuf,
}

impl StateLock {
    /// Take the lock for a state path without waiting.
    ///
    /// # Errors
    /// - `Locked` if another open store holds it
    /// - `Io` if the lock file cannot be opened
    pub fn acquire(state_path: &Path) -> Result<Self> {
        let path = lock_path(state_path);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { _file: file, path }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(Error::Locked(
                state_path.display().to_string(),
            )),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_path(state_path: &Path) -> PathBuf {
    let mut name = state_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "state".into());
    name.push(".lock");
    state_path.with_file_name(name)
}
