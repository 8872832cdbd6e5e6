//! Client configuration: JSON file, then command-line overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use stepsync_sync::SyncConfig;

/// Server used when none is configured.
pub const DEFAULT_API_URL: &str = "https://passosemdoge.onrender.com";

/// Everything the CLI needs to build a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the remote authority.
    pub api_url: String,
    /// Where state and outbox are persisted. `.db`/`.sqlite` selects SQLite.
    pub state_path: PathBuf,
    /// PIN accepted when the server cannot be reached.
    pub offline_pin: Option<String>,
    pub sync: SyncConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            state_path: default_state_path(),
            offline_pin: None,
            sync: SyncConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load from a JSON file, or use defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Apply command-line overrides on top of file values.
    pub fn with_overrides(mut self, api_url: Option<String>, state_path: Option<PathBuf>) -> Self {
        if let Some(api_url) = api_url {
            self.api_url = api_url;
        }
        if let Some(state_path) = state_path {
            self.state_path = state_path;
        }
        self
    }
}

fn default_state_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stepsync")
        .join("state.json")
}
