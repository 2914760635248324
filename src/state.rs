//! Lifecycle state kept between charm invocations
//!
//! Each lifecycle event runs as a separate process, so whatever one event
//! learns that a later one needs (was install ever completed, did start
//! ever run, which agent version was pinned) lives in `state.toml` under
//! the layout's state directory.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const STATE_FILE: &str = "state.toml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct StoredState {
    /// Install completed at least once
    #[serde(default)]
    pub installed: bool,

    /// Start ran after install; config changes restart the agent only then
    #[serde(default)]
    pub init_started: bool,

    /// Version pinned by the last successful upgrade
    #[serde(default)]
    pub agent_version: Option<String>,

    /// Last time the state was written
    pub updated_at: DateTime<Utc>,
}

impl Default for StoredState {
    fn default() -> Self {
        Self {
            installed: false,
            init_started: false,
            agent_version: None,
            updated_at: Utc::now(),
        }
    }
}

impl StoredState {
    /// Path of the state file inside `dir`
    pub fn file(dir: &Path) -> PathBuf {
        dir.join(STATE_FILE)
    }

    /// Load state from `dir`, or the default if there is none yet
    pub fn load(dir: &Path) -> Result<Self> {
        let path = Self::file(dir);

        if !path.exists() {
            log::debug!("State file does not exist, using default state");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;

        let state: StoredState = toml::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        log::debug!("Loaded state from {}", path.display());
        Ok(state)
    }

    /// Stamp and write state to `dir`
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;

        self.updated_at = Utc::now();
        let path = Self::file(dir);
        let content = toml::to_string_pretty(self).context("Failed to serialize state")?;

        fs::write(&path, content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;

        log::debug!("Saved state to {}", path.display());
        Ok(())
    }

    /// Forget everything; the directory goes too if nothing else is in it
    pub fn delete(dir: &Path) -> Result<()> {
        let path = Self::file(dir);
        match fs::remove_file(&path) {
            Ok(()) => log::debug!("Deleted state file {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to delete state file: {}", path.display()));
            }
        }

        if fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none()) {
            let _ = fs::remove_dir(dir);
        }
        Ok(())
    }
}
