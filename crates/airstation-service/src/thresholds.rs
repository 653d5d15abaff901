//! TOML file backend for threshold preferences.
//!
//! The thresholds live apart from `server.toml` so they can be rewritten by
//! `PUT /api/thresholds` without touching the server configuration.
//!
//! ```toml
//! pm25_threshold = 35.0
//! co_threshold = 50.0
//! notifications_enabled = true
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use airstation_core::{Error, PreferencesBackend, Result, ThresholdConfig};

/// Stores [`ThresholdConfig`] as a TOML file.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PreferencesBackend for FileBackend {
    async fn load(&self) -> Result<Option<ThresholdConfig>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No thresholds file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::Preferences(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        toml::from_str(&content).map(Some).map_err(|e| {
            Error::Preferences(format!("failed to parse {}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, config: &ThresholdConfig) -> Result<()> {
        let content = toml::to_string_pretty(config)
            .map_err(|e| Error::Preferences(format!("failed to serialize thresholds: {}", e)))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Preferences(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        // Stage and rename; readers never see a partial file.
        let staging = self.path.with_extension("toml.tmp");
        tokio::fs::write(&staging, content).await.map_err(|e| {
            Error::Preferences(format!("failed to write {}: {}", staging.display(), e))
        })?;
        tokio::fs::rename(&staging, &self.path).await.map_err(|e| {
            Error::Preferences(format!("failed to replace {}: {}", self.path.display(), e))
        })?;

        debug!("Saved thresholds to {}", self.path.display());
        Ok(())
    }
}
