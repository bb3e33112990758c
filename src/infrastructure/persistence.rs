//! Atomic JSON persistence with timestamped backups
//!
//! State files are written through a temp-file-plus-rename step so a crash
//! mid-write never leaves a half-written document behind. Before each
//! overwrite the previous file is copied into `backups/` under a
//! timestamped name; backups are pruned newest-first to a configured count.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("{path} contains invalid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// File-backed store for JSON-serializable state documents.
#[derive(Debug, Clone)]
pub struct PersistenceLayer {
    root: PathBuf,
    max_backups: usize,
}

impl PersistenceLayer {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, max_backups: usize) -> Self {
        Self {
            root: root.into(),
            max_backups,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a state file name.
    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    #[must_use]
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Creates the state and backup directories if missing.
    pub async fn ensure_dirs(&self) -> Result<(), PersistenceError> {
        for dir in [self.root.clone(), self.backups_dir()] {
            if !dir.exists() {
                fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| io_err(&dir, e))?;
                info!("📁 Created state directory: {:?}", dir);
            }
        }
        Ok(())
    }

    /// Reads and deserializes a state file.
    ///
    /// Returns `Ok(None)` when the file does not exist yet. Unparseable
    /// content is reported as [`PersistenceError::Corrupt`] so the caller
    /// can decide between quarantine and hard failure.
    pub async fn load_json<T: DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<Option<T>, PersistenceError> {
        let path = self.file_path(name);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };

        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(source) => Err(PersistenceError::Corrupt { path, source }),
        }
    }

    /// Serializes and atomically replaces a state file.
    ///
    /// The existing file, if any, is first copied into `backups/` with a
    /// timestamp; the new content goes to a sibling temp file and is
    /// renamed over the target in one step.
    pub async fn save_json<T: Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<(), PersistenceError> {
        self.ensure_dirs().await?;

        let path = self.file_path(name);
        let content = serde_json::to_string_pretty(value).map_err(PersistenceError::Serialize)?;

        if path.exists() {
            self.backup_existing(&path).await;
        }

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .await
            .map_err(|e| io_err(&tmp_path, e))?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| io_err(&path, e))?;

        debug!("Saved state to {:?}", path);
        self.prune_backups(name).await;
        Ok(())
    }

    /// Moves an unreadable state file aside so a fresh one can take its
    /// place, keeping the bad content for manual inspection.
    pub async fn quarantine(&self, name: &str) -> Result<Option<PathBuf>, PersistenceError> {
        let path = self.file_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let quarantine_path = path.with_extension("json.corrupted");
        fs::rename(&path, &quarantine_path)
            .await
            .map_err(|e| io_err(&path, e))?;
        warn!("⚠️  Quarantined corrupted state file to {:?}", quarantine_path);
        Ok(Some(quarantine_path))
    }

    /// Copies the current file into the backups directory. Backup failures
    /// are logged and swallowed; they must not block the save itself.
    async fn backup_existing(&self, path: &Path) {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("state");
        let backup_name = format!("{}.{}.json", stem, chrono::Utc::now().format("%Y%m%dT%H%M%S"));
        let backup_path = self.backups_dir().join(backup_name);

        if let Err(e) = fs::copy(path, &backup_path).await {
            warn!("Failed to back up {:?} before overwrite: {}", path, e);
        } else {
            debug!("Backed up previous state to {:?}", backup_path);
        }
    }

    /// Removes the oldest backups of `name` beyond `max_backups`.
    async fn prune_backups(&self, name: &str) {
        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("state")
            .to_string();
        let prefix = format!("{stem}.");

        let mut backups = Vec::new();
        let Ok(mut dir) = fs::read_dir(self.backups_dir()).await else {
            return;
        };
        while let Ok(Some(dir_entry)) = dir.next_entry().await {
            let path = dir_entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.starts_with(&prefix) || !file_name.ends_with(".json") {
                continue;
            }
            if let Ok(metadata) = dir_entry.metadata().await {
                if let Ok(modified) = metadata.modified() {
                    backups.push((path, modified));
                }
            }
        }

        // Newest first, drop everything past the retention count.
        backups.sort_by(|a, b| b.1.cmp(&a.1));
        for (path, _) in backups.iter().skip(self.max_backups) {
            if let Err(e) = fs::remove_file(path).await {
                warn!("Failed to remove old backup {:?}: {}", path, e);
            } else {
                debug!("Removed old backup: {:?}", path);
            }
        }
    }
}
