//! Linked-product ledger backed by a JSON linking map
//!
//! The linking pipeline downstream of the crawl writes a JSON object
//! mapping supplier product identifiers to their marketplace link records.
//! For retention purposes only the keys matter: an identifier present in
//! the map has been consumed and its cache entry is safe to purge.
//!
//! The ledger is a constructed dependency with an explicit [`reload`];
//! nothing here is process-global.
//!
//! [`reload`]: LinkedProductLedger::reload

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::domain::services::ProcessedLedger;

/// Errors raised while loading the linking map.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to read ledger file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("ledger file {path} is not a JSON object keyed by product id")]
    NotAnObject { path: PathBuf },
}

/// In-memory set of already-linked product identifiers, refreshable from
/// its backing file.
#[derive(Debug)]
pub struct LinkedProductLedger {
    path: PathBuf,
    ids: RwLock<HashSet<String>>,
}

impl LinkedProductLedger {
    /// Loads the ledger from `path`.
    ///
    /// A missing file yields an empty ledger (a fresh run has linked
    /// nothing yet); unreadable or malformed content is an error so the
    /// caller can decide whether to run retention without usage data.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let ids = read_ids(&path).await?;
        info!("Loaded linked-product ledger: {} entries from {:?}", ids.len(), path);
        Ok(Self {
            path,
            ids: RwLock::new(ids),
        })
    }

    /// Re-reads the backing file, replacing the in-memory set. Returns the
    /// new entry count.
    pub async fn reload(&self) -> Result<usize, LedgerError> {
        let ids = read_ids(&self.path).await?;
        let count = ids.len();
        *self.ids.write().unwrap_or_else(PoisonError::into_inner) = ids;
        info!("🔄 Reloaded linked-product ledger: {} entries", count);
        Ok(count)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProcessedLedger for LinkedProductLedger {
    fn is_processed(&self, identity: &str) -> bool {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(identity)
    }

    fn len(&self) -> usize {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

async fn read_ids(path: &Path) -> Result<HashSet<String>, LedgerError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Ledger file {:?} not found, starting with an empty ledger", path);
            return Ok(HashSet::new());
        }
        Err(source) => {
            return Err(LedgerError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|source| LedgerError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    match value {
        serde_json::Value::Object(map) => Ok(map.keys().cloned().collect()),
        _ => Err(LedgerError::NotAnObject {
            path: path.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn loads_keys_of_the_linking_map() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.json");
        std::fs::write(
            &path,
            r#"{"prod-1": {"listing": "m-77"}, "prod-2": {"listing": "m-78"}}"#,
        )
        .unwrap();

        let ledger = LinkedProductLedger::load(&path).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.is_processed("prod-1"));
        assert!(!ledger.is_processed("prod-9"));
    }

    #[tokio::test]
    async fn missing_file_means_empty_ledger() {
        let dir = TempDir::new().unwrap();
        let ledger = LinkedProductLedger::load(dir.path().join("absent.json"))
            .await
            .unwrap();
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn malformed_ledger_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.json");
        std::fs::write(&path, r#"["prod-1", "prod-2"]"#).unwrap();

        let result = LinkedProductLedger::load(&path).await;
        assert!(matches!(result, Err(LedgerError::NotAnObject { .. })));
    }

    #[test]
    fn ledger_serves_trait_object_callers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.json");
        std::fs::write(&path, r#"{"prod-1": {"listing": "m-77"}}"#).unwrap();

        let loaded = tokio_test::block_on(LinkedProductLedger::load(&path)).unwrap();
        let ledger: Arc<dyn ProcessedLedger> = Arc::new(loaded);

        assert_eq!(ledger.len(), 1);
        assert!(!ledger.is_empty());
        assert!(ledger.is_processed("prod-1"));
    }

    #[tokio::test]
    async fn reload_picks_up_new_links() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.json");
        std::fs::write(&path, r#"{"prod-1": {}}"#).unwrap();

        let ledger = LinkedProductLedger::load(&path).await.unwrap();
        assert!(!ledger.is_processed("prod-2"));

        std::fs::write(&path, r#"{"prod-1": {}, "prod-2": {}}"#).unwrap();
        let count = ledger.reload().await.unwrap();
        assert_eq!(count, 2);
        assert!(ledger.is_processed("prod-2"));
    }
}
