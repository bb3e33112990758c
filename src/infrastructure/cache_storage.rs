//! Cache directory scanning and entry removal
//!
//! Producers write cache entries through a temp-plus-rename discipline, so
//! everything ending in `.tmp` is either in-flight or a leftover from a
//! crashed writer. The scanner never treats temp files as entries; temp
//! files past a configured age are collected for a separate sweep.
//!
//! Entry age prefers the `cached_at` timestamp embedded in the JSON
//! document over filesystem mtime, so TTL decisions survive file copies
//! and restores. LRU recency always uses mtime.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, warn};

use crate::domain::retention::{CacheEntrySnapshot, CacheInfo, ValidationResult};

/// Everything a directory scan learned about one cache.
#[derive(Debug, Default)]
pub struct CacheScan {
    pub entries: Vec<CacheEntrySnapshot>,

    /// Temp files older than the configured threshold, left by writers
    /// that died mid-write.
    pub stale_temp_files: Vec<PathBuf>,

    pub errors: Vec<String>,
}

/// Scans one cache directory into entry snapshots.
///
/// A missing directory is an empty cache, not an error. Subdirectories
/// (including `archive/`) are never descended into.
pub async fn scan_cache(path: &Path, stale_temp_max_age_hours: i64) -> CacheScan {
    let mut scan = CacheScan::default();
    let now = Utc::now();

    let mut dir = match fs::read_dir(path).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return scan,
        Err(e) => {
            scan.errors.push(format!("failed to read cache dir {path:?}: {e}"));
            return scan;
        }
    };

    loop {
        let dir_entry = match dir.next_entry().await {
            Ok(Some(dir_entry)) => dir_entry,
            Ok(None) => break,
            Err(e) => {
                scan.errors.push(format!("failed to iterate cache dir {path:?}: {e}"));
                break;
            }
        };

        let entry_path = dir_entry.path();
        let metadata = match dir_entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                scan.errors
                    .push(format!("failed to stat {entry_path:?}: {e}"));
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let modified: DateTime<Utc> = metadata
            .modified()
            .map_or_else(|_| now, DateTime::<Utc>::from);

        if entry_path.extension().is_some_and(|ext| ext == "tmp") {
            if (now - modified).num_hours() >= stale_temp_max_age_hours {
                scan.stale_temp_files.push(entry_path);
            }
            continue;
        }

        let identity = entry_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();

        let cached_at = embedded_timestamp(&entry_path)
            .await
            .unwrap_or(modified);

        scan.entries.push(CacheEntrySnapshot {
            path: entry_path,
            identity,
            size_bytes: metadata.len(),
            cached_at,
            last_access: modified,
        });
    }

    scan
}

/// Pulls the `cached_at` field out of a JSON entry, if it has one.
async fn embedded_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    if !path.extension().is_some_and(|ext| ext == "json") {
        return None;
    }
    let content = fs::read_to_string(path).await.ok()?;
    let value: serde_json::Value = serde_json::from_str(&content).ok()?;
    let stamp = value.get("cached_at")?.as_str()?;
    DateTime::parse_from_rfc3339(stamp)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Aggregates a scan into the cache-level view used by eligibility checks.
#[must_use]
pub fn cache_info(
    cache_type: &str,
    path: &Path,
    entries: &[CacheEntrySnapshot],
    now: DateTime<Utc>,
) -> CacheInfo {
    CacheInfo {
        cache_type: cache_type.to_string(),
        path: path.to_path_buf(),
        total_size_bytes: entries.iter().map(|entry| entry.size_bytes).sum(),
        file_count: entries.len(),
        oldest_entry_age_hours: entries.iter().map(|entry| entry.age_hours(now)).max(),
        newest_entry_at: entries.iter().map(|entry| entry.cached_at).max(),
    }
}

/// Deletes the planned entries, accounting per file and capturing failures
/// instead of aborting.
pub async fn remove_entries(plan: &[CacheEntrySnapshot]) -> (usize, u64, Vec<String>) {
    let mut removed = 0;
    let mut freed = 0;
    let mut errors = Vec::new();

    for entry in plan {
        match fs::remove_file(&entry.path).await {
            Ok(()) => {
                removed += 1;
                freed += entry.size_bytes;
                debug!("Removed cache entry {:?}", entry.path);
            }
            Err(e) => errors.push(format!("failed to remove {:?}: {e}", entry.path)),
        }
    }

    (removed, freed, errors)
}

/// Moves the planned entries into `<cache>/archive/`, preserving them for
/// audit while shrinking the active working set.
pub async fn archive_entries(
    cache_dir: &Path,
    plan: &[CacheEntrySnapshot],
) -> (usize, u64, Vec<String>) {
    let mut archived = 0;
    let mut freed = 0;
    let mut errors = Vec::new();

    if plan.is_empty() {
        return (archived, freed, errors);
    }

    let archive_dir = cache_dir.join("archive");
    if let Err(e) = fs::create_dir_all(&archive_dir).await {
        errors.push(format!("failed to create archive dir {archive_dir:?}: {e}"));
        return (archived, freed, errors);
    }

    for entry in plan {
        let Some(file_name) = entry.path.file_name() else {
            errors.push(format!("entry without a file name: {:?}", entry.path));
            continue;
        };
        let target = archive_dir.join(file_name);
        match fs::rename(&entry.path, &target).await {
            Ok(()) => {
                archived += 1;
                freed += entry.size_bytes;
                debug!("Archived cache entry {:?} -> {:?}", entry.path, target);
            }
            Err(e) => errors.push(format!("failed to archive {:?}: {e}", entry.path)),
        }
    }

    (archived, freed, errors)
}

/// Deletes leftover temp files from crashed writers.
pub async fn sweep_stale_temp_files(files: &[PathBuf]) -> Vec<String> {
    let mut errors = Vec::new();
    for path in files {
        match fs::remove_file(path).await {
            Ok(()) => warn!("🧹 Removed stale temp file {:?}", path),
            Err(e) => errors.push(format!("failed to remove stale temp file {path:?}: {e}")),
        }
    }
    errors
}

/// Checks structural well-formedness of every entry in a cache.
///
/// Advisory only: nothing is deleted. Errors mark an entry unusable
/// (empty, unparseable, missing a required field); warnings flag oddities
/// worth looking at (non-object documents, stale temp files).
pub async fn validate_entries(
    path: &Path,
    required_fields: &[String],
    stale_temp_max_age_hours: i64,
) -> Vec<ValidationResult> {
    let scan = scan_cache(path, stale_temp_max_age_hours).await;
    let mut results = Vec::new();

    for temp_path in &scan.stale_temp_files {
        let mut result = ValidationResult::valid(temp_path.clone());
        result
            .warnings
            .push("stale temp file left by an interrupted writer".to_string());
        results.push(result);
    }

    for entry in &scan.entries {
        let mut result = ValidationResult::valid(entry.path.clone());

        if entry.size_bytes == 0 {
            result.is_valid = false;
            result.errors.push("entry file is empty".to_string());
            results.push(result);
            continue;
        }

        let content = match fs::read_to_string(&entry.path).await {
            Ok(content) => content,
            Err(e) => {
                result.is_valid = false;
                result.errors.push(format!("entry is unreadable: {e}"));
                results.push(result);
                continue;
            }
        };

        match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(serde_json::Value::Object(object)) => {
                for field in required_fields {
                    if !object.contains_key(field) {
                        result.is_valid = false;
                        result
                            .errors
                            .push(format!("missing required field `{field}`"));
                    }
                }
            }
            Ok(_) => {
                result
                    .warnings
                    .push("entry is valid JSON but not an object".to_string());
            }
            Err(e) => {
                result.is_valid = false;
                result.errors.push(format!("invalid JSON: {e}"));
            }
        }

        results.push(result);
    }

    results
}
