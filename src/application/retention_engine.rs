//! Cache retention engine
//!
//! Applies per-cache retention policies to the on-disk caches: scanning,
//! planning through the pure domain planners, then deleting or archiving.
//! Caches are cleared concurrently but each cache is serialized behind its
//! own lock, and one cache's failure never aborts the others.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::retention::{
    CacheInfo, CachePolicy, ClearingResult, RetentionStrategyKind, ValidationResult, archive_plan,
    lru_eviction_plan, ttl_expirations, usage_aware_plan,
};
use crate::domain::services::ProcessedLedger;
use crate::infrastructure::cache_storage::{
    archive_entries, cache_info, remove_entries, scan_cache, sweep_stale_temp_files,
    validate_entries,
};
use crate::infrastructure::config::RetentionConfig;

struct CacheDefinition {
    policy: CachePolicy,
    path: PathBuf,

    /// Serializes clearing per cache; concurrent sweeps across different
    /// caches stay allowed.
    lock: Mutex<()>,
}

/// Retention engine over a set of named caches.
pub struct CacheRetentionEngine {
    caches: HashMap<String, CacheDefinition>,
    ledger: Option<Arc<dyn ProcessedLedger>>,
    stale_temp_max_age_hours: i64,
}

impl CacheRetentionEngine {
    /// Builds an engine from configuration, placing each configured cache
    /// under `cache_root/<cache_type>`.
    ///
    /// The ledger is optional; without one the usage-aware strategy falls
    /// back to TTL clearing at sweep time.
    #[must_use]
    pub fn new(
        config: &RetentionConfig,
        cache_root: &Path,
        ledger: Option<Arc<dyn ProcessedLedger>>,
    ) -> Self {
        let mut engine = Self {
            caches: HashMap::new(),
            ledger,
            stale_temp_max_age_hours: config.stale_temp_max_age_hours,
        };
        for (cache_type, policy) in &config.caches {
            engine.register_cache(cache_type, cache_root.join(cache_type), policy.clone());
        }
        engine
    }

    /// Registers (or replaces) a cache definition.
    pub fn register_cache(&mut self, cache_type: &str, path: impl Into<PathBuf>, policy: CachePolicy) {
        let path = path.into();
        debug!(
            "Registered cache '{}' ({}) at {:?}",
            cache_type, policy.strategy, path
        );
        self.caches.insert(
            cache_type.to_string(),
            CacheDefinition {
                policy,
                path,
                lock: Mutex::new(()),
            },
        );
    }

    /// Registered cache names, sorted.
    #[must_use]
    pub fn cache_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Clears one cache according to its policy (or an explicit strategy
    /// override).
    ///
    /// Always returns a result: an unknown cache type, scan problems and
    /// per-entry failures are carried in `errors` rather than raised. A
    /// cache whose policy sees nothing to do yields a zero-effect result.
    pub async fn clear_cache(
        &self,
        cache_type: &str,
        strategy_override: Option<RetentionStrategyKind>,
    ) -> ClearingResult {
        let started = Instant::now();

        let Some(cache) = self.caches.get(cache_type) else {
            warn!("⚠️  Clear requested for unknown cache type: {}", cache_type);
            return ClearingResult {
                cache_type: cache_type.to_string(),
                strategy_used: strategy_override.unwrap_or(RetentionStrategyKind::Ttl),
                files_removed: 0,
                bytes_freed: 0,
                errors: vec![format!("unknown cache type: {cache_type}")],
                duration: started.elapsed(),
            };
        };
        let strategy = strategy_override.unwrap_or(cache.policy.strategy);

        let _guard = cache.lock.lock().await;

        let mut scan = scan_cache(&cache.path, self.stale_temp_max_age_hours).await;
        let mut errors = std::mem::take(&mut scan.errors);
        errors.extend(sweep_stale_temp_files(&scan.stale_temp_files).await);

        let now = Utc::now();
        let info = cache_info(cache_type, &cache.path, &scan.entries, now);
        if !cache.policy.should_clear_as(strategy, &info) {
            debug!("Cache '{}' needs no {} clearing", cache_type, strategy);
            return ClearingResult::no_effect(cache_type, strategy, started.elapsed(), errors);
        }

        let plan = match strategy {
            RetentionStrategyKind::Ttl => {
                ttl_expirations(&scan.entries, cache.policy.ttl_hours, now)
            }
            RetentionStrategyKind::SizeLru => {
                lru_eviction_plan(&scan.entries, cache.policy.max_size_mb * 1024 * 1024)
            }
            RetentionStrategyKind::UsageAware => match &self.ledger {
                Some(ledger) => usage_aware_plan(&scan.entries, ledger.as_ref()),
                None => {
                    warn!(
                        "⚠️  No ledger available for cache '{}', falling back to TTL clearing",
                        cache_type
                    );
                    ttl_expirations(&scan.entries, cache.policy.ttl_hours, now)
                }
            },
            RetentionStrategyKind::Archive => {
                archive_plan(&scan.entries, cache.policy.archive_after_days, now)
            }
        };

        if plan.is_empty() {
            return ClearingResult::no_effect(cache_type, strategy, started.elapsed(), errors);
        }

        let (files_removed, bytes_freed, mut op_errors) =
            if strategy == RetentionStrategyKind::Archive {
                archive_entries(&cache.path, &plan).await
            } else {
                remove_entries(&plan).await
            };
        errors.append(&mut op_errors);

        info!(
            "🧹 Cleared cache '{}' via {}: {} entries removed, {} bytes freed",
            cache_type, strategy, files_removed, bytes_freed
        );

        ClearingResult {
            cache_type: cache_type.to_string(),
            strategy_used: strategy,
            files_removed,
            bytes_freed,
            errors,
            duration: started.elapsed(),
        }
    }

    /// Clears several caches concurrently.
    ///
    /// `cache_types` selects a subset; `None` sweeps everything
    /// registered. Unknown names are reported in their own result entry,
    /// and a failing cache never stops its siblings.
    pub async fn clear_all(
        &self,
        strategy_override: Option<RetentionStrategyKind>,
        cache_types: Option<&[String]>,
    ) -> HashMap<String, ClearingResult> {
        let targets: Vec<String> = match cache_types {
            Some(names) => names.to_vec(),
            None => self.cache_types(),
        };
        info!("🧹 Clearing {} cache(s)", targets.len());

        let sweeps = targets.into_iter().map(|name| async move {
            let result = self.clear_cache(&name, strategy_override).await;
            (name, result)
        });
        join_all(sweeps).await.into_iter().collect()
    }

    /// Structural validation of one cache's entries. Advisory only;
    /// nothing is deleted.
    pub async fn validate_cache(&self, cache_type: &str) -> Vec<ValidationResult> {
        let Some(cache) = self.caches.get(cache_type) else {
            warn!("⚠️  Validation requested for unknown cache type: {}", cache_type);
            return Vec::new();
        };
        validate_entries(
            &cache.path,
            &cache.policy.required_fields,
            self.stale_temp_max_age_hours,
        )
        .await
    }

    /// Aggregate info for every registered cache, sorted by name.
    pub async fn overview(&self) -> Vec<CacheInfo> {
        let now = Utc::now();
        let mut infos = join_all(self.caches.iter().map(|(cache_type, cache)| async move {
            let scan = scan_cache(&cache.path, self.stale_temp_max_age_hours).await;
            cache_info(cache_type, &cache.path, &scan.entries, now)
        }))
        .await;
        infos.sort_by(|a, b| a.cache_type.cmp(&b.cache_type));
        infos
    }
}
