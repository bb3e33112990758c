//! Cache retention model and eviction planning
//!
//! Defines the closed set of retention strategies, per-cache policies, and
//! the value objects returned by clearing and validation. The planners here
//! are pure functions over entry snapshots so eviction order and TTL rules
//! can be tested without touching a filesystem; scanning and removal live
//! in the infrastructure layer.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::services::ProcessedLedger;

/// TTL value marking a cache as permanent. Not "a very large number":
/// permanent caches are skipped outright by TTL-based clearing.
pub const PERMANENT_TTL_HOURS: i64 = -1;

/// Closed set of retention strategies.
///
/// Selected per cache by configuration at construction time; every
/// consumer matches exhaustively.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RetentionStrategyKind {
    /// Remove entries older than the configured TTL.
    Ttl,
    /// Evict oldest-accessed entries until the cache fits its size budget.
    SizeLru,
    /// Remove only entries whose identity the processed ledger already
    /// contains.
    UsageAware,
    /// Move entries past the retention horizon into an archive directory
    /// instead of deleting them.
    Archive,
}

impl RetentionStrategyKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ttl => "ttl",
            Self::SizeLru => "size_lru",
            Self::UsageAware => "usage_aware",
            Self::Archive => "archive",
        }
    }
}

impl std::fmt::Display for RetentionStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Retention policy for one named cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePolicy {
    pub strategy: RetentionStrategyKind,

    /// Entry age limit in hours; [`PERMANENT_TTL_HOURS`] disables
    /// TTL-based clearing entirely.
    pub ttl_hours: i64,

    /// Size budget for the size-bound strategy.
    pub max_size_mb: u64,

    /// Retention horizon for the archive strategy.
    pub archive_after_days: u32,

    /// Top-level JSON fields every entry of this cache must carry;
    /// checked by validation only.
    #[serde(default)]
    pub required_fields: Vec<String>,
}

impl CachePolicy {
    /// Whether this cache may never be cleared by age.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.ttl_hours == PERMANENT_TTL_HOURS
    }

    /// Cheap eligibility check against aggregate cache info, evaluated
    /// before any per-entry planning.
    #[must_use]
    pub fn should_clear(&self, info: &CacheInfo) -> bool {
        self.should_clear_as(self.strategy, info)
    }

    /// Eligibility check for an explicit strategy (used when an override
    /// is applied to a sweep).
    #[must_use]
    pub fn should_clear_as(&self, strategy: RetentionStrategyKind, info: &CacheInfo) -> bool {
        if info.file_count == 0 {
            return false;
        }
        match strategy {
            RetentionStrategyKind::Ttl => {
                !self.is_permanent()
                    && info
                        .oldest_entry_age_hours
                        .is_some_and(|age| age > self.ttl_hours)
            }
            RetentionStrategyKind::SizeLru => {
                info.total_size_bytes > self.max_size_mb * 1024 * 1024
            }
            // Eligibility depends on the ledger contents, which the
            // planner consults entry by entry.
            RetentionStrategyKind::UsageAware => true,
            RetentionStrategyKind::Archive => info
                .oldest_entry_age_hours
                .is_some_and(|age| age > i64::from(self.archive_after_days) * 24),
        }
    }
}

/// Aggregate view of one cache, computed from a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheInfo {
    pub cache_type: String,
    pub path: PathBuf,
    pub total_size_bytes: u64,
    pub file_count: usize,
    pub oldest_entry_age_hours: Option<i64>,
    pub newest_entry_at: Option<DateTime<Utc>>,
}

/// One cache entry as observed by a directory scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntrySnapshot {
    pub path: PathBuf,

    /// Content identity, the supplier product identifier the entry was
    /// written under.
    pub identity: String,

    pub size_bytes: u64,

    /// When the entry's content was produced. Sourced from the embedded
    /// `cached_at` field when present so age survives file copies; file
    /// mtime otherwise.
    pub cached_at: DateTime<Utc>,

    /// Recency for LRU ordering (file mtime).
    pub last_access: DateTime<Utc>,
}

impl CacheEntrySnapshot {
    /// Entry age in whole hours at `now`.
    #[must_use]
    pub fn age_hours(&self, now: DateTime<Utc>) -> i64 {
        (now - self.cached_at).num_hours()
    }
}

/// Outcome of clearing one cache. Produced fresh per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearingResult {
    pub cache_type: String,
    pub strategy_used: RetentionStrategyKind,

    /// Entries removed from the active working set (archived entries
    /// count here too).
    pub files_removed: usize,
    pub bytes_freed: u64,

    pub errors: Vec<String>,
    pub duration: Duration,
}

impl ClearingResult {
    /// A successful sweep that found nothing to do.
    #[must_use]
    pub fn no_effect(
        cache_type: &str,
        strategy: RetentionStrategyKind,
        duration: Duration,
        errors: Vec<String>,
    ) -> Self {
        Self {
            cache_type: cache_type.to_string(),
            strategy_used: strategy,
            files_removed: 0,
            bytes_freed: 0,
            errors,
            duration,
        }
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Structural health report for one cache entry. Purely advisory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub entry_path: PathBuf,
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    #[must_use]
    pub fn valid(entry_path: PathBuf) -> Self {
        Self {
            entry_path,
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Entries older than `ttl_hours` at `now`. Empty for a permanent TTL.
#[must_use]
pub fn ttl_expirations(
    entries: &[CacheEntrySnapshot],
    ttl_hours: i64,
    now: DateTime<Utc>,
) -> Vec<CacheEntrySnapshot> {
    if ttl_hours == PERMANENT_TTL_HOURS {
        return Vec::new();
    }
    entries
        .iter()
        .filter(|entry| entry.age_hours(now) > ttl_hours)
        .cloned()
        .collect()
}

/// Minimal oldest-first eviction prefix bringing the cache under
/// `max_size_bytes`.
///
/// Entries are ordered by ascending last access; selection stops as soon
/// as the remaining size fits the budget, even mid-list.
#[must_use]
pub fn lru_eviction_plan(
    entries: &[CacheEntrySnapshot],
    max_size_bytes: u64,
) -> Vec<CacheEntrySnapshot> {
    let total: u64 = entries.iter().map(|entry| entry.size_bytes).sum();
    if total <= max_size_bytes {
        return Vec::new();
    }

    let mut by_recency: Vec<&CacheEntrySnapshot> = entries.iter().collect();
    by_recency.sort_by_key(|entry| entry.last_access);

    let mut plan = Vec::new();
    let mut remaining = total;
    for entry in by_recency {
        if remaining <= max_size_bytes {
            break;
        }
        remaining -= entry.size_bytes;
        plan.push(entry.clone());
    }
    plan
}

/// Entries whose identity the ledger already recorded as processed.
#[must_use]
pub fn usage_aware_plan(
    entries: &[CacheEntrySnapshot],
    ledger: &dyn ProcessedLedger,
) -> Vec<CacheEntrySnapshot> {
    entries
        .iter()
        .filter(|entry| ledger.is_processed(&entry.identity))
        .cloned()
        .collect()
}

/// Entries past the archive retention horizon at `now`.
#[must_use]
pub fn archive_plan(
    entries: &[CacheEntrySnapshot],
    archive_after_days: u32,
    now: DateTime<Utc>,
) -> Vec<CacheEntrySnapshot> {
    let horizon_hours = i64::from(archive_after_days) * 24;
    entries
        .iter()
        .filter(|entry| entry.age_hours(now) > horizon_hours)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct FixedLedger(HashSet<String>);

    impl ProcessedLedger for FixedLedger {
        fn is_processed(&self, identity: &str) -> bool {
            self.0.contains(identity)
        }

        fn len(&self) -> usize {
            self.0.len()
        }
    }

    fn entry(identity: &str, size: u64, age_hours: i64) -> CacheEntrySnapshot {
        let then = Utc::now() - chrono::Duration::hours(age_hours);
        CacheEntrySnapshot {
            path: PathBuf::from(format!("/cache/{identity}.json")),
            identity: identity.to_string(),
            size_bytes: size,
            cached_at: then,
            last_access: then,
        }
    }

    #[test]
    fn ttl_plan_selects_only_expired_entries() {
        let entries = vec![entry("old", 100, 400), entry("fresh", 100, 100)];
        let plan = ttl_expirations(&entries, 336, Utc::now());

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].identity, "old");
    }

    #[test]
    fn permanent_ttl_never_expires_anything() {
        let entries = vec![entry("ancient", 100, 24 * 365 * 10)];
        assert!(ttl_expirations(&entries, PERMANENT_TTL_HOURS, Utc::now()).is_empty());
    }

    #[test]
    fn lru_plan_is_minimal_oldest_first_prefix() {
        // Total 600 bytes against a 250-byte budget: the two oldest
        // entries (350 bytes) are exactly enough.
        let entries = vec![
            entry("oldest", 200, 30),
            entry("older", 150, 20),
            entry("newer", 150, 10),
            entry("newest", 100, 1),
        ];
        let plan = lru_eviction_plan(&entries, 250);

        let identities: Vec<&str> = plan.iter().map(|e| e.identity.as_str()).collect();
        assert_eq!(identities, vec!["oldest", "older"]);
    }

    #[test]
    fn lru_plan_is_empty_within_budget() {
        let entries = vec![entry("a", 100, 5), entry("b", 100, 3)];
        assert!(lru_eviction_plan(&entries, 200).is_empty());
    }

    #[test]
    fn usage_aware_plan_follows_the_ledger() {
        let entries = vec![entry("linked", 10, 1), entry("pending", 10, 1)];
        let ledger = FixedLedger(HashSet::from(["linked".to_string()]));

        let plan = usage_aware_plan(&entries, &ledger);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].identity, "linked");
    }

    #[test]
    fn archive_plan_uses_day_horizon() {
        let entries = vec![entry("stale", 10, 31 * 24), entry("recent", 10, 29 * 24)];
        let plan = archive_plan(&entries, 30, Utc::now());

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].identity, "stale");
    }

    #[test]
    fn should_clear_respects_the_permanent_sentinel() {
        let policy = CachePolicy {
            strategy: RetentionStrategyKind::Ttl,
            ttl_hours: PERMANENT_TTL_HOURS,
            max_size_mb: 500,
            archive_after_days: 30,
            required_fields: Vec::new(),
        };
        let info = CacheInfo {
            cache_type: "pages".to_string(),
            path: PathBuf::from("/cache/pages"),
            total_size_bytes: 10_000,
            file_count: 5,
            oldest_entry_age_hours: Some(9_999),
            newest_entry_at: Some(Utc::now()),
        };

        assert!(!policy.should_clear(&info));
    }

    #[test]
    fn should_clear_size_bound_compares_budget() {
        let policy = CachePolicy {
            strategy: RetentionStrategyKind::SizeLru,
            ttl_hours: 336,
            max_size_mb: 1,
            archive_after_days: 30,
            required_fields: Vec::new(),
        };
        let mut info = CacheInfo {
            cache_type: "images".to_string(),
            path: PathBuf::from("/cache/images"),
            total_size_bytes: 2 * 1024 * 1024,
            file_count: 3,
            oldest_entry_age_hours: Some(1),
            newest_entry_at: Some(Utc::now()),
        };

        assert!(policy.should_clear(&info));
        info.total_size_bytes = 512 * 1024;
        assert!(!policy.should_clear(&info));
    }
}
