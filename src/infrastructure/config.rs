//! Configuration infrastructure
//!
//! Contains configuration loading and management for the resilience core.
//!
//! Configuration is organized by component:
//! 1. Processing settings (phase bands, monitoring window, run ceilings)
//! 2. Session-guard settings (trigger thresholds, circuit breaker)
//! 3. Retention settings (per-cache policies)
//! 4. Persistence and logging settings

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::info;

use crate::domain::retention::{CachePolicy, RetentionStrategyKind, PERMANENT_TTL_HOURS};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("failed to load configuration source: {0}")]
    Load(#[source] config::ConfigError),

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

impl ConfigError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Processing state store settings
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Authentication session guard settings
    #[serde(default)]
    pub auth: AuthGuardConfig,

    /// Cache retention settings
    #[serde(default)]
    pub retention: RetentionConfig,

    /// State persistence settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the processing state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Capacity of the price-monitoring window (W)
    pub monitoring_window_size: usize,

    /// Over-ceiling prices within a full window that trip the
    /// Phase 1 → Phase 2 transition (T)
    pub phase_transition_threshold: u32,

    /// Price ceiling of the Phase 1 band
    pub phase1_max_price: f64,

    /// Price ceiling of the Phase 2 band
    pub phase2_max_price: f64,

    /// Stop after this many products; `None` runs unlimited
    pub max_products: Option<u64>,

    /// Stop after this many completed categories; `None` runs unlimited
    pub max_categories: Option<u32>,
}

/// Settings for the authentication session guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthGuardConfig {
    /// Successive price-extraction failures that force a re-login
    pub consecutive_failure_threshold: u32,

    /// Primary periodic login cadence, in processed products
    pub primary_periodic_interval: u64,

    /// Secondary (larger) periodic login cadence, in processed products
    pub secondary_periodic_interval: u64,

    /// Products that must pass after a login before a periodic trigger
    /// may fire again
    pub min_products_between_logins: u64,

    /// Failed login attempts that open the circuit breaker
    pub max_consecutive_auth_failures: u32,

    /// Circuit-breaker cooldown after the last auth failure, in seconds
    pub auth_failure_delay_seconds: u64,
}

impl AuthGuardConfig {
    /// Circuit-breaker cooldown as a [`Duration`].
    #[must_use]
    pub fn auth_failure_delay(&self) -> Duration {
        Duration::from_secs(self.auth_failure_delay_seconds)
    }
}

/// Settings for the cache retention engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Retention policy per cache type
    pub caches: HashMap<String, CachePolicy>,

    /// Age at which a leftover `.tmp` file counts as a crashed writer's
    /// garbage rather than an in-flight write
    pub stale_temp_max_age_hours: i64,
}

/// Settings for state persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding state files; `None` resolves to the app data dir
    pub state_dir: Option<PathBuf>,

    /// Timestamped backups kept per state file
    pub max_backups: usize,
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,

    /// Keep only the most recent log file (delete all others)
    pub keep_only_latest: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            monitoring_window_size: defaults::MONITORING_WINDOW_SIZE,
            phase_transition_threshold: defaults::PHASE_TRANSITION_THRESHOLD,
            phase1_max_price: defaults::PHASE1_MAX_PRICE,
            phase2_max_price: defaults::PHASE2_MAX_PRICE,
            max_products: None,
            max_categories: None,
        }
    }
}

impl Default for AuthGuardConfig {
    fn default() -> Self {
        Self {
            consecutive_failure_threshold: defaults::CONSECUTIVE_FAILURE_THRESHOLD,
            primary_periodic_interval: defaults::PRIMARY_PERIODIC_INTERVAL,
            secondary_periodic_interval: defaults::SECONDARY_PERIODIC_INTERVAL,
            min_products_between_logins: defaults::MIN_PRODUCTS_BETWEEN_LOGINS,
            max_consecutive_auth_failures: defaults::MAX_CONSECUTIVE_AUTH_FAILURES,
            auth_failure_delay_seconds: defaults::AUTH_FAILURE_DELAY_SECONDS,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        let mut caches = HashMap::new();
        caches.insert(
            "products".to_string(),
            CachePolicy {
                strategy: RetentionStrategyKind::Ttl,
                ttl_hours: defaults::CACHE_TTL_HOURS,
                max_size_mb: defaults::CACHE_MAX_SIZE_MB,
                archive_after_days: defaults::ARCHIVE_AFTER_DAYS,
                required_fields: vec!["product_id".to_string(), "price".to_string()],
            },
        );
        caches.insert(
            "listings".to_string(),
            CachePolicy {
                strategy: RetentionStrategyKind::Ttl,
                ttl_hours: defaults::LISTING_CACHE_TTL_HOURS,
                max_size_mb: defaults::CACHE_MAX_SIZE_MB,
                archive_after_days: defaults::ARCHIVE_AFTER_DAYS,
                required_fields: Vec::new(),
            },
        );
        caches.insert(
            "images".to_string(),
            CachePolicy {
                strategy: RetentionStrategyKind::SizeLru,
                ttl_hours: defaults::CACHE_TTL_HOURS,
                max_size_mb: defaults::IMAGE_CACHE_MAX_SIZE_MB,
                archive_after_days: defaults::ARCHIVE_AFTER_DAYS,
                required_fields: Vec::new(),
            },
        );
        caches.insert(
            "matched".to_string(),
            CachePolicy {
                strategy: RetentionStrategyKind::UsageAware,
                ttl_hours: defaults::CACHE_TTL_HOURS,
                max_size_mb: defaults::CACHE_MAX_SIZE_MB,
                archive_after_days: defaults::ARCHIVE_AFTER_DAYS,
                required_fields: vec!["product_id".to_string()],
            },
        );
        caches.insert(
            "reports".to_string(),
            CachePolicy {
                strategy: RetentionStrategyKind::Archive,
                ttl_hours: PERMANENT_TTL_HOURS,
                max_size_mb: defaults::CACHE_MAX_SIZE_MB,
                archive_after_days: defaults::ARCHIVE_AFTER_DAYS,
                required_fields: Vec::new(),
            },
        );

        Self {
            caches,
            stale_temp_max_age_hours: defaults::STALE_TEMP_MAX_AGE_HOURS,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            max_backups: defaults::MAX_BACKUPS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: defaults::LOG_AUTO_CLEANUP,
            keep_only_latest: defaults::LOG_KEEP_ONLY_LATEST,
        }
    }
}

impl AppConfig {
    /// Checks cross-field invariants the serde layer cannot express.
    ///
    /// Called after every load; a config that fails here must not reach
    /// the components.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let processing = &self.processing;
        if processing.monitoring_window_size == 0 {
            return Err(ConfigError::validation(
                "processing.monitoring_window_size must be at least 1",
            ));
        }
        if processing.phase_transition_threshold == 0 {
            return Err(ConfigError::validation(
                "processing.phase_transition_threshold must be at least 1",
            ));
        }
        if processing.phase_transition_threshold as usize > processing.monitoring_window_size {
            return Err(ConfigError::validation(format!(
                "processing.phase_transition_threshold ({}) cannot exceed monitoring_window_size ({})",
                processing.phase_transition_threshold, processing.monitoring_window_size
            )));
        }
        if processing.phase2_max_price <= processing.phase1_max_price {
            return Err(ConfigError::validation(format!(
                "processing.phase2_max_price ({}) must be above phase1_max_price ({})",
                processing.phase2_max_price, processing.phase1_max_price
            )));
        }

        let auth = &self.auth;
        if auth.consecutive_failure_threshold == 0 {
            return Err(ConfigError::validation(
                "auth.consecutive_failure_threshold must be at least 1",
            ));
        }
        if auth.primary_periodic_interval == 0 || auth.secondary_periodic_interval == 0 {
            return Err(ConfigError::validation(
                "auth periodic intervals must be at least 1",
            ));
        }
        if auth.secondary_periodic_interval <= auth.primary_periodic_interval {
            return Err(ConfigError::validation(format!(
                "auth.secondary_periodic_interval ({}) must be above primary_periodic_interval ({})",
                auth.secondary_periodic_interval, auth.primary_periodic_interval
            )));
        }
        if auth.max_consecutive_auth_failures == 0 {
            return Err(ConfigError::validation(
                "auth.max_consecutive_auth_failures must be at least 1",
            ));
        }

        for (cache_type, policy) in &self.retention.caches {
            if policy.ttl_hours < PERMANENT_TTL_HOURS {
                return Err(ConfigError::validation(format!(
                    "retention.caches.{cache_type}.ttl_hours must be positive or -1 (permanent)",
                )));
            }
            if policy.strategy == RetentionStrategyKind::SizeLru && policy.max_size_mb == 0 {
                return Err(ConfigError::validation(format!(
                    "retention.caches.{cache_type}.max_size_mb must be at least 1 for the size_lru strategy",
                )));
            }
            if policy.strategy == RetentionStrategyKind::Archive && policy.archive_after_days == 0 {
                return Err(ConfigError::validation(format!(
                    "retention.caches.{cache_type}.archive_after_days must be at least 1 for the archive strategy",
                )));
            }
        }

        if !self.logging.console_output && !self.logging.file_output {
            return Err(ConfigError::validation(
                "logging must enable at least one of console_output or file_output",
            ));
        }

        Ok(())
    }

    /// Loads configuration from a file source with a `PRICE_SENTRY`
    /// environment overlay, then validates it.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("PRICE_SENTRY"))
            .build()
            .map_err(ConfigError::Load)?;

        let app_config: Self = settings.try_deserialize().map_err(ConfigError::Load)?;
        app_config.validate()?;
        Ok(app_config)
    }
}

/// Configuration manager for loading and saving settings.
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory.
    pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("price-sentry"))
            .ok_or_else(|| ConfigError::validation("no user config directory available"))
    }

    /// Get the application data directory (state files, caches, logs).
    pub fn get_app_data_dir() -> Result<PathBuf, ConfigError> {
        dirs::data_local_dir()
            .map(|dir| dir.join("price-sentry"))
            .ok_or_else(|| ConfigError::validation("no user data directory available"))
    }

    /// Create a new configuration manager with the standard config path.
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_dir()?.join("price_sentry_config.json");
        Ok(Self { config_path })
    }

    /// Create a configuration manager over an explicit path.
    #[must_use]
    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    /// Load configuration from file, creating default if it doesn't exist.
    ///
    /// A file that no longer parses is backed up next to itself with a
    /// `.corrupted` suffix and replaced by defaults; losing tuning values
    /// is preferred over a process that cannot start.
    pub async fn load_config(&self) -> Result<AppConfig, ConfigError> {
        if !self.config_path.exists() {
            info!("Configuration file not found, creating default: {:?}", self.config_path);
            let default_config = AppConfig::default();
            self.save_config(&default_config).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .map_err(|e| ConfigError::Io {
                path: self.config_path.clone(),
                source: e,
            })?;

        match serde_json::from_str::<AppConfig>(&content) {
            Ok(app_config) => {
                app_config.validate()?;
                info!("Loaded configuration from: {:?}", self.config_path);
                Ok(app_config)
            }
            Err(parse_error) => {
                tracing::warn!("⚠️  Configuration file unreadable: {}", parse_error);
                tracing::warn!("⚠️  Resetting to default configuration");

                let backup_path = self.config_path.with_extension("json.corrupted");
                if let Err(e) = fs::copy(&self.config_path, &backup_path).await {
                    tracing::warn!("Failed to create backup of corrupted config: {}", e);
                } else {
                    tracing::info!("Backed up corrupted config to: {:?}", backup_path);
                }

                let default_config = AppConfig::default();
                self.save_config(&default_config).await?;
                tracing::info!("✅ Reset to default configuration");
                Ok(default_config)
            }
        }
    }

    /// Save configuration to file.
    pub async fn save_config(&self, app_config: &AppConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let content = serde_json::to_string_pretty(app_config).map_err(ConfigError::Parse)?;
        fs::write(&self.config_path, content)
            .await
            .map_err(|e| ConfigError::Io {
                path: self.config_path.clone(),
                source: e,
            })?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }

    /// Reset configuration to defaults (useful for troubleshooting).
    pub async fn reset_to_defaults(&self) -> Result<AppConfig, ConfigError> {
        info!("🔄 Resetting configuration to defaults");
        let default_config = AppConfig::default();
        self.save_config(&default_config).await?;
        info!("✅ Configuration reset to defaults");
        Ok(default_config)
    }

    /// Get the configuration file path.
    #[must_use]
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }
}

/// Default configuration values.
pub mod defaults {
    /// Default capacity of the price-monitoring window
    pub const MONITORING_WINDOW_SIZE: usize = 10;

    /// Default over-ceiling count that trips the phase transition
    pub const PHASE_TRANSITION_THRESHOLD: u32 = 3;

    /// Default Phase 1 price ceiling
    pub const PHASE1_MAX_PRICE: f64 = 50.0;

    /// Default Phase 2 price ceiling
    pub const PHASE2_MAX_PRICE: f64 = 200.0;

    /// Default consecutive price-extraction failures before re-login
    pub const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 3;

    /// Default primary periodic login cadence (products)
    pub const PRIMARY_PERIODIC_INTERVAL: u64 = 100;

    /// Default secondary periodic login cadence (products)
    pub const SECONDARY_PERIODIC_INTERVAL: u64 = 500;

    /// Default minimum products between two logins
    pub const MIN_PRODUCTS_BETWEEN_LOGINS: u64 = 5;

    /// Default failed logins before the circuit breaker opens
    pub const MAX_CONSECUTIVE_AUTH_FAILURES: u32 = 3;

    /// Default circuit-breaker cooldown in seconds
    pub const AUTH_FAILURE_DELAY_SECONDS: u64 = 300;

    /// Default cache entry TTL (14 days)
    pub const CACHE_TTL_HOURS: i64 = 336;

    /// Default TTL for listing-page caches (7 days; listings go stale fast)
    pub const LISTING_CACHE_TTL_HOURS: i64 = 168;

    /// Default cache size budget
    pub const CACHE_MAX_SIZE_MB: u64 = 500;

    /// Default size budget for the image cache
    pub const IMAGE_CACHE_MAX_SIZE_MB: u64 = 1024;

    /// Default archive horizon in days
    pub const ARCHIVE_AFTER_DAYS: u32 = 30;

    /// Default age at which a leftover temp file is swept
    pub const STALE_TEMP_MAX_AGE_HOURS: i64 = 1;

    /// Default number of state backups kept per file
    pub const MAX_BACKUPS: usize = 5;

    /// Default log level
    pub const LOG_LEVEL: &str = "info";

    /// Default JSON log format toggle
    pub const LOG_JSON_FORMAT: bool = false;

    /// Default console output toggle
    pub const LOG_CONSOLE_OUTPUT: bool = true;

    /// Default file output toggle
    pub const LOG_FILE_OUTPUT: bool = true;

    /// Default number of log files to keep
    pub const LOG_MAX_FILES: u32 = 10;

    /// Default automatic log cleanup toggle
    pub const LOG_AUTO_CLEANUP: bool = true;

    /// Default keep-only-latest log toggle
    pub const LOG_KEEP_ONLY_LATEST: bool = false;
}
