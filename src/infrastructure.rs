//! Infrastructure layer for persistence, cache storage, and external integrations
//!
//! This module provides state file persistence, cache directory scanning,
//! the processed-products ledger, configuration, and logging.

pub mod cache_storage;
pub mod config; // Configuration loading and validation
pub mod ledger; // Processed-products ledger backing usage-aware retention
pub mod logging; // Logging infrastructure
pub mod persistence; // Atomic state file persistence with backups

// Re-export commonly used items
pub use cache_storage::{CacheScan, scan_cache};
pub use config::{
    AppConfig, AuthGuardConfig, ConfigError, ConfigManager, LoggingConfig, PersistenceConfig,
    ProcessingConfig, RetentionConfig,
};
pub use ledger::LinkedProductLedger;
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use persistence::{PersistenceError, PersistenceLayer};
