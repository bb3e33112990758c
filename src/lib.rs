//! Price Sentry - Resilience core for interruption-prone scraping sessions
//!
//! Keeps long-running, login-gated supplier crawls recoverable: resumable
//! processing state, an authentication session guard with a circuit
//! breaker, and policy-driven cache retention.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

// Re-export the main component surface for easier access
pub use application::retention_engine::CacheRetentionEngine;
pub use application::session_guard::AuthSessionGuard;
pub use application::state_manager::ProcessingStateManager;
pub use domain::auth::{
    AuthenticationResult, AuthenticationState, AuthenticationStats, CircuitStatus, LoginOutcome,
    LoginTrigger, TriggerDecision,
};
pub use domain::processing::{
    CategoryProgress, CategoryUpdate, CrawlPhase, PhaseTransitionPoint, PriceRanges,
    ProcessingState, ProcessingStatistics, ResumePoint,
};
pub use domain::retention::{
    CacheEntrySnapshot, CacheInfo, CachePolicy, ClearingResult, PERMANENT_TTL_HOURS,
    RetentionStrategyKind, ValidationResult,
};
pub use domain::services::{LoginProvider, ProcessedLedger};
pub use infrastructure::config::{
    AppConfig, AuthGuardConfig, ConfigError, ConfigManager, LoggingConfig, PersistenceConfig,
    ProcessingConfig, RetentionConfig,
};
pub use infrastructure::ledger::LinkedProductLedger;
pub use infrastructure::logging::{init_logging, init_logging_with_config};
pub use infrastructure::persistence::{PersistenceError, PersistenceLayer};
