//! Domain module - Core resilience model and pure transition logic
//!
//! This module contains the data types and invariant-carrying logic for the
//! resilience core: processing state, authentication state, and cache
//! retention planning. Nothing here performs I/O.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod auth;
pub mod processing;
pub mod retention;
pub mod services;

// Re-export commonly used items for convenience
// Note: Be specific about re-exports to avoid ambiguous glob warnings
pub use auth::{
    AuthenticationResult, AuthenticationState, AuthenticationStats, CircuitStatus, LoginOutcome,
    LoginTrigger, TriggerDecision,
};
pub use processing::{
    CategoryProgress, CategoryUpdate, CrawlPhase, PhaseTransitionPoint, PriceRanges,
    ProcessingState, ProcessingStatistics, ResumePoint,
};
pub use retention::{
    CacheEntrySnapshot, CacheInfo, CachePolicy, ClearingResult, RetentionStrategyKind,
    ValidationResult, PERMANENT_TTL_HOURS,
};
pub use services::{LoginProvider, ProcessedLedger};
