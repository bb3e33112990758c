//! Application layer module
//!
//! This module contains the managers that orchestrate the domain logic:
//! state lifecycle, session guarding, and cache retention.

pub mod retention_engine;
pub mod session_guard;
pub mod state_manager;

pub use retention_engine::CacheRetentionEngine;
pub use session_guard::AuthSessionGuard;
pub use state_manager::ProcessingStateManager;
