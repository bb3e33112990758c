//! Service traits for the excluded collaborators
//!
//! The resilience core knows nothing about how login is actually performed
//! or where the linking ledger comes from; it consumes both through these
//! narrow seams.

use async_trait::async_trait;

use crate::domain::auth::LoginOutcome;

/// Black-box login capability invoked by the session guard.
///
/// How login happens (credentials, browser automation, API call) is the
/// implementor's business. An `Err` is captured by the guard as a failed
/// attempt, never propagated into the crawl loop.
#[async_trait]
pub trait LoginProvider: Send + Sync {
    async fn login(&self) -> anyhow::Result<LoginOutcome>;
}

/// Read-only view of already-processed product identifiers.
///
/// Consulted by the usage-aware retention strategy: content the downstream
/// pipeline has consumed is safe to purge regardless of age. Lookups are
/// in-memory; refreshing from the backing store is the concrete type's
/// concern.
pub trait ProcessedLedger: Send + Sync {
    fn is_processed(&self, identity: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
