//! Authentication session state and trigger model
//!
//! Data types for the session guard: trigger reasons, circuit-breaker
//! status, per-attempt results, and cumulative statistics. The decision
//! logic lives in the application layer.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a re-authentication decision was (or was not) made.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LoginTrigger {
    /// Too many successive products came back without a usable price.
    ConsecutiveFailures,
    /// The primary product-count cadence was reached.
    PeriodicPrimary,
    /// The secondary, larger product-count cadence was reached.
    PeriodicSecondary,
    /// A periodic trigger fired too soon after the previous login and was
    /// suppressed.
    RecentLoginSkip,
    /// The circuit breaker is open; no login may be attempted yet.
    CircuitBreakerActive,
    NoTrigger,
}

impl LoginTrigger {
    /// Stable wire name, matching the persisted/reported string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConsecutiveFailures => "consecutive_failures",
            Self::PeriodicPrimary => "periodic_primary",
            Self::PeriodicSecondary => "periodic_secondary",
            Self::RecentLoginSkip => "recent_login_skip",
            Self::CircuitBreakerActive => "circuit_breaker_active",
            Self::NoTrigger => "no_trigger",
        }
    }

    /// Whether this trigger asks the caller to perform a login.
    #[must_use]
    pub fn requires_login(self) -> bool {
        matches!(
            self,
            Self::ConsecutiveFailures | Self::PeriodicPrimary | Self::PeriodicSecondary
        )
    }
}

impl std::fmt::Display for LoginTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one trigger evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDecision {
    pub needs_login: bool,
    pub trigger: LoginTrigger,

    /// Trigger-specific magnitude: the failure streak for
    /// `consecutive_failures`, the total product count for periodic
    /// triggers, products since login for `recent_login_skip`, remaining
    /// cooldown seconds for `circuit_breaker_active`.
    pub trigger_value: u64,
}

impl TriggerDecision {
    #[must_use]
    pub fn login(trigger: LoginTrigger, trigger_value: u64) -> Self {
        Self {
            needs_login: true,
            trigger,
            trigger_value,
        }
    }

    #[must_use]
    pub fn no_login(trigger: LoginTrigger, trigger_value: u64) -> Self {
        Self {
            needs_login: false,
            trigger,
            trigger_value,
        }
    }
}

/// What the external login capability reported back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginOutcome {
    pub success: bool,
    pub method_used: String,
    pub error_message: Option<String>,
}

/// Result of one login attempt driven by the session guard.
///
/// Produced for every attempt, including provider errors; the guard never
/// propagates those as failures of the crawl loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationResult {
    pub success: bool,
    pub trigger: LoginTrigger,
    pub trigger_value: u64,
    pub method_used: Option<String>,
    pub error_message: Option<String>,
    pub duration: Duration,
    pub attempted_at: DateTime<Utc>,
}

/// Circuit-breaker state as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open { cooldown_remaining_seconds: u64 },
}

/// Cumulative login statistics for reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthenticationStats {
    pub total_attempts: u64,
    pub successful_logins: u64,
    pub failed_logins: u64,

    /// Login attempts broken down by the trigger that caused them.
    pub attempts_by_trigger: HashMap<LoginTrigger, u64>,

    /// Periodic triggers suppressed because a login had just happened.
    pub recent_login_skips: u64,

    /// Evaluations blocked by an open circuit breaker.
    pub circuit_breaker_blocks: u64,

    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl AuthenticationStats {
    /// Fraction of attempts that succeeded, 0.0 when none were made.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.successful_logins as f64 / self.total_attempts as f64
        }
    }
}

/// Mutable authentication state owned by the session guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationState {
    /// Successive products without a usable price.
    pub consecutive_failures: u32,

    /// Products processed since the last successful login.
    pub products_since_login: u64,

    /// Products processed over the whole run; drives the periodic cadences.
    pub total_products_processed: u64,

    /// Successive failed login attempts; trips the circuit breaker.
    pub consecutive_auth_failures: u32,

    pub last_auth_failure_time: Option<DateTime<Utc>>,
    pub last_login_time: Option<DateTime<Utc>>,

    pub stats: AuthenticationStats,
}

impl AuthenticationState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            consecutive_failures: 0,
            products_since_login: 0,
            total_products_processed: 0,
            consecutive_auth_failures: 0,
            last_auth_failure_time: None,
            last_login_time: None,
            stats: AuthenticationStats::default(),
        }
    }

    /// Resets every streak counter after a successful login.
    pub fn register_login_success(&mut self, at: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.products_since_login = 0;
        self.consecutive_auth_failures = 0;
        self.last_login_time = Some(at);
        self.stats.successful_logins += 1;
        self.stats.last_success_at = Some(at);
    }

    /// Records a failed login attempt.
    pub fn register_login_failure(&mut self, at: DateTime<Utc>) {
        self.consecutive_auth_failures += 1;
        self.last_auth_failure_time = Some(at);
        self.stats.failed_logins += 1;
    }
}

impl Default for AuthenticationState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_wire_names_are_stable() {
        assert_eq!(LoginTrigger::ConsecutiveFailures.as_str(), "consecutive_failures");
        assert_eq!(LoginTrigger::PeriodicPrimary.as_str(), "periodic_primary");
        assert_eq!(LoginTrigger::PeriodicSecondary.as_str(), "periodic_secondary");
        assert_eq!(LoginTrigger::RecentLoginSkip.as_str(), "recent_login_skip");
        assert_eq!(LoginTrigger::CircuitBreakerActive.as_str(), "circuit_breaker_active");
        assert_eq!(LoginTrigger::NoTrigger.as_str(), "no_trigger");

        let json = serde_json::to_string(&LoginTrigger::PeriodicPrimary).unwrap();
        assert_eq!(json, "\"periodic_primary\"");
    }

    #[test]
    fn only_real_triggers_require_login() {
        assert!(LoginTrigger::ConsecutiveFailures.requires_login());
        assert!(LoginTrigger::PeriodicPrimary.requires_login());
        assert!(LoginTrigger::PeriodicSecondary.requires_login());
        assert!(!LoginTrigger::RecentLoginSkip.requires_login());
        assert!(!LoginTrigger::CircuitBreakerActive.requires_login());
        assert!(!LoginTrigger::NoTrigger.requires_login());
    }

    #[test]
    fn login_success_resets_streaks() {
        let mut state = AuthenticationState::new();
        state.consecutive_failures = 2;
        state.products_since_login = 99;
        state.consecutive_auth_failures = 1;

        state.register_login_success(Utc::now());

        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.products_since_login, 0);
        assert_eq!(state.consecutive_auth_failures, 0);
        assert!(state.last_login_time.is_some());
    }

    #[test]
    fn success_rate_handles_empty_stats() {
        let stats = AuthenticationStats::default();
        assert_eq!(stats.success_rate(), 0.0);

        let mut stats = stats;
        stats.total_attempts = 4;
        stats.successful_logins = 3;
        assert!((stats.success_rate() - 0.75).abs() < f64::EPSILON);
    }
}
