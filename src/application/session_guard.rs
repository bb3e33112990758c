//! Authentication session guard
//!
//! Decides when a scraping session must re-authenticate and drives the
//! login attempts through the injected [`LoginProvider`]. Triggers are
//! evaluated in a fixed order per processed product: circuit breaker
//! first, then the consecutive-failure streak, then the periodic
//! cadences. Repeated login failures open a circuit breaker that blocks
//! further attempts until a cooldown has passed.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::auth::{
    AuthenticationResult, AuthenticationState, AuthenticationStats, CircuitStatus, LoginTrigger,
    TriggerDecision,
};
use crate::domain::services::LoginProvider;
use crate::infrastructure::config::{defaults, AuthGuardConfig};

/// Keeps a login-gated session alive across an interruption-prone crawl.
pub struct AuthSessionGuard {
    state: AuthenticationState,
    login_provider: Arc<dyn LoginProvider>,
    config: AuthGuardConfig,
}

impl AuthSessionGuard {
    #[must_use]
    pub fn new(login_provider: Arc<dyn LoginProvider>, mut config: AuthGuardConfig) -> Self {
        // The cadence checks are modulo-based; a zero interval would
        // divide by zero on the first product.
        if config.primary_periodic_interval == 0 {
            warn!(
                "⚠️  primary_periodic_interval 0 is invalid, using default {}",
                defaults::PRIMARY_PERIODIC_INTERVAL
            );
            config.primary_periodic_interval = defaults::PRIMARY_PERIODIC_INTERVAL;
        }
        if config.secondary_periodic_interval == 0 {
            warn!(
                "⚠️  secondary_periodic_interval 0 is invalid, using default {}",
                defaults::SECONDARY_PERIODIC_INTERVAL
            );
            config.secondary_periodic_interval = defaults::SECONDARY_PERIODIC_INTERVAL;
        }
        Self {
            state: AuthenticationState::new(),
            login_provider,
            config,
        }
    }

    /// Registers one processed product and decides whether to re-login.
    ///
    /// `last_price` is the price extracted for that product; `None` or a
    /// non-positive value counts as an extraction failure. The product
    /// counters advance on every call, including while the circuit
    /// breaker is open, so the periodic cadences stay anchored to real
    /// progress.
    pub fn evaluate(&mut self, last_price: Option<f64>) -> TriggerDecision {
        self.state.total_products_processed += 1;
        self.state.products_since_login += 1;

        if let CircuitStatus::Open {
            cooldown_remaining_seconds,
        } = self.circuit_status()
        {
            self.state.stats.circuit_breaker_blocks += 1;
            warn!(
                "🚨 Circuit breaker open, login blocked for another {}s",
                cooldown_remaining_seconds
            );
            return TriggerDecision::no_login(
                LoginTrigger::CircuitBreakerActive,
                cooldown_remaining_seconds,
            );
        }

        let price_ok = last_price.is_some_and(|price| price > 0.0);
        if price_ok {
            self.state.consecutive_failures = 0;
        } else {
            self.state.consecutive_failures += 1;
        }

        if self.state.consecutive_failures >= self.config.consecutive_failure_threshold {
            debug!(
                "Re-login needed: {} consecutive price extraction failures",
                self.state.consecutive_failures
            );
            return TriggerDecision::login(
                LoginTrigger::ConsecutiveFailures,
                u64::from(self.state.consecutive_failures),
            );
        }

        let total = self.state.total_products_processed;
        let periodic = if total % self.config.secondary_periodic_interval == 0 {
            Some(LoginTrigger::PeriodicSecondary)
        } else if total % self.config.primary_periodic_interval == 0 {
            Some(LoginTrigger::PeriodicPrimary)
        } else {
            None
        };

        if let Some(trigger) = periodic {
            if self.state.products_since_login < self.config.min_products_between_logins {
                self.state.stats.recent_login_skips += 1;
                debug!(
                    "Periodic trigger {} suppressed, only {} products since last login",
                    trigger, self.state.products_since_login
                );
                return TriggerDecision::no_login(
                    LoginTrigger::RecentLoginSkip,
                    self.state.products_since_login,
                );
            }
            return TriggerDecision::login(trigger, total);
        }

        TriggerDecision::no_login(LoginTrigger::NoTrigger, 0)
    }

    /// Performs one login attempt for a trigger that fired.
    ///
    /// Always returns a result; a provider error becomes a failed
    /// attempt, never a propagated error. Failures feed the circuit
    /// breaker.
    pub async fn perform_login(
        &mut self,
        trigger: LoginTrigger,
        trigger_value: u64,
    ) -> AuthenticationResult {
        let started = Instant::now();
        let attempted_at = Utc::now();

        self.state.stats.total_attempts += 1;
        *self
            .state
            .stats
            .attempts_by_trigger
            .entry(trigger)
            .or_insert(0) += 1;
        self.state.stats.last_attempt_at = Some(attempted_at);
        info!("🔐 Login attempt (trigger: {}, value: {})", trigger, trigger_value);

        match self.login_provider.login().await {
            Ok(outcome) if outcome.success => {
                let duration = started.elapsed();
                self.state.register_login_success(attempted_at);
                info!(
                    "✅ Login succeeded via '{}' in {:.1}s",
                    outcome.method_used,
                    duration.as_secs_f64()
                );
                AuthenticationResult {
                    success: true,
                    trigger,
                    trigger_value,
                    method_used: Some(outcome.method_used),
                    error_message: None,
                    duration,
                    attempted_at,
                }
            }
            Ok(outcome) => {
                let message = outcome
                    .error_message
                    .unwrap_or_else(|| "login provider reported failure".to_string());
                self.note_login_failure(
                    trigger,
                    trigger_value,
                    Some(outcome.method_used),
                    message,
                    started.elapsed(),
                    attempted_at,
                )
            }
            Err(e) => self.note_login_failure(
                trigger,
                trigger_value,
                None,
                e.to_string(),
                started.elapsed(),
                attempted_at,
            ),
        }
    }

    /// Convenience wrapper: evaluate, and log in immediately when needed.
    ///
    /// Returns `None` when no login was attempted.
    pub async fn ensure_session(&mut self, last_price: Option<f64>) -> Option<AuthenticationResult> {
        let decision = self.evaluate(last_price);
        if decision.needs_login {
            Some(
                self.perform_login(decision.trigger, decision.trigger_value)
                    .await,
            )
        } else {
            None
        }
    }

    /// Current circuit-breaker state.
    ///
    /// The circuit opens once the auth-failure streak reaches its limit
    /// and closes again by itself after the cooldown; the next attempt
    /// then decides whether it reopens.
    #[must_use]
    pub fn circuit_status(&self) -> CircuitStatus {
        if self.state.consecutive_auth_failures < self.config.max_consecutive_auth_failures {
            return CircuitStatus::Closed;
        }
        let Some(last_failure) = self.state.last_auth_failure_time else {
            return CircuitStatus::Closed;
        };

        let elapsed = (Utc::now() - last_failure).num_seconds();
        let delay = self.config.auth_failure_delay_seconds as i64;
        if elapsed < delay {
            CircuitStatus::Open {
                cooldown_remaining_seconds: (delay - elapsed) as u64,
            }
        } else {
            CircuitStatus::Closed
        }
    }

    fn note_login_failure(
        &mut self,
        trigger: LoginTrigger,
        trigger_value: u64,
        method_used: Option<String>,
        error_message: String,
        duration: std::time::Duration,
        attempted_at: chrono::DateTime<Utc>,
    ) -> AuthenticationResult {
        self.state.register_login_failure(attempted_at);
        warn!("❌ Login failed (trigger: {}): {}", trigger, error_message);

        if self.state.consecutive_auth_failures >= self.config.max_consecutive_auth_failures {
            warn!(
                "🚨 Circuit breaker opened after {} consecutive auth failures, cooldown {}s",
                self.state.consecutive_auth_failures, self.config.auth_failure_delay_seconds
            );
        }

        AuthenticationResult {
            success: false,
            trigger,
            trigger_value,
            method_used,
            error_message: Some(error_message),
            duration,
            attempted_at,
        }
    }

    #[must_use]
    pub fn stats(&self) -> &AuthenticationStats {
        &self.state.stats
    }

    #[must_use]
    pub fn state(&self) -> &AuthenticationState {
        &self.state
    }

    /// Logs a human-readable authentication summary.
    pub fn log_summary(&self) {
        let stats = &self.state.stats;
        info!("📊 Authentication summary");
        info!(
            "   Attempts: {} ({} ok, {} failed, {:.0}% success)",
            stats.total_attempts,
            stats.successful_logins,
            stats.failed_logins,
            stats.success_rate() * 100.0
        );
        info!("   Periodic skips: {}", stats.recent_login_skips);
        info!("   Circuit breaker blocks: {}", stats.circuit_breaker_blocks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    use crate::domain::auth::LoginOutcome;

    struct ScriptedProvider {
        script: tokio::sync::Mutex<VecDeque<anyhow::Result<LoginOutcome>>>,
    }

    #[async_trait]
    impl LoginProvider for ScriptedProvider {
        async fn login(&self) -> anyhow::Result<LoginOutcome> {
            self.script
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(login_ok)
        }
    }

    fn login_ok() -> anyhow::Result<LoginOutcome> {
        Ok(LoginOutcome {
            success: true,
            method_used: "form_login".to_string(),
            error_message: None,
        })
    }

    fn login_rejected() -> anyhow::Result<LoginOutcome> {
        Ok(LoginOutcome {
            success: false,
            method_used: "form_login".to_string(),
            error_message: Some("bad credentials".to_string()),
        })
    }

    fn guard_with(
        script: Vec<anyhow::Result<LoginOutcome>>,
        config: AuthGuardConfig,
    ) -> AuthSessionGuard {
        AuthSessionGuard::new(
            Arc::new(ScriptedProvider {
                script: tokio::sync::Mutex::new(script.into()),
            }),
            config,
        )
    }

    fn quiet_config() -> AuthGuardConfig {
        AuthGuardConfig {
            consecutive_failure_threshold: 3,
            primary_periodic_interval: 1_000,
            secondary_periodic_interval: 5_000,
            min_products_between_logins: 0,
            max_consecutive_auth_failures: 3,
            auth_failure_delay_seconds: 300,
        }
    }

    #[test]
    fn consecutive_failures_trigger_after_threshold() {
        let mut guard = guard_with(Vec::new(), quiet_config());

        assert!(!guard.evaluate(Some(19.99)).needs_login);
        assert!(!guard.evaluate(None).needs_login);
        assert!(!guard.evaluate(None).needs_login);

        let decision = guard.evaluate(None);
        assert!(decision.needs_login);
        assert_eq!(decision.trigger, LoginTrigger::ConsecutiveFailures);
        assert_eq!(decision.trigger_value, 3);
    }

    #[test]
    fn successful_price_resets_the_failure_streak() {
        let mut guard = guard_with(Vec::new(), quiet_config());

        guard.evaluate(None);
        guard.evaluate(None);
        guard.evaluate(Some(12.50));
        assert!(!guard.evaluate(None).needs_login);
        assert!(!guard.evaluate(None).needs_login);
    }

    #[test]
    fn zero_price_counts_as_extraction_failure() {
        let mut guard = guard_with(Vec::new(), quiet_config());

        guard.evaluate(Some(0.0));
        guard.evaluate(Some(-1.0));
        let decision = guard.evaluate(Some(0.0));
        assert_eq!(decision.trigger, LoginTrigger::ConsecutiveFailures);
    }

    #[test]
    fn periodic_primary_fires_on_cadence() {
        let mut config = quiet_config();
        config.primary_periodic_interval = 5;
        config.secondary_periodic_interval = 50;
        let mut guard = guard_with(Vec::new(), config);

        for _ in 0..4 {
            assert!(!guard.evaluate(Some(10.0)).needs_login);
        }
        let decision = guard.evaluate(Some(10.0));
        assert!(decision.needs_login);
        assert_eq!(decision.trigger, LoginTrigger::PeriodicPrimary);
        assert_eq!(decision.trigger_value, 5);
    }

    #[test]
    fn secondary_cadence_takes_precedence_over_primary() {
        let mut config = quiet_config();
        config.primary_periodic_interval = 5;
        config.secondary_periodic_interval = 10;
        let mut guard = guard_with(Vec::new(), config);

        let mut triggers = Vec::new();
        for _ in 0..10 {
            let decision = guard.evaluate(Some(10.0));
            if decision.needs_login {
                triggers.push(decision.trigger);
            }
        }
        assert_eq!(
            triggers,
            vec![LoginTrigger::PeriodicPrimary, LoginTrigger::PeriodicSecondary]
        );
    }

    #[test]
    fn periodic_trigger_is_suppressed_right_after_login() {
        let mut config = quiet_config();
        config.primary_periodic_interval = 5;
        config.min_products_between_logins = 10;
        let mut guard = guard_with(Vec::new(), config);

        for _ in 0..4 {
            guard.evaluate(Some(10.0));
        }
        let decision = guard.evaluate(Some(10.0));

        assert!(!decision.needs_login);
        assert_eq!(decision.trigger, LoginTrigger::RecentLoginSkip);
        assert_eq!(decision.trigger_value, 5);
        assert_eq!(guard.stats().recent_login_skips, 1);
    }

    #[test]
    fn zero_periodic_intervals_fall_back_to_defaults() {
        let mut config = quiet_config();
        config.primary_periodic_interval = 0;
        config.secondary_periodic_interval = 0;
        let mut guard = guard_with(Vec::new(), config);

        for _ in 0..99 {
            assert!(!guard.evaluate(Some(10.0)).needs_login);
        }
        let decision = guard.evaluate(Some(10.0));
        assert_eq!(decision.trigger, LoginTrigger::PeriodicPrimary);
        assert_eq!(decision.trigger_value, 100);
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_repeated_login_failures() {
        let mut config = quiet_config();
        config.consecutive_failure_threshold = 1;
        config.max_consecutive_auth_failures = 2;
        let mut guard = guard_with(vec![login_rejected(), login_rejected()], config);

        for _ in 0..2 {
            let decision = guard.evaluate(None);
            assert!(decision.needs_login);
            let result = guard.perform_login(decision.trigger, decision.trigger_value).await;
            assert!(!result.success);
        }

        assert!(matches!(guard.circuit_status(), CircuitStatus::Open { .. }));

        let blocked = guard.evaluate(None);
        assert!(!blocked.needs_login);
        assert_eq!(blocked.trigger, LoginTrigger::CircuitBreakerActive);
        assert!(blocked.trigger_value > 0 && blocked.trigger_value <= 300);
        assert_eq!(guard.stats().circuit_breaker_blocks, 1);
    }

    #[tokio::test]
    async fn circuit_closes_after_cooldown_and_success_resets_it() {
        let mut config = quiet_config();
        config.consecutive_failure_threshold = 1;
        config.max_consecutive_auth_failures = 1;
        config.auth_failure_delay_seconds = 1;
        let mut guard = guard_with(vec![login_rejected(), login_ok()], config);

        let decision = guard.evaluate(None);
        guard.perform_login(decision.trigger, decision.trigger_value).await;
        assert!(matches!(guard.circuit_status(), CircuitStatus::Open { .. }));

        tokio::time::sleep(std::time::Duration::from_millis(1_200)).await;
        assert_eq!(guard.circuit_status(), CircuitStatus::Closed);

        let retry = guard.evaluate(None);
        assert!(retry.needs_login);
        let result = guard.perform_login(retry.trigger, retry.trigger_value).await;
        assert!(result.success);
        assert_eq!(result.method_used.as_deref(), Some("form_login"));
        assert_eq!(guard.state().consecutive_auth_failures, 0);
        assert_eq!(guard.state().products_since_login, 0);
    }

    #[tokio::test]
    async fn provider_error_is_captured_as_failed_attempt() {
        let mut config = quiet_config();
        config.consecutive_failure_threshold = 1;
        let mut guard = guard_with(vec![Err(anyhow::anyhow!("network down"))], config);

        let result = guard.ensure_session(None).await.unwrap();
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("network down"));
        assert!(result.method_used.is_none());
        assert_eq!(guard.state().consecutive_auth_failures, 1);
    }

    #[tokio::test]
    async fn stats_break_attempts_down_by_trigger() {
        let mut config = quiet_config();
        config.consecutive_failure_threshold = 2;
        config.primary_periodic_interval = 6;
        let mut guard = guard_with(Vec::new(), config);

        // Streak trigger on the second failed product.
        guard.evaluate(None);
        let streak = guard.evaluate(None);
        guard.perform_login(streak.trigger, streak.trigger_value).await;

        // Periodic trigger on the sixth product overall.
        for _ in 0..3 {
            guard.evaluate(Some(10.0));
        }
        let periodic = guard.evaluate(Some(10.0));
        assert_eq!(periodic.trigger, LoginTrigger::PeriodicPrimary);
        guard.perform_login(periodic.trigger, periodic.trigger_value).await;

        let stats = guard.stats();
        assert_eq!(stats.total_attempts, 2);
        assert_eq!(stats.successful_logins, 2);
        assert_eq!(
            stats.attempts_by_trigger[&LoginTrigger::ConsecutiveFailures],
            1
        );
        assert_eq!(stats.attempts_by_trigger[&LoginTrigger::PeriodicPrimary], 1);
        assert!((stats.success_rate() - 1.0).abs() < f64::EPSILON);
    }
}
