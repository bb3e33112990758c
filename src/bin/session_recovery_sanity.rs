//! Session recovery sanity runner
//!
//! Drives the three resilience components end to end against a scratch
//! directory: interrupt-and-resume of processing state, the session guard
//! with a flaky login provider, and a retention sweep over seeded caches.
//! No network, no real credentials; everything runs locally and the
//! scratch directory is removed at the end.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use price_sentry::infrastructure::config::{AppConfig, ProcessingConfig};
use price_sentry::infrastructure::ledger::LinkedProductLedger;
use price_sentry::infrastructure::logging;
use price_sentry::{
    AuthSessionGuard, CacheRetentionEngine, CategoryUpdate, LoginOutcome, LoginProvider,
    PersistenceLayer, ProcessedLedger, ProcessingStateManager,
};

/// Login provider that fails its first attempts, then succeeds. Stands in
/// for a supplier portal that throws captchas under pressure.
struct FlakyLoginProvider {
    attempts: AtomicU32,
    fail_first: u32,
}

#[async_trait]
impl LoginProvider for FlakyLoginProvider {
    async fn login(&self) -> anyhow::Result<LoginOutcome> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        if attempt <= self.fail_first {
            Ok(LoginOutcome {
                success: false,
                method_used: "form_login".to_string(),
                error_message: Some(format!("captcha challenge on attempt {attempt}")),
            })
        } else {
            Ok(LoginOutcome {
                success: true,
                method_used: "form_login".to_string(),
                error_message: None,
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut app_config = AppConfig::default();
    app_config.logging.file_output = false;
    let _ = logging::init_logging_with_config(&app_config.logging);

    println!("════════════════════════════════════════════════════");
    println!("  Price Sentry - session recovery sanity run");
    println!("════════════════════════════════════════════════════");

    let work_dir = std::env::temp_dir().join(format!("price-sentry-sanity-{}", std::process::id()));
    tokio::fs::create_dir_all(&work_dir).await?;
    info!("📁 Scratch directory: {:?}", work_dir);

    scenario_1_resume_after_interruption(&work_dir).await;
    scenario_2_session_guard(&app_config).await;
    scenario_3_retention_sweep(&work_dir, &app_config).await?;

    let _ = tokio::fs::remove_dir_all(&work_dir).await;
    info!("🎉 All sanity scenarios completed");
    Ok(())
}

async fn scenario_1_resume_after_interruption(work_dir: &Path) {
    info!("═══ Scenario 1: resume after interruption ═══");

    let processing = ProcessingConfig {
        monitoring_window_size: 5,
        phase_transition_threshold: 2,
        phase1_max_price: 50.0,
        phase2_max_price: 200.0,
        max_products: None,
        max_categories: None,
    };
    let state_dir = work_dir.join("state");

    // First run: make progress through a category, then "crash" by
    // dropping the manager mid-category.
    {
        let persistence = PersistenceLayer::new(&state_dir, 3);
        let mut manager =
            ProcessingStateManager::load("acme-parts", &processing, persistence).await;
        manager
            .start_category("https://acme.example/categories/bearings", "Bearings")
            .await;
        manager
            .update_category(
                "https://acme.example/categories/bearings",
                CategoryUpdate {
                    current_page: Some(3),
                    products_found: Some(120),
                    products_processed: Some(27),
                    last_processed_product_index: Some(26),
                    ..CategoryUpdate::default()
                },
            )
            .await;
        info!("💥 Simulating interruption mid-category (page 3, product 26)");
    }

    // Second run: the resume point comes back from disk.
    let persistence = PersistenceLayer::new(&state_dir, 3);
    let mut manager = ProcessingStateManager::load("acme-parts", &processing, persistence).await;
    match manager.get_resume_point() {
        Some(resume) => info!(
            "▶️  Resuming at {} page {} product {}",
            resume.category_url, resume.page, resume.product_index
        ),
        None => info!("No resume point (unexpected for this scenario)"),
    }

    // Feed prices until the monitoring window trips the phase transition.
    for price in [12.0, 18.0, 75.0, 22.0] {
        manager.add_price_to_monitoring(price).await;
    }
    let transitioned = manager.add_price_to_monitoring(88.0).await;
    info!(
        "Price window transition fired: {} (now in {:?})",
        transitioned,
        manager.current_phase()
    );

    manager.complete_category("https://acme.example/categories/bearings").await;
    manager.mark_completed().await;
    manager.log_summary();
}

async fn scenario_2_session_guard(app_config: &AppConfig) {
    info!("═══ Scenario 2: session guard and circuit breaker ═══");

    let mut auth = app_config.auth.clone();
    auth.consecutive_failure_threshold = 2;
    auth.max_consecutive_auth_failures = 2;
    auth.auth_failure_delay_seconds = 2;

    let provider = Arc::new(FlakyLoginProvider {
        attempts: AtomicU32::new(0),
        fail_first: 2,
    });
    let mut guard = AuthSessionGuard::new(provider, auth);

    // A healthy product, then a run of price extraction failures. The
    // first two login attempts hit captchas and open the circuit.
    for price in [Some(24.99), None, None, None, None] {
        if let Some(result) = guard.ensure_session(price).await {
            info!(
                "   Login attempt via {:?}: success={} trigger={}",
                result.method_used, result.success, result.trigger
            );
        }
    }
    info!("   Circuit status while hot: {:?}", guard.circuit_status());

    info!("⏳ Waiting out the auth cooldown...");
    tokio::time::sleep(std::time::Duration::from_millis(2_500)).await;
    info!("   Circuit status after cooldown: {:?}", guard.circuit_status());

    if let Some(result) = guard.ensure_session(None).await {
        info!(
            "   Retry after cooldown: success={} trigger={}",
            result.success, result.trigger
        );
    }
    guard.log_summary();
}

async fn scenario_3_retention_sweep(work_dir: &Path, app_config: &AppConfig) -> anyhow::Result<()> {
    info!("═══ Scenario 3: cache retention sweep ═══");

    let cache_root = work_dir.join("cache");

    // TTL cache: one fresh entry, one long expired.
    seed_entry(&cache_root.join("products"), "p-100", 2, true).await?;
    seed_entry(&cache_root.join("products"), "p-stale", 400, true).await?;
    // Entry missing a required field, for validation to flag.
    seed_entry(&cache_root.join("products"), "p-partial", 2, false).await?;

    // Usage-aware cache plus the ledger that drives it.
    seed_entry(&cache_root.join("matched"), "m-linked", 3, true).await?;
    seed_entry(&cache_root.join("matched"), "m-pending", 3, true).await?;
    let ledger_path = work_dir.join("linked_products.json");
    tokio::fs::write(
        &ledger_path,
        serde_json::to_vec_pretty(&serde_json::json!({
            "m-linked": { "linked_at": Utc::now().to_rfc3339() },
        }))?,
    )
    .await?;

    // Archive cache: a report past the 30-day horizon.
    seed_entry(&cache_root.join("reports"), "r-july", 31 * 24, true).await?;

    let ledger = Arc::new(LinkedProductLedger::load(&ledger_path).await?);
    info!("   Ledger holds {} linked product(s)", ledger.len());

    let engine = CacheRetentionEngine::new(
        &app_config.retention,
        &cache_root,
        Some(ledger as Arc<dyn ProcessedLedger>),
    );

    let results = engine.clear_all(None, None).await;
    for cache_type in engine.cache_types() {
        let result = &results[&cache_type];
        info!(
            "   {} [{}]: {} removed, {} bytes freed, {} error(s)",
            cache_type,
            result.strategy_used,
            result.files_removed,
            result.bytes_freed,
            result.errors.len()
        );
    }

    let validations = engine.validate_cache("products").await;
    let invalid = validations.iter().filter(|v| !v.is_valid).count();
    info!(
        "   Validation: {} entr(ies) checked, {} invalid",
        validations.len(),
        invalid
    );

    for cache in engine.overview().await {
        info!(
            "   Overview {}: {} file(s), {} bytes",
            cache.cache_type, cache.file_count, cache.total_size_bytes
        );
    }
    Ok(())
}

async fn seed_entry(
    cache_dir: &Path,
    identity: &str,
    age_hours: i64,
    complete: bool,
) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(cache_dir).await?;
    let cached_at = (Utc::now() - chrono::Duration::hours(age_hours)).to_rfc3339();
    let body = if complete {
        serde_json::json!({
            "product_id": identity,
            "price": 12.99,
            "title": "Sanity item",
            "cached_at": cached_at,
        })
    } else {
        serde_json::json!({ "product_id": identity, "cached_at": cached_at })
    };
    tokio::fs::write(
        cache_dir.join(format!("{identity}.json")),
        serde_json::to_vec_pretty(&body)?,
    )
    .await?;
    Ok(())
}
