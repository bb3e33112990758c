//! Processing state lifecycle management
//!
//! Owns the [`ProcessingState`] for one supplier session: loading and
//! resuming it across process restarts, applying category progress,
//! feeding the price-monitoring window, and persisting after every
//! meaningful mutation. Recovery never fails the caller; a corrupt state
//! file is quarantined and the session restarts fresh.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::processing::{
    CategoryProgress, CategoryUpdate, CrawlPhase, PriceRanges, ProcessingState,
    ProcessingStatistics, ResumePoint,
};
use crate::infrastructure::config::ProcessingConfig;
use crate::infrastructure::persistence::{PersistenceError, PersistenceLayer};

/// Manages one supplier's resumable processing state.
pub struct ProcessingStateManager {
    state: ProcessingState,
    persistence: PersistenceLayer,
    config: ProcessingConfig,
    file_name: String,
}

impl ProcessingStateManager {
    /// State file name for a supplier.
    #[must_use]
    pub fn state_file_name(supplier_id: &str) -> String {
        format!("processing_state_{supplier_id}.json")
    }

    /// Loads the supplier's persisted state, or starts a fresh session.
    ///
    /// Never fails: an unreadable state file is quarantined next to
    /// itself and replaced by a fresh `Phase1` session. Restarting from
    /// scratch beats refusing to run.
    pub async fn load(
        supplier_id: &str,
        config: &ProcessingConfig,
        persistence: PersistenceLayer,
    ) -> Self {
        let file_name = Self::state_file_name(supplier_id);

        let state = match persistence.load_json::<ProcessingState>(&file_name).await {
            Ok(Some(state)) => {
                info!(
                    "🔄 Resuming session {} for supplier '{}' in {:?} ({} products so far)",
                    state.session_id,
                    supplier_id,
                    state.current_phase,
                    state.total_products_processed
                );
                state
            }
            Ok(None) => {
                info!("Starting fresh session for supplier '{}'", supplier_id);
                Self::fresh_state(supplier_id, config)
            }
            Err(PersistenceError::Corrupt { path, source }) => {
                warn!("⚠️  State file unreadable at {:?}: {}", path, source);
                match persistence.quarantine(&file_name).await {
                    Ok(Some(quarantined)) => {
                        warn!("⚠️  Quarantined corrupt state file to {:?}", quarantined);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Failed to quarantine corrupt state file: {}", e),
                }
                Self::fresh_state(supplier_id, config)
            }
            Err(e) => {
                warn!("⚠️  Could not read state file: {}; starting fresh", e);
                Self::fresh_state(supplier_id, config)
            }
        };

        Self {
            state,
            persistence,
            config: config.clone(),
            file_name,
        }
    }

    fn fresh_state(supplier_id: &str, config: &ProcessingConfig) -> ProcessingState {
        ProcessingState::new(
            supplier_id,
            PriceRanges {
                phase1_max_price: config.phase1_max_price,
                phase2_max_price: config.phase2_max_price,
            },
        )
    }

    /// Persists the current state. Returns whether the write succeeded;
    /// a failed write is logged and never interrupts the crawl.
    pub async fn save(&self) -> bool {
        match self.persistence.save_json(&self.file_name, &self.state).await {
            Ok(()) => true,
            Err(e) => {
                warn!("❌ Failed to persist processing state: {}", e);
                false
            }
        }
    }

    /// Registers a category and makes it the active resume target.
    ///
    /// Idempotent: a category already known keeps its accumulated progress,
    /// and a completed one is not reopened.
    pub async fn start_category(&mut self, category_url: &str, category_name: &str) -> CategoryProgress {
        let progress = self
            .state
            .categories_progress
            .entry(category_url.to_string())
            .or_insert_with(|| {
                info!("📂 Starting category '{}' ({})", category_name, category_url);
                CategoryProgress::new(category_url, category_name)
            })
            .clone();

        if !progress.is_completed {
            self.state.resume_from_category = Some(category_url.to_string());
            self.state.resume_from_page = progress.current_page;
            self.state.resume_from_product_index = progress.last_processed_product_index;
        }
        self.state.touch();
        self.save().await;
        progress
    }

    /// Applies a partial progress update to a category.
    ///
    /// Unknown and completed categories are rejected, and the
    /// last-processed product index never moves backwards.
    pub async fn update_category(&mut self, category_url: &str, update: CategoryUpdate) -> bool {
        let had_error = update.error.is_some();

        let Some(progress) = self.state.categories_progress.get_mut(category_url) else {
            warn!("⚠️  Progress update for unknown category: {}", category_url);
            return false;
        };
        if progress.is_completed {
            warn!("⚠️  Ignoring update for completed category: {}", category_url);
            return false;
        }

        let mut processed_delta: u64 = 0;
        if let Some(page) = update.current_page {
            progress.current_page = page;
        }
        if let Some(found) = update.products_found {
            progress.products_found = found;
        }
        if let Some(processed) = update.products_processed {
            processed_delta = u64::from(processed.saturating_sub(progress.products_processed));
            progress.products_processed = processed;
        }
        if let Some(index) = update.last_processed_product_index {
            if progress.last_processed_product_index.is_some_and(|last| index < last) {
                warn!(
                    "⚠️  Ignoring product index regression in '{}': {} behind {:?}",
                    category_url, index, progress.last_processed_product_index
                );
            } else {
                progress.last_processed_product_index = Some(index);
            }
        }
        if let Some(error) = update.error {
            progress.error_count += 1;
            progress.last_error = Some(error);
        }

        let page = progress.current_page;
        let last_index = progress.last_processed_product_index;

        self.state.resume_from_category = Some(category_url.to_string());
        self.state.resume_from_page = page;
        self.state.resume_from_product_index = last_index;
        self.state.total_products_processed += processed_delta;
        if had_error {
            self.state.global_error_count += 1;
        }
        self.state.touch();
        self.save().await;
        true
    }

    /// Marks a category finished and freezes its progress.
    pub async fn complete_category(&mut self, category_url: &str) -> bool {
        let Some(progress) = self.state.categories_progress.get_mut(category_url) else {
            warn!("⚠️  Completion for unknown category: {}", category_url);
            return false;
        };
        if progress.is_completed {
            debug!("Category already completed: {}", category_url);
            return false;
        }

        progress.is_completed = true;
        progress.completed_at = Some(Utc::now());
        let products = progress.products_processed;

        self.state.total_categories_processed += 1;
        if self.state.resume_from_category.as_deref() == Some(category_url) {
            self.state.resume_from_category = None;
            self.state.resume_from_page = 1;
            self.state.resume_from_product_index = None;
        }
        info!("✅ Category completed: {} ({} products)", category_url, products);
        self.state.touch();
        self.save().await;
        true
    }

    /// Where an interrupted crawl should continue.
    ///
    /// Prefers the active resume pointers; falls back to the
    /// earliest-started incomplete category; `None` when nothing is left.
    /// The returned index is the next product to process, not the last
    /// one finished.
    #[must_use]
    pub fn get_resume_point(&self) -> Option<ResumePoint> {
        if let Some(category_url) = &self.state.resume_from_category {
            if let Some(progress) = self.state.categories_progress.get(category_url) {
                if !progress.is_completed {
                    return Some(ResumePoint {
                        category_url: category_url.clone(),
                        page: self.state.resume_from_page,
                        product_index: self
                            .state
                            .resume_from_product_index
                            .map_or(0, |last| last + 1),
                    });
                }
            }
        }

        self.state
            .categories_progress
            .values()
            .filter(|progress| !progress.is_completed)
            .min_by_key(|progress| progress.started_at)
            .map(|progress| ResumePoint {
                category_url: progress.category_url.clone(),
                page: progress.current_page,
                product_index: progress.resume_index(),
            })
    }

    /// Feeds a price into the monitoring window. Returns whether the
    /// Phase 1 → Phase 2 transition fired.
    pub async fn add_price_to_monitoring(&mut self, price: f64) -> bool {
        let transitioned = self.state.record_price(
            price,
            self.config.monitoring_window_size,
            self.config.phase_transition_threshold,
        );
        if transitioned {
            info!(
                "🔄 Price window tripped for supplier '{}': advancing to {:?}",
                self.state.supplier_id, self.state.current_phase
            );
        }
        self.save().await;
        transitioned
    }

    /// Whether the session may keep processing: not in a terminal phase
    /// and below the configured ceilings.
    #[must_use]
    pub fn should_continue(&self) -> bool {
        if self.state.current_phase.is_terminal() {
            return false;
        }
        if let Some(max) = self.config.max_products {
            if self.state.total_products_processed >= max {
                return false;
            }
        }
        if let Some(max) = self.config.max_categories {
            if self.state.total_categories_processed >= max {
                return false;
            }
        }
        true
    }

    /// Moves the session into `Completed`.
    pub async fn mark_completed(&mut self) -> bool {
        if !self.state.advance_phase(CrawlPhase::Completed) {
            warn!(
                "⚠️  Cannot complete session from {:?}",
                self.state.current_phase
            );
            return false;
        }
        info!(
            "🎉 Session {} completed for supplier '{}'",
            self.state.session_id, self.state.supplier_id
        );
        self.save().await;
        true
    }

    /// Moves the session into `Failed` and records the reason.
    pub async fn mark_failed(&mut self, reason: &str) -> bool {
        if !self.state.advance_phase(CrawlPhase::Failed) {
            warn!("⚠️  Cannot fail session from {:?}", self.state.current_phase);
            return false;
        }
        self.state.failure_reason = Some(reason.to_string());
        warn!(
            "❌ Session {} failed for supplier '{}': {}",
            self.state.session_id, self.state.supplier_id, reason
        );
        self.save().await;
        true
    }

    /// Discards all progress and starts a brand-new session.
    pub async fn reset(&mut self) {
        info!(
            "🔄 Resetting session for supplier '{}'",
            self.state.supplier_id
        );
        let supplier_id = self.state.supplier_id.clone();
        self.state = Self::fresh_state(&supplier_id, &self.config);
        self.save().await;
    }

    #[must_use]
    pub fn statistics(&self) -> ProcessingStatistics {
        self.state.statistics()
    }

    #[must_use]
    pub fn state(&self) -> &ProcessingState {
        &self.state
    }

    #[must_use]
    pub fn current_phase(&self) -> CrawlPhase {
        self.state.current_phase
    }

    /// Logs a human-readable session summary.
    pub fn log_summary(&self) {
        let stats = self.statistics();
        info!("📊 Session summary for supplier '{}'", stats.supplier_id);
        info!("   Phase: {:?}", stats.current_phase);
        info!("   Products processed: {}", stats.total_products_processed);
        info!(
            "   Categories: {}/{} completed",
            stats.categories_completed, stats.categories_known
        );
        info!("   Phase transitions: {}", stats.phase_transitions);
        info!("   Errors: {}", stats.global_error_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config() -> ProcessingConfig {
        ProcessingConfig {
            monitoring_window_size: 3,
            phase_transition_threshold: 2,
            phase1_max_price: 50.0,
            phase2_max_price: 200.0,
            max_products: None,
            max_categories: None,
        }
    }

    async fn manager_in(dir: &TempDir, config: &ProcessingConfig) -> ProcessingStateManager {
        ProcessingStateManager::load(
            "supplier-a",
            config,
            PersistenceLayer::new(dir.path(), 3),
        )
        .await
    }

    #[tokio::test]
    async fn fresh_session_starts_in_phase1() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, &test_config()).await;

        assert_eq!(manager.current_phase(), CrawlPhase::Phase1);
        assert!(manager.get_resume_point().is_none());
        assert!(manager.should_continue());
    }

    #[tokio::test]
    async fn progress_survives_reload() {
        let dir = TempDir::new().unwrap();
        let config = test_config();
        let session_id;
        {
            let mut manager = manager_in(&dir, &config).await;
            session_id = manager.state().session_id.clone();
            manager.start_category("https://shop.example/widgets", "Widgets").await;
            manager
                .update_category(
                    "https://shop.example/widgets",
                    CategoryUpdate {
                        current_page: Some(3),
                        products_processed: Some(8),
                        last_processed_product_index: Some(7),
                        ..CategoryUpdate::default()
                    },
                )
                .await;
        }

        let manager = manager_in(&dir, &config).await;
        assert_eq!(manager.state().session_id, session_id);

        let resume = manager.get_resume_point().unwrap();
        assert_eq!(resume.category_url, "https://shop.example/widgets");
        assert_eq!(resume.page, 3);
        assert_eq!(resume.product_index, 8);
        assert_eq!(manager.state().total_products_processed, 8);
    }

    #[tokio::test]
    async fn completed_category_is_frozen() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_in(&dir, &test_config()).await;

        manager.start_category("cat-1", "One").await;
        manager.complete_category("cat-1").await;

        let accepted = manager
            .update_category(
                "cat-1",
                CategoryUpdate {
                    products_processed: Some(99),
                    ..CategoryUpdate::default()
                },
            )
            .await;

        assert!(!accepted);
        assert_eq!(
            manager.state().categories_progress["cat-1"].products_processed,
            0
        );
        // Completing twice does not double-count.
        assert!(!manager.complete_category("cat-1").await);
        assert_eq!(manager.state().total_categories_processed, 1);
    }

    #[tokio::test]
    async fn unknown_category_update_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_in(&dir, &test_config()).await;
        assert!(!manager.update_category("never-started", CategoryUpdate::default()).await);
    }

    #[tokio::test]
    async fn resume_falls_back_to_earliest_incomplete_category() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_in(&dir, &test_config()).await;

        manager.start_category("cat-early", "Early").await;
        manager.start_category("cat-late", "Late").await;
        manager.complete_category("cat-late").await;

        let resume = manager.get_resume_point().unwrap();
        assert_eq!(resume.category_url, "cat-early");
        assert_eq!(resume.page, 1);
        assert_eq!(resume.product_index, 0);
    }

    #[tokio::test]
    async fn corrupt_state_file_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let persistence = PersistenceLayer::new(dir.path(), 3);
        let file_name = ProcessingStateManager::state_file_name("supplier-a");
        std::fs::write(persistence.file_path(&file_name), "{not json at all").unwrap();

        let manager = manager_in(&dir, &test_config()).await;

        assert_eq!(manager.current_phase(), CrawlPhase::Phase1);
        assert_eq!(manager.state().total_products_processed, 0);
        assert!(persistence
            .file_path(&file_name)
            .with_extension("json.corrupted")
            .exists());
    }

    #[tokio::test]
    async fn product_index_never_regresses() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_in(&dir, &test_config()).await;
        manager.start_category("cat-1", "One").await;

        manager
            .update_category(
                "cat-1",
                CategoryUpdate {
                    last_processed_product_index: Some(10),
                    ..CategoryUpdate::default()
                },
            )
            .await;
        manager
            .update_category(
                "cat-1",
                CategoryUpdate {
                    last_processed_product_index: Some(4),
                    ..CategoryUpdate::default()
                },
            )
            .await;

        let resume = manager.get_resume_point().unwrap();
        assert_eq!(resume.product_index, 11);
    }

    #[tokio::test]
    async fn product_ceiling_stops_the_run() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config();
        config.max_products = Some(5);
        let mut manager = manager_in(&dir, &config).await;

        manager.start_category("cat-1", "One").await;
        manager
            .update_category(
                "cat-1",
                CategoryUpdate {
                    products_processed: Some(5),
                    ..CategoryUpdate::default()
                },
            )
            .await;

        assert!(!manager.should_continue());
    }

    #[tokio::test]
    async fn phase_transition_is_recorded_with_position() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_in(&dir, &test_config()).await;

        manager.start_category("cat-1", "One").await;
        manager
            .update_category(
                "cat-1",
                CategoryUpdate {
                    current_page: Some(4),
                    last_processed_product_index: Some(9),
                    ..CategoryUpdate::default()
                },
            )
            .await;

        assert!(!manager.add_price_to_monitoring(60.0).await);
        assert!(!manager.add_price_to_monitoring(70.0).await);
        assert!(manager.add_price_to_monitoring(80.0).await);

        assert_eq!(manager.current_phase(), CrawlPhase::Phase2);
        let point = &manager.state().phase_transition_points["cat-1"];
        assert_eq!(point.page, 4);
        assert_eq!(point.product_index, 9);

        // Terminal transitions still work afterwards.
        assert!(manager.mark_completed().await);
        assert!(!manager.should_continue());
    }

    #[tokio::test]
    async fn failed_session_records_reason_and_reset_clears_it() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_in(&dir, &test_config()).await;

        assert!(manager.mark_failed("login wall unbreakable").await);
        assert_eq!(manager.current_phase(), CrawlPhase::Failed);
        assert_eq!(
            manager.state().failure_reason.as_deref(),
            Some("login wall unbreakable")
        );
        // Terminal phases refuse further transitions.
        assert!(!manager.mark_completed().await);

        let old_session = manager.state().session_id.clone();
        manager.reset().await;
        assert_eq!(manager.current_phase(), CrawlPhase::Phase1);
        assert!(manager.state().failure_reason.is_none());
        assert_ne!(manager.state().session_id, old_session);
    }
}
