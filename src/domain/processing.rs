//! Resumable crawl state for a single supplier session
//!
//! Holds the multi-phase processing state: per-category progress, resume
//! pointers, the bounded price-monitoring window, and the phase-transition
//! audit trail. All transition logic here is pure; persistence lives in the
//! application layer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Phase of a supplier crawl session.
///
/// Phases only move forward: `Phase1` → `Phase2` → `Completed`, with
/// `Failed` reachable from any non-terminal phase. The only way back is an
/// explicit operator reset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CrawlPhase {
    /// Crawling the lower price band.
    Phase1,
    /// Crawling the upper price band, entered once observed prices
    /// consistently exceed the Phase 1 ceiling.
    Phase2,
    Completed,
    Failed,
}

impl CrawlPhase {
    /// Returns true once no further processing is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Checks the forward-only transition rule.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Phase1, Self::Phase2)
                | (Self::Phase1 | Self::Phase2, Self::Completed | Self::Failed)
        )
    }
}

/// Price band boundaries for the two crawl phases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceRanges {
    /// Upper bound of the Phase 1 band; prices above it feed the
    /// phase-transition window.
    pub phase1_max_price: f64,

    /// Upper bound of the Phase 2 band.
    pub phase2_max_price: f64,
}

/// Progress through one supplier category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryProgress {
    pub category_url: String,
    pub category_name: String,

    /// Listing page currently being processed (1-based).
    pub current_page: u32,

    pub products_processed: u32,
    pub products_found: u32,

    /// Index of the last fully processed product within the category.
    /// `None` until the first product completes. Never decreases while the
    /// category is open; frozen once completed.
    pub last_processed_product_index: Option<u32>,

    pub is_completed: bool,
    pub error_count: u32,
    pub last_error: Option<String>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CategoryProgress {
    /// Creates progress tracking for a newly started category.
    #[must_use]
    pub fn new(category_url: &str, category_name: &str) -> Self {
        Self {
            category_url: category_url.to_string(),
            category_name: category_name.to_string(),
            current_page: 1,
            products_processed: 0,
            products_found: 0,
            last_processed_product_index: None,
            is_completed: false,
            error_count: 0,
            last_error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Product index to resume from: one past the last processed index.
    #[must_use]
    pub fn resume_index(&self) -> u32 {
        self.last_processed_product_index.map_or(0, |last| last + 1)
    }
}

/// Partial update applied to a category's progress.
///
/// Unset fields leave the stored value unchanged.
#[derive(Debug, Clone, Default)]
pub struct CategoryUpdate {
    pub current_page: Option<u32>,
    pub products_processed: Option<u32>,
    pub products_found: Option<u32>,
    pub last_processed_product_index: Option<u32>,
    pub error: Option<String>,
}

/// Immutable record of a price-driven phase transition.
///
/// Captures where the crawl stood when the monitoring window tripped, plus
/// the window itself for audit. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransitionPoint {
    pub from_phase: CrawlPhase,
    pub to_phase: CrawlPhase,
    pub category_url: String,
    pub page: u32,
    pub product_index: u32,
    pub triggered_at: DateTime<Utc>,
    pub window_snapshot: Vec<f64>,
}

/// Exact position from which an interrupted crawl continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub category_url: String,
    pub page: u32,
    pub product_index: u32,
}

/// Read-only snapshot of a session's processing state for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatistics {
    pub supplier_id: String,
    pub session_id: String,
    pub current_phase: CrawlPhase,
    pub total_products_processed: u64,
    pub total_categories_processed: u32,
    pub categories_known: usize,
    pub categories_completed: usize,
    pub global_error_count: u32,
    pub monitoring_window_fill: usize,
    pub phase_transitions: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Complete resumable state for one supplier crawl session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingState {
    pub supplier_id: String,
    pub session_id: String,
    pub current_phase: CrawlPhase,
    pub price_ranges: PriceRanges,

    /// Progress per category URL.
    pub categories_progress: HashMap<String, CategoryProgress>,

    /// Recent observed prices, oldest first, bounded by the configured
    /// window capacity.
    pub price_monitoring_window: Vec<f64>,

    /// Phase-transition audit trail, keyed by the category that tripped it.
    pub phase_transition_points: HashMap<String, PhaseTransitionPoint>,

    /// Category currently being worked on, if any.
    pub resume_from_category: Option<String>,
    pub resume_from_page: u32,
    pub resume_from_product_index: Option<u32>,

    pub total_products_processed: u64,
    pub total_categories_processed: u32,
    pub global_error_count: u32,

    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingState {
    /// Creates a fresh session state in `Phase1` for the given supplier.
    #[must_use]
    pub fn new(supplier_id: &str, price_ranges: PriceRanges) -> Self {
        let now = Utc::now();
        Self {
            supplier_id: supplier_id.to_string(),
            session_id: Uuid::new_v4().to_string(),
            current_phase: CrawlPhase::Phase1,
            price_ranges,
            categories_progress: HashMap::new(),
            price_monitoring_window: Vec::new(),
            phase_transition_points: HashMap::new(),
            resume_from_category: None,
            resume_from_page: 1,
            resume_from_product_index: None,
            total_products_processed: 0,
            total_categories_processed: 0,
            global_error_count: 0,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends a price to the monitoring window and evaluates the
    /// Phase 1 → Phase 2 transition rule.
    ///
    /// The window holds at most `window_capacity` prices, oldest evicted
    /// first. Once the window is full and the session is still in `Phase1`,
    /// the prices above `phase1_max_price` are counted; reaching
    /// `transition_threshold` advances the phase, records a
    /// [`PhaseTransitionPoint`] at the current resume position, and resets
    /// the window. Returns whether a transition happened.
    pub fn record_price(
        &mut self,
        price: f64,
        window_capacity: usize,
        transition_threshold: u32,
    ) -> bool {
        self.price_monitoring_window.push(price);
        if self.price_monitoring_window.len() > window_capacity {
            self.price_monitoring_window.remove(0);
        }
        self.touch();

        if self.current_phase != CrawlPhase::Phase1
            || self.price_monitoring_window.len() < window_capacity
        {
            return false;
        }

        let above_ceiling = self
            .price_monitoring_window
            .iter()
            .filter(|price| **price > self.price_ranges.phase1_max_price)
            .count();
        if above_ceiling < transition_threshold as usize {
            return false;
        }

        let category_url = self.resume_from_category.clone().unwrap_or_default();
        let point = PhaseTransitionPoint {
            from_phase: CrawlPhase::Phase1,
            to_phase: CrawlPhase::Phase2,
            category_url: category_url.clone(),
            page: self.resume_from_page,
            product_index: self.resume_from_product_index.unwrap_or(0),
            triggered_at: Utc::now(),
            window_snapshot: self.price_monitoring_window.clone(),
        };
        self.phase_transition_points.insert(category_url, point);
        self.current_phase = CrawlPhase::Phase2;
        self.price_monitoring_window.clear();
        true
    }

    /// Attempts a forward phase transition, refusing regressions and
    /// transitions out of a terminal phase.
    pub fn advance_phase(&mut self, next: CrawlPhase) -> bool {
        if !self.current_phase.can_advance_to(next) {
            return false;
        }
        self.current_phase = next;
        self.touch();
        true
    }

    /// Builds the reporting snapshot.
    #[must_use]
    pub fn statistics(&self) -> ProcessingStatistics {
        let categories_completed = self
            .categories_progress
            .values()
            .filter(|progress| progress.is_completed)
            .count();

        ProcessingStatistics {
            supplier_id: self.supplier_id.clone(),
            session_id: self.session_id.clone(),
            current_phase: self.current_phase,
            total_products_processed: self.total_products_processed,
            total_categories_processed: self.total_categories_processed,
            categories_known: self.categories_progress.len(),
            categories_completed,
            global_error_count: self.global_error_count,
            monitoring_window_fill: self.price_monitoring_window.len(),
            phase_transitions: self.phase_transition_points.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges() -> PriceRanges {
        PriceRanges {
            phase1_max_price: 50.0,
            phase2_max_price: 200.0,
        }
    }

    #[test]
    fn category_resume_index_starts_at_zero() {
        let progress = CategoryProgress::new("https://example.com/cat", "Widgets");
        assert_eq!(progress.resume_index(), 0);

        let mut progress = progress;
        progress.last_processed_product_index = Some(41);
        assert_eq!(progress.resume_index(), 42);
    }

    #[test]
    fn phase_transitions_are_forward_only() {
        assert!(CrawlPhase::Phase1.can_advance_to(CrawlPhase::Phase2));
        assert!(CrawlPhase::Phase1.can_advance_to(CrawlPhase::Failed));
        assert!(CrawlPhase::Phase2.can_advance_to(CrawlPhase::Completed));

        assert!(!CrawlPhase::Phase2.can_advance_to(CrawlPhase::Phase1));
        assert!(!CrawlPhase::Completed.can_advance_to(CrawlPhase::Failed));
        assert!(!CrawlPhase::Failed.can_advance_to(CrawlPhase::Phase2));
    }

    #[test]
    fn window_is_bounded_by_capacity() {
        let mut state = ProcessingState::new("supplier-a", ranges());
        for price in 0..8 {
            state.record_price(f64::from(price), 5, 99);
        }
        assert_eq!(state.price_monitoring_window.len(), 5);
        assert_eq!(state.price_monitoring_window[0], 3.0);
    }

    #[test]
    fn transition_waits_for_full_window() {
        let mut state = ProcessingState::new("supplier-a", ranges());
        // Three over-ceiling prices, but the window (capacity 5) is not full.
        assert!(!state.record_price(60.0, 5, 3));
        assert!(!state.record_price(70.0, 5, 3));
        assert!(!state.record_price(80.0, 5, 3));
        assert_eq!(state.current_phase, CrawlPhase::Phase1);
    }

    #[test]
    fn transition_fires_once_and_resets_window() {
        let mut state = ProcessingState::new("supplier-a", ranges());
        state.resume_from_category = Some("https://example.com/cat".to_string());
        state.resume_from_page = 7;
        state.resume_from_product_index = Some(12);

        for price in [10.0, 20.0, 60.0, 70.0] {
            assert!(!state.record_price(price, 5, 3));
        }
        assert!(state.record_price(80.0, 5, 3));

        assert_eq!(state.current_phase, CrawlPhase::Phase2);
        assert!(state.price_monitoring_window.is_empty());

        let point = &state.phase_transition_points["https://example.com/cat"];
        assert_eq!(point.page, 7);
        assert_eq!(point.product_index, 12);
        assert_eq!(point.window_snapshot.len(), 5);

        // Already in Phase2, the window no longer trips transitions.
        for price in [90.0, 91.0, 92.0, 93.0, 94.0] {
            assert!(!state.record_price(price, 5, 3));
        }
        assert_eq!(state.current_phase, CrawlPhase::Phase2);
    }

    #[test]
    fn below_threshold_window_never_transitions() {
        let mut state = ProcessingState::new("supplier-a", ranges());
        for price in [60.0, 10.0, 20.0, 70.0, 30.0] {
            assert!(!state.record_price(price, 5, 3));
        }
        assert_eq!(state.current_phase, CrawlPhase::Phase1);
    }

    #[test]
    fn statistics_reflect_progress() {
        let mut state = ProcessingState::new("supplier-a", ranges());
        state
            .categories_progress
            .insert("a".to_string(), CategoryProgress::new("a", "A"));
        let mut done = CategoryProgress::new("b", "B");
        done.is_completed = true;
        state.categories_progress.insert("b".to_string(), done);
        state.total_products_processed = 17;

        let stats = state.statistics();
        assert_eq!(stats.categories_known, 2);
        assert_eq!(stats.categories_completed, 1);
        assert_eq!(stats.total_products_processed, 17);
        assert_eq!(stats.current_phase, CrawlPhase::Phase1);
    }
}
