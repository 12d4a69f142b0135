// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! WaveOrder Analytics Module
//!
//! Read-only reporting over order, traffic, feedback and support data.
//!
//! ## Features
//!
//! - **Store analytics**: Per-business report for a date window with growth
//!   against the preceding window of equal length
//! - **Attribution**: Traffic and estimated orders by source, medium, campaign
//!   and placement
//! - **Customer experience**: Platform-wide NPS, CSAT, CES, churn, CLV,
//!   support and at-risk ranking

pub mod cx;
pub mod error;
pub mod models;
pub mod report;
pub mod store;

#[cfg(test)]
mod edge_case_tests;

// Error
pub use error::{AnalyticsError, AnalyticsResult};

// Report
pub use report::{AnalyticsReport, Attribution, DimensionBreakdown, DimensionStats, ReportWindow};

// Customer experience
pub use cx::{CxInputs, CxRange, CxReport};

// Store
pub use store::{AnalyticsStore, CxStore, PgAnalyticsStore};

use std::sync::Arc;

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::WindowData;

/// Per-business analytics reports
#[derive(Clone)]
pub struct AnalyticsService {
    store: Arc<dyn AnalyticsStore>,
}

impl AnalyticsService {
    pub fn new(store: Arc<dyn AnalyticsStore>) -> Self {
        Self { store }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(Arc::new(PgAnalyticsStore::new(pool)))
    }

    /// Report for the days `start..=end`, compared with the window before it
    pub async fn report(
        &self,
        business_id: Uuid,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> AnalyticsResult<AnalyticsReport> {
        let window = ReportWindow::new(start, end)?;

        if !self.store.business_exists(business_id).await? {
            return Err(AnalyticsError::BusinessNotFound(business_id));
        }

        let prior_window = window.previous();
        let (current, prior) = tokio::try_join!(
            self.window_data(business_id, &window),
            self.window_data(business_id, &prior_window),
        )?;

        tracing::debug!(
            business_id = %business_id,
            sessions = current.sessions.len(),
            orders = current.orders.len(),
            "Building analytics report"
        );

        Ok(report::build_report(business_id, window, &current, &prior))
    }

    async fn window_data(
        &self,
        business_id: Uuid,
        window: &ReportWindow,
    ) -> AnalyticsResult<WindowData> {
        let (legacy, sessions, orders) = tokio::try_join!(
            self.store.legacy_daily_visitors(business_id, window),
            self.store.visitor_sessions(business_id, window),
            self.store.orders(business_id, window),
        )?;

        Ok(WindowData {
            legacy,
            sessions,
            orders,
        })
    }
}

/// Platform-wide customer-experience report
#[derive(Clone)]
pub struct CxService {
    store: Arc<dyn CxStore>,
}

impl CxService {
    pub fn new(store: Arc<dyn CxStore>) -> Self {
        Self { store }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(Arc::new(PgAnalyticsStore::new(pool)))
    }

    pub async fn report(&self, range: CxRange, now: OffsetDateTime) -> AnalyticsResult<CxReport> {
        let start = now - range.duration();

        let (feedback, businesses, onboarding, tickets, risk) = tokio::try_join!(
            self.store.feedback_since(cx::feedback_since(range, now)),
            self.store.businesses(),
            self.store.onboarding_completions(start, now),
            self.store.support_tickets(start, now),
            self.store.risk_signals(now),
        )?;

        tracing::debug!(
            range = range.as_str(),
            feedback = feedback.len(),
            businesses = businesses.len(),
            "Scoring customer experience"
        );

        let inputs = CxInputs {
            feedback,
            businesses,
            onboarding,
            tickets,
            risk,
        };

        Ok(cx::score(range, now, &inputs))
    }
}
