//! Service-level tests against in-memory stores

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::macros::{date, datetime};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;
use waveorder_shared::{BillingType, SubscriptionPlan, TenantSubscriptionStatus};

use crate::cx::CxRange;
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::models::{
    BusinessLifecycle, Feedback, LegacyDailyVisitors, OnboardingCompletion, Order, OrderItem,
    RiskSignals, TicketActivity, VisitorSession,
};
use crate::report::ReportWindow;
use crate::store::{AnalyticsStore, CxStore};
use crate::{AnalyticsService, CxService};

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct FakeAnalyticsStore {
    business_id: Option<Uuid>,
    legacy: Vec<LegacyDailyVisitors>,
    sessions: Vec<VisitorSession>,
    orders: Vec<Order>,
    fail_orders: bool,
    windows_read: Mutex<Vec<ReportWindow>>,
}

#[async_trait]
impl AnalyticsStore for FakeAnalyticsStore {
    async fn business_exists(&self, business_id: Uuid) -> AnalyticsResult<bool> {
        Ok(self.business_id == Some(business_id))
    }

    async fn legacy_daily_visitors(
        &self,
        _business_id: Uuid,
        window: &ReportWindow,
    ) -> AnalyticsResult<Vec<LegacyDailyVisitors>> {
        self.windows_read.lock().unwrap().push(*window);
        Ok(self
            .legacy
            .iter()
            .filter(|l| l.date >= window.start.date() && l.date <= window.end.date())
            .copied()
            .collect())
    }

    async fn visitor_sessions(
        &self,
        _business_id: Uuid,
        window: &ReportWindow,
    ) -> AnalyticsResult<Vec<VisitorSession>> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| window.contains(s.visited_at))
            .cloned()
            .collect())
    }

    async fn orders(
        &self,
        _business_id: Uuid,
        window: &ReportWindow,
    ) -> AnalyticsResult<Vec<Order>> {
        if self.fail_orders {
            return Err(AnalyticsError::Database("connection reset".to_string()));
        }
        Ok(self
            .orders
            .iter()
            .filter(|o| window.contains(o.created_at))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct FakeCxStore {
    feedback: Vec<Feedback>,
    businesses: Vec<BusinessLifecycle>,
    onboarding: Vec<OnboardingCompletion>,
    tickets: Vec<TicketActivity>,
    risk: Vec<RiskSignals>,
    feedback_since: Mutex<Option<OffsetDateTime>>,
}

#[async_trait]
impl CxStore for FakeCxStore {
    async fn feedback_since(&self, since: OffsetDateTime) -> AnalyticsResult<Vec<Feedback>> {
        *self.feedback_since.lock().unwrap() = Some(since);
        Ok(self
            .feedback
            .iter()
            .filter(|f| f.created_at >= since)
            .cloned()
            .collect())
    }

    async fn businesses(&self) -> AnalyticsResult<Vec<BusinessLifecycle>> {
        Ok(self.businesses.clone())
    }

    async fn onboarding_completions(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> AnalyticsResult<Vec<OnboardingCompletion>> {
        Ok(self
            .onboarding
            .iter()
            .filter(|o| o.onboarding_completed_at >= start && o.onboarding_completed_at <= end)
            .cloned()
            .collect())
    }

    async fn support_tickets(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> AnalyticsResult<Vec<TicketActivity>> {
        Ok(self
            .tickets
            .iter()
            .filter(|t| t.created_at >= start && t.created_at <= end)
            .cloned()
            .collect())
    }

    async fn risk_signals(&self, _now: OffsetDateTime) -> AnalyticsResult<Vec<RiskSignals>> {
        Ok(self.risk.clone())
    }
}

fn delivery(status: &str, payment: &str, total: f64, at: OffsetDateTime) -> Order {
    Order {
        id: Uuid::new_v4(),
        customer_id: Some(Uuid::new_v4()),
        order_type: "DELIVERY".into(),
        status: status.into(),
        payment_status: payment.into(),
        total,
        created_at: at,
        items: vec![OrderItem {
            product_id: Uuid::nil(),
            product_name: "Pizza".to_string(),
            quantity: 1,
            price: total,
        }],
    }
}

fn session(ip: &str, at: OffsetDateTime) -> VisitorSession {
    VisitorSession {
        ip_address: ip.to_string(),
        source: Some("google".to_string()),
        medium: Some("cpc".to_string()),
        campaign: None,
        placement: None,
        visited_at: at,
    }
}

// =============================================================================
// Store analytics
// =============================================================================

#[tokio::test]
async fn test_unknown_business_is_not_found() {
    let service = AnalyticsService::new(Arc::new(FakeAnalyticsStore::default()));
    let missing = Uuid::new_v4();

    let err = service
        .report(
            missing,
            datetime!(2025-03-01 00:00 UTC),
            datetime!(2025-03-31 00:00 UTC),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AnalyticsError::BusinessNotFound(id) if id == missing));
}

#[tokio::test]
async fn test_reversed_range_is_rejected() {
    let business_id = Uuid::new_v4();
    let service = AnalyticsService::new(Arc::new(FakeAnalyticsStore {
        business_id: Some(business_id),
        ..Default::default()
    }));

    let err = service
        .report(
            business_id,
            datetime!(2025-03-31 00:00 UTC),
            datetime!(2025-03-01 00:00 UTC),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AnalyticsError::InvalidRange(_)));
}

#[tokio::test]
async fn test_completed_order_predicate_end_to_end() {
    let business_id = Uuid::new_v4();
    let at = datetime!(2025-03-10 12:00 UTC);
    let service = AnalyticsService::new(Arc::new(FakeAnalyticsStore {
        business_id: Some(business_id),
        orders: vec![
            delivery("DELIVERED", "PAID", 30.0, at),
            delivery("OUT_FOR_DELIVERY", "PAID", 20.0, at),
            delivery("CANCELLED", "PAID", 10.0, at),
        ],
        ..Default::default()
    }));

    let report = service
        .report(
            business_id,
            datetime!(2025-03-01 00:00 UTC),
            datetime!(2025-03-31 00:00 UTC),
        )
        .await
        .unwrap();

    assert_eq!(report.overview.total_orders, 3);
    assert_eq!(report.overview.completed_orders, 1);
    assert_eq!(report.overview.revenue, 30.0);
    assert_eq!(report.top_products.len(), 1);
    assert_eq!(report.top_products[0].quantity, 1);
}

#[tokio::test]
async fn test_end_date_includes_the_whole_day() {
    let business_id = Uuid::new_v4();
    let service = AnalyticsService::new(Arc::new(FakeAnalyticsStore {
        business_id: Some(business_id),
        sessions: vec![session("1.1.1.1", datetime!(2025-03-31 23:30 UTC))],
        ..Default::default()
    }));

    let report = service
        .report(
            business_id,
            datetime!(2025-03-01 00:00 UTC),
            datetime!(2025-03-31 00:00 UTC),
        )
        .await
        .unwrap();

    assert_eq!(report.overview.views, 1);
    assert_eq!(report.traffic_trend.last().unwrap().date, "2025-03-31");
    assert_eq!(report.traffic_trend.last().unwrap().views, 1);
}

#[tokio::test]
async fn test_growth_against_prior_window() {
    let business_id = Uuid::new_v4();
    let store = Arc::new(FakeAnalyticsStore {
        business_id: Some(business_id),
        legacy: vec![
            LegacyDailyVisitors {
                date: date!(2025-02-20),
                visitors: 10,
            },
            LegacyDailyVisitors {
                date: date!(2025-03-05),
                visitors: 15,
            },
        ],
        sessions: vec![session("1.1.1.1", datetime!(2025-03-06 10:00 UTC))],
        orders: vec![
            delivery("DELIVERED", "PAID", 50.0, datetime!(2025-02-25 12:00 UTC)),
            delivery("DELIVERED", "PAID", 75.0, datetime!(2025-03-06 12:00 UTC)),
        ],
        ..Default::default()
    });
    let service = AnalyticsService::new(store.clone());

    let report = service
        .report(
            business_id,
            datetime!(2025-03-01 00:00 UTC),
            datetime!(2025-03-30 00:00 UTC),
        )
        .await
        .unwrap();

    // 16 views now, 10 before
    assert_eq!(report.overview.views, 16);
    assert_eq!(report.overview.views_growth, 60.0);
    assert_eq!(report.overview.revenue_growth, 50.0);

    let windows = store.windows_read.lock().unwrap();
    assert_eq!(windows.len(), 2);
    assert!(windows
        .iter()
        .any(|w| w.start == datetime!(2025-01-30 00:00 UTC)));
}

#[tokio::test]
async fn test_store_failure_aborts_report() {
    let business_id = Uuid::new_v4();
    let service = AnalyticsService::new(Arc::new(FakeAnalyticsStore {
        business_id: Some(business_id),
        fail_orders: true,
        ..Default::default()
    }));

    let err = service
        .report(
            business_id,
            datetime!(2025-03-01 00:00 UTC),
            datetime!(2025-03-31 00:00 UTC),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AnalyticsError::Database(_)));
}

// =============================================================================
// Customer experience
// =============================================================================

const NOW: OffsetDateTime = datetime!(2025-06-15 12:00 UTC);

fn business(name: &str, created: OffsetDateTime) -> BusinessLifecycle {
    BusinessLifecycle {
        id: Uuid::new_v4(),
        name: name.to_string(),
        plan: Some(SubscriptionPlan::Starter),
        billing_type: BillingType::Monthly,
        subscription_status: TenantSubscriptionStatus::Active,
        is_active: true,
        created_at: created,
        deactivated_at: None,
    }
}

#[tokio::test]
async fn test_empty_platform_reports_nulls_and_zeros() {
    let service = CxService::new(Arc::new(FakeCxStore::default()));

    let report = service.report(CxRange::Days30, NOW).await.unwrap();

    assert_eq!(report.range, "30d");
    assert_eq!(report.nps.score, None);
    assert_eq!(report.csat.score, None);
    assert_eq!(report.ces.score, None);
    assert_eq!(report.churn.rate, 0.0);
    assert_eq!(report.clv.average, 0.0);
    assert_eq!(report.support.first_contact_resolution_rate, None);
    assert!(report.at_risk.is_empty());
}

#[tokio::test]
async fn test_feedback_is_read_back_to_trend_start() {
    let store = Arc::new(FakeCxStore {
        feedback: vec![Feedback {
            business_id: Uuid::new_v4(),
            feedback_type: "NPS".to_string(),
            rating: 9,
            created_at: datetime!(2025-02-10 00:00 UTC),
        }],
        ..Default::default()
    });
    let service = CxService::new(store.clone());

    let report = service.report(CxRange::Days7, NOW).await.unwrap();

    assert_eq!(
        *store.feedback_since.lock().unwrap(),
        Some(datetime!(2025-01-01 00:00 UTC))
    );
    // Outside the 7-day window but inside the trend
    assert_eq!(report.nps.score, None);
    assert_eq!(report.nps.trend[1].month, "2025-02");
    assert_eq!(report.nps.trend[1].score, Some(100));
}

#[tokio::test]
async fn test_churn_and_clv_from_businesses() {
    let old = NOW - Duration::days(120);
    let mut churned = business("Closed Cafe", old);
    churned.is_active = false;
    churned.subscription_status = TenantSubscriptionStatus::Canceled;
    churned.deactivated_at = Some(NOW - Duration::days(10));

    let service = CxService::new(Arc::new(FakeCxStore {
        businesses: vec![business("Open Grill", old), churned],
        ..Default::default()
    }));

    let report = service.report(CxRange::Days30, NOW).await.unwrap();

    assert_eq!(report.churn.base, 2);
    assert_eq!(report.churn.churned, 1);
    assert_eq!(report.churn.rate, 50.0);
    assert_eq!(report.clv.businesses, 1);
    // Starter 19.00 for 4 whole months
    assert_eq!(report.clv.average, 76.0);
}

#[tokio::test]
async fn test_at_risk_business_listed_with_reasons() {
    let service = CxService::new(Arc::new(FakeCxStore {
        risk: vec![RiskSignals {
            business_id: Uuid::new_v4(),
            name: "Quiet Bakery".to_string(),
            orders_last_30d: 0,
            tickets_last_30d: 3,
            latest_feedback_rating: Some(2),
            last_order_at: None,
        }],
        ..Default::default()
    }));

    let report = service.report(CxRange::Days90, NOW).await.unwrap();

    assert_eq!(report.at_risk.len(), 1);
    assert_eq!(report.at_risk[0].risk_score, 90);
    assert_eq!(report.at_risk[0].reasons.len(), 3);
}
