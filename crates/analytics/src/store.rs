//! Read-only queries behind the aggregator and the scorer

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use time::{Date, OffsetDateTime};
use uuid::Uuid;
use waveorder_shared::{BillingType, SubscriptionPlan, TenantSubscriptionStatus};

use crate::error::AnalyticsResult;
use crate::models::{
    BusinessLifecycle, Feedback, LegacyDailyVisitors, OnboardingCompletion, Order, OrderItem,
    RiskSignals, TicketActivity, VisitorSession,
};
use crate::report::ReportWindow;

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn business_exists(&self, business_id: Uuid) -> AnalyticsResult<bool>;

    async fn legacy_daily_visitors(
        &self,
        business_id: Uuid,
        window: &ReportWindow,
    ) -> AnalyticsResult<Vec<LegacyDailyVisitors>>;

    async fn visitor_sessions(
        &self,
        business_id: Uuid,
        window: &ReportWindow,
    ) -> AnalyticsResult<Vec<VisitorSession>>;

    /// Orders created in the window, with their line items
    async fn orders(&self, business_id: Uuid, window: &ReportWindow)
        -> AnalyticsResult<Vec<Order>>;
}

#[async_trait]
pub trait CxStore: Send + Sync {
    async fn feedback_since(&self, since: OffsetDateTime) -> AnalyticsResult<Vec<Feedback>>;

    /// Every business, active or not
    async fn businesses(&self) -> AnalyticsResult<Vec<BusinessLifecycle>>;

    /// Businesses that finished onboarding in `[start, end]`
    async fn onboarding_completions(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> AnalyticsResult<Vec<OnboardingCompletion>>;

    /// Tickets opened in `[start, end]` with their comment times
    async fn support_tickets(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> AnalyticsResult<Vec<TicketActivity>>;

    /// One row per active business
    async fn risk_signals(&self, now: OffsetDateTime) -> AnalyticsResult<Vec<RiskSignals>>;
}

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct LegacyRow {
    date: Date,
    visitors: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    ip_address: String,
    source: Option<String>,
    medium: Option<String>,
    campaign: Option<String>,
    placement: Option<String>,
    visited_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    customer_id: Option<Uuid>,
    order_type: String,
    status: String,
    payment_status: String,
    total: f64,
    created_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    order_id: Uuid,
    product_id: Uuid,
    product_name: String,
    quantity: i32,
    price: f64,
}

#[derive(Debug, sqlx::FromRow)]
struct FeedbackRow {
    business_id: Uuid,
    feedback_type: String,
    rating: i32,
    created_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct LifecycleRow {
    id: Uuid,
    name: String,
    subscription_plan: String,
    billing_type: Option<String>,
    subscription_status: String,
    is_active: bool,
    created_at: OffsetDateTime,
    deactivated_at: Option<OffsetDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
struct OnboardingRow {
    id: Uuid,
    created_at: OffsetDateTime,
    onboarding_completed_at: OffsetDateTime,
    first_order_at: Option<OffsetDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    status: String,
    created_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct CommentRow {
    ticket_id: Uuid,
    created_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct RiskRow {
    business_id: Uuid,
    name: String,
    orders_last_30d: i64,
    tickets_last_30d: i64,
    latest_feedback_rating: Option<i32>,
    last_order_at: Option<OffsetDateTime>,
}

// =============================================================================
// Postgres
// =============================================================================

/// Postgres-backed [`AnalyticsStore`] and [`CxStore`]
#[derive(Clone)]
pub struct PgAnalyticsStore {
    pool: PgPool,
}

impl PgAnalyticsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalyticsStore for PgAnalyticsStore {
    async fn business_exists(&self, business_id: Uuid) -> AnalyticsResult<bool> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM businesses WHERE id = $1)")
                .bind(business_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists.0)
    }

    async fn legacy_daily_visitors(
        &self,
        business_id: Uuid,
        window: &ReportWindow,
    ) -> AnalyticsResult<Vec<LegacyDailyVisitors>> {
        let rows: Vec<LegacyRow> = sqlx::query_as(
            r#"
            SELECT date, visitors
            FROM analytics
            WHERE business_id = $1 AND date BETWEEN $2 AND $3
            ORDER BY date
            "#,
        )
        .bind(business_id)
        .bind(window.start.date())
        .bind(window.end.date())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| LegacyDailyVisitors {
                date: r.date,
                visitors: r.visitors as i64,
            })
            .collect())
    }

    async fn visitor_sessions(
        &self,
        business_id: Uuid,
        window: &ReportWindow,
    ) -> AnalyticsResult<Vec<VisitorSession>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
            SELECT ip_address, source, medium, campaign, placement, visited_at
            FROM visitor_sessions
            WHERE business_id = $1 AND visited_at BETWEEN $2 AND $3
            ORDER BY visited_at
            "#,
        )
        .bind(business_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| VisitorSession {
                ip_address: r.ip_address,
                source: r.source,
                medium: r.medium,
                campaign: r.campaign,
                placement: r.placement,
                visited_at: r.visited_at,
            })
            .collect())
    }

    async fn orders(
        &self,
        business_id: Uuid,
        window: &ReportWindow,
    ) -> AnalyticsResult<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(
            r#"
            SELECT id, customer_id, type AS order_type, status, payment_status, total, created_at
            FROM orders
            WHERE business_id = $1 AND created_at BETWEEN $2 AND $3
            ORDER BY created_at
            "#,
        )
        .bind(business_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let order_ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let items: Vec<OrderItemRow> = sqlx::query_as(
            r#"
            SELECT oi.order_id, oi.product_id, p.name AS product_name, oi.quantity, oi.price
            FROM order_items oi
            JOIN products p ON p.id = oi.product_id
            WHERE oi.order_id = ANY($1)
            "#,
        )
        .bind(&order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items_by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for item in items {
            items_by_order
                .entry(item.order_id)
                .or_default()
                .push(OrderItem {
                    product_id: item.product_id,
                    product_name: item.product_name,
                    quantity: item.quantity as i64,
                    price: item.price,
                });
        }

        Ok(rows
            .into_iter()
            .map(|r| Order {
                items: items_by_order.remove(&r.id).unwrap_or_default(),
                id: r.id,
                customer_id: r.customer_id,
                order_type: r.order_type.as_str().into(),
                status: r.status.as_str().into(),
                payment_status: r.payment_status.as_str().into(),
                total: r.total,
                created_at: r.created_at,
            })
            .collect())
    }
}

#[async_trait]
impl CxStore for PgAnalyticsStore {
    async fn feedback_since(&self, since: OffsetDateTime) -> AnalyticsResult<Vec<Feedback>> {
        let rows: Vec<FeedbackRow> = sqlx::query_as(
            r#"
            SELECT business_id, type AS feedback_type, rating, created_at
            FROM feedback
            WHERE created_at >= $1
            ORDER BY created_at
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Feedback {
                business_id: r.business_id,
                feedback_type: r.feedback_type,
                rating: r.rating,
                created_at: r.created_at,
            })
            .collect())
    }

    async fn businesses(&self) -> AnalyticsResult<Vec<BusinessLifecycle>> {
        let rows: Vec<LifecycleRow> = sqlx::query_as(
            r#"
            SELECT id, name, subscription_plan, billing_type, subscription_status,
                   is_active, created_at, deactivated_at
            FROM businesses
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let plan = match SubscriptionPlan::from_stored(&r.subscription_plan) {
                    Ok(plan) => Some(plan),
                    Err(e) => {
                        tracing::warn!(business_id = %r.id, error = %e, "Skipping undecodable plan");
                        None
                    }
                };
                BusinessLifecycle {
                    id: r.id,
                    name: r.name,
                    plan,
                    billing_type: BillingType::from_stored(r.billing_type.as_deref()),
                    subscription_status: TenantSubscriptionStatus::from(r.subscription_status),
                    is_active: r.is_active,
                    created_at: r.created_at,
                    deactivated_at: r.deactivated_at,
                }
            })
            .collect())
    }

    async fn onboarding_completions(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> AnalyticsResult<Vec<OnboardingCompletion>> {
        let rows: Vec<OnboardingRow> = sqlx::query_as(
            r#"
            SELECT b.id, b.created_at, b.onboarding_completed_at,
                   (SELECT MIN(o.created_at) FROM orders o WHERE o.business_id = b.id) AS first_order_at
            FROM businesses b
            WHERE b.onboarding_completed_at BETWEEN $1 AND $2
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| OnboardingCompletion {
                business_id: r.id,
                created_at: r.created_at,
                onboarding_completed_at: r.onboarding_completed_at,
                first_order_at: r.first_order_at,
            })
            .collect())
    }

    async fn support_tickets(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> AnalyticsResult<Vec<TicketActivity>> {
        let tickets: Vec<TicketRow> = sqlx::query_as(
            r#"
            SELECT id, status, created_at
            FROM support_tickets
            WHERE created_at BETWEEN $1 AND $2
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        if tickets.is_empty() {
            return Ok(Vec::new());
        }

        let ticket_ids: Vec<Uuid> = tickets.iter().map(|t| t.id).collect();
        let comments: Vec<CommentRow> = sqlx::query_as(
            r#"
            SELECT ticket_id, created_at
            FROM support_ticket_comments
            WHERE ticket_id = ANY($1)
            ORDER BY created_at
            "#,
        )
        .bind(&ticket_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut comment_times: HashMap<Uuid, Vec<OffsetDateTime>> = HashMap::new();
        for comment in comments {
            comment_times
                .entry(comment.ticket_id)
                .or_default()
                .push(comment.created_at);
        }

        Ok(tickets
            .into_iter()
            .map(|t| TicketActivity {
                comment_times: comment_times.remove(&t.id).unwrap_or_default(),
                id: t.id,
                status: t.status,
                created_at: t.created_at,
            })
            .collect())
    }

    async fn risk_signals(&self, now: OffsetDateTime) -> AnalyticsResult<Vec<RiskSignals>> {
        let rows: Vec<RiskRow> = sqlx::query_as(
            r#"
            SELECT b.id AS business_id, b.name,
                   (SELECT COUNT(*) FROM orders o
                    WHERE o.business_id = b.id AND o.created_at >= $1) AS orders_last_30d,
                   (SELECT COUNT(*) FROM support_tickets t
                    WHERE t.business_id = b.id AND t.created_at >= $1) AS tickets_last_30d,
                   (SELECT f.rating FROM feedback f
                    WHERE f.business_id = b.id AND f.created_at >= $2
                    ORDER BY f.created_at DESC
                    LIMIT 1) AS latest_feedback_rating,
                   (SELECT MAX(o.created_at) FROM orders o
                    WHERE o.business_id = b.id) AS last_order_at
            FROM businesses b
            WHERE b.is_active = TRUE
            "#,
        )
        .bind(now - time::Duration::days(30))
        .bind(now - time::Duration::days(90))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| RiskSignals {
                business_id: r.business_id,
                name: r.name,
                orders_last_30d: r.orders_last_30d,
                tickets_last_30d: r.tickets_last_30d,
                latest_feedback_rating: r.latest_feedback_rating,
                last_order_at: r.last_order_at,
            })
            .collect())
    }
}
