//! Local billing state
//!
//! [`BillingStore`] is everything the reconciler reads from or writes to the
//! application database. [`PgBillingStore`] is the Postgres implementation.

use async_trait::async_trait;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;
use waveorder_shared::{BillingType, SubscriptionPlan, TenantSubscriptionStatus};

use crate::error::{BillingError, BillingResult};
use crate::events::AuditEvent;

/// Business fields the reconciler compares against the processor
#[derive(Debug, Clone, PartialEq)]
pub struct BusinessBilling {
    pub id: Uuid,
    pub name: String,
    pub plan: SubscriptionPlan,
    pub billing_type: BillingType,
    pub subscription_status: TenantSubscriptionStatus,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub grace_ends_at: Option<OffsetDateTime>,
    pub is_active: bool,
}

/// The user whose processor customer pays for the business
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingOwner {
    pub user_id: Uuid,
    pub stripe_customer_id: Option<String>,
    pub billing_subscription_id: Option<Uuid>,
}

/// Local mirror of one processor subscription
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LocalSubscription {
    pub id: Uuid,
    pub stripe_subscription_id: String,
    pub status: String,
    pub price_id: Option<String>,
    pub plan: String,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
}

/// Everything loaded for one reconciliation run
#[derive(Debug, Clone, PartialEq)]
pub struct TenantBilling {
    pub business: BusinessBilling,
    pub owner: Option<BillingOwner>,
    pub local_subscription: Option<LocalSubscription>,
}

impl TenantBilling {
    pub fn stripe_customer_id(&self) -> Option<&str> {
        self.owner
            .as_ref()
            .and_then(|o| o.stripe_customer_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

/// Field values written to a local subscription record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRecord {
    pub stripe_subscription_id: String,
    pub status: String,
    pub price_id: Option<String>,
    pub plan: SubscriptionPlan,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
}

/// Plan and status written back to the business row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessBillingUpdate {
    pub plan: SubscriptionPlan,
    /// Left unchanged when `None`
    pub billing_type: Option<BillingType>,
    pub subscription_status: TenantSubscriptionStatus,
    pub clear_trial: bool,
    pub clear_grace: bool,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn load_tenant(&self, business_id: Uuid) -> BillingResult<Option<TenantBilling>>;

    /// Create (or adopt) the record for `record.stripe_subscription_id` and
    /// link it to the owner. Returns the record id.
    async fn create_local_subscription(
        &self,
        owner_user_id: Uuid,
        record: &SubscriptionRecord,
    ) -> BillingResult<Uuid>;

    async fn update_local_subscription(
        &self,
        subscription_id: Uuid,
        record: &SubscriptionRecord,
    ) -> BillingResult<()>;

    /// Clear the owner's link if it still points at `subscription_id`.
    /// Returns whether a link was cleared.
    async fn unlink_local_subscription(
        &self,
        owner_user_id: Uuid,
        subscription_id: Uuid,
    ) -> BillingResult<bool>;

    async fn delete_local_subscription(&self, subscription_id: Uuid) -> BillingResult<()>;

    async fn update_business_billing(
        &self,
        business_id: Uuid,
        update: &BusinessBillingUpdate,
    ) -> BillingResult<()>;

    async fn stamp_sync_check(
        &self,
        business_id: Uuid,
        status: &str,
        checked_at: OffsetDateTime,
    ) -> BillingResult<()>;

    /// Take the per-business fix lock unless an unexpired one is held
    async fn try_acquire_fix_lock(
        &self,
        business_id: Uuid,
        now: OffsetDateTime,
        ttl: Duration,
    ) -> BillingResult<bool>;

    async fn release_fix_lock(&self, business_id: Uuid) -> BillingResult<()>;

    async fn log_event(&self, event: &AuditEvent) -> BillingResult<()>;

    /// Active businesses whose owner has a processor customer
    async fn sweep_candidates(&self) -> BillingResult<Vec<Uuid>>;
}

#[derive(Debug, sqlx::FromRow)]
struct TenantRow {
    id: Uuid,
    name: String,
    subscription_plan: String,
    billing_type: Option<String>,
    subscription_status: String,
    trial_ends_at: Option<OffsetDateTime>,
    grace_ends_at: Option<OffsetDateTime>,
    is_active: bool,
    owner_id: Option<Uuid>,
    stripe_customer_id: Option<String>,
    billing_subscription_id: Option<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct IdRow {
    id: Uuid,
}

/// Postgres-backed [`BillingStore`]
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn load_tenant(&self, business_id: Uuid) -> BillingResult<Option<TenantBilling>> {
        let row: Option<TenantRow> = sqlx::query_as(
            r#"
            SELECT b.id, b.name, b.subscription_plan, b.billing_type, b.subscription_status,
                   b.trial_ends_at, b.grace_ends_at, b.is_active,
                   u.id AS owner_id, u.stripe_customer_id, u.billing_subscription_id
            FROM businesses b
            LEFT JOIN LATERAL (
                SELECT bu.user_id
                FROM business_users bu
                WHERE bu.business_id = b.id AND bu.role = 'OWNER'
                ORDER BY bu.created_at
                LIMIT 1
            ) o ON TRUE
            LEFT JOIN users u ON u.id = o.user_id
            WHERE b.id = $1
            "#,
        )
        .bind(business_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let plan = SubscriptionPlan::from_stored(&row.subscription_plan).map_err(|e| {
            BillingError::Database(format!("business {} has invalid plan: {}", row.id, e))
        })?;

        let local_subscription = match row.billing_subscription_id {
            Some(sub_id) => {
                sqlx::query_as::<_, LocalSubscription>(
                    r#"
                    SELECT id, stripe_subscription_id, status, price_id, plan,
                           current_period_end, cancel_at_period_end
                    FROM billing_subscriptions
                    WHERE id = $1
                    "#,
                )
                .bind(sub_id)
                .fetch_optional(&self.pool)
                .await?
            }
            None => None,
        };

        let owner = row.owner_id.map(|user_id| BillingOwner {
            user_id,
            stripe_customer_id: row.stripe_customer_id.clone(),
            billing_subscription_id: row.billing_subscription_id,
        });

        Ok(Some(TenantBilling {
            business: BusinessBilling {
                id: row.id,
                name: row.name,
                plan,
                billing_type: BillingType::from_stored(row.billing_type.as_deref()),
                subscription_status: TenantSubscriptionStatus::from(row.subscription_status),
                trial_ends_at: row.trial_ends_at,
                grace_ends_at: row.grace_ends_at,
                is_active: row.is_active,
            },
            owner,
            local_subscription,
        }))
    }

    async fn create_local_subscription(
        &self,
        owner_user_id: Uuid,
        record: &SubscriptionRecord,
    ) -> BillingResult<Uuid> {
        let mut tx = self.pool.begin().await?;

        // The Stripe id is unique, so a stale unlinked row is adopted instead
        let created: IdRow = sqlx::query_as(
            r#"
            INSERT INTO billing_subscriptions (
                id, stripe_subscription_id, status, price_id, plan,
                current_period_end, cancel_at_period_end
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (stripe_subscription_id) DO UPDATE SET
                status = EXCLUDED.status,
                price_id = EXCLUDED.price_id,
                plan = EXCLUDED.plan,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.stripe_subscription_id)
        .bind(&record.status)
        .bind(&record.price_id)
        .bind(record.plan.as_str())
        .bind(record.current_period_end)
        .bind(record.cancel_at_period_end)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET billing_subscription_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(created.id)
            .bind(owner_user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(created.id)
    }

    async fn update_local_subscription(
        &self,
        subscription_id: Uuid,
        record: &SubscriptionRecord,
    ) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE billing_subscriptions
            SET stripe_subscription_id = $2, status = $3, price_id = $4, plan = $5,
                current_period_end = $6, cancel_at_period_end = $7, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(subscription_id)
        .bind(&record.stripe_subscription_id)
        .bind(&record.status)
        .bind(&record.price_id)
        .bind(record.plan.as_str())
        .bind(record.current_period_end)
        .bind(record.cancel_at_period_end)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::Database(format!(
                "billing subscription {} not found",
                subscription_id
            )));
        }
        Ok(())
    }

    async fn unlink_local_subscription(
        &self,
        owner_user_id: Uuid,
        subscription_id: Uuid,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users SET billing_subscription_id = NULL, updated_at = NOW()
            WHERE id = $1 AND billing_subscription_id = $2
            "#,
        )
        .bind(owner_user_id)
        .bind(subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_local_subscription(&self, subscription_id: Uuid) -> BillingResult<()> {
        sqlx::query("DELETE FROM billing_subscriptions WHERE id = $1")
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_business_billing(
        &self,
        business_id: Uuid,
        update: &BusinessBillingUpdate,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE businesses
            SET subscription_plan = $2,
                subscription_status = $3,
                billing_type = COALESCE($4, billing_type),
                trial_ends_at = CASE WHEN $5 THEN NULL ELSE trial_ends_at END,
                grace_ends_at = CASE WHEN $6 THEN NULL ELSE grace_ends_at END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(business_id)
        .bind(update.plan.as_str())
        .bind(update.subscription_status.as_str())
        .bind(update.billing_type.map(|b| b.as_str()))
        .bind(update.clear_trial)
        .bind(update.clear_grace)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stamp_sync_check(
        &self,
        business_id: Uuid,
        status: &str,
        checked_at: OffsetDateTime,
    ) -> BillingResult<()> {
        sqlx::query(
            "UPDATE businesses SET stripe_sync_checked_at = $2, stripe_sync_status = $3 WHERE id = $1",
        )
        .bind(business_id)
        .bind(checked_at)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_acquire_fix_lock(
        &self,
        business_id: Uuid,
        now: OffsetDateTime,
        ttl: Duration,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE businesses
            SET stripe_sync_locked_until = $3
            WHERE id = $1
              AND (stripe_sync_locked_until IS NULL OR stripe_sync_locked_until < $2)
            "#,
        )
        .bind(business_id)
        .bind(now)
        .bind(now + ttl)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_fix_lock(&self, business_id: Uuid) -> BillingResult<()> {
        sqlx::query("UPDATE businesses SET stripe_sync_locked_until = NULL WHERE id = $1")
            .bind(business_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn log_event(&self, event: &AuditEvent) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO superadmin_audit_logs (id, admin_user_id, action, business_id, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.actor_id)
        .bind(event.action.as_str())
        .bind(event.business_id)
        .bind(&event.details)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sweep_candidates(&self) -> BillingResult<Vec<Uuid>> {
        let rows: Vec<IdRow> = sqlx::query_as(
            r#"
            SELECT DISTINCT b.id, b.created_at
            FROM businesses b
            JOIN business_users bu ON bu.business_id = b.id AND bu.role = 'OWNER'
            JOIN users u ON u.id = bu.user_id
            WHERE b.is_active AND u.stripe_customer_id IS NOT NULL AND u.stripe_customer_id <> ''
            ORDER BY b.created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.id).collect())
    }
}
