//! Stripe subscription reconciliation
//!
//! Compares what Stripe holds for a business's billing owner against the
//! local copy and names every discrepancy. [`BillingReconciler::analyze`]
//! only reports; [`BillingReconciler::fix`] applies one corrective action per
//! reported issue.
//!
//! Fix is not transactional across Stripe and the database. A run that fails
//! halfway leaves partial state, and re-running converges because each action
//! is keyed off a fresh analysis.

use std::sync::Arc;

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;
use waveorder_shared::{BillingType, SubscriptionPlan, TenantSubscriptionStatus};

use crate::client::PriceIds;
use crate::error::{BillingError, BillingResult};
use crate::events::{AuditAction, AuditEventBuilder};
use crate::processor::{
    ChargeSummary, CustomerStatus, PaymentProcessor, ProcessorSubStatus, ProcessorSubscription,
    SUBSCRIPTION_PAGE_SIZE,
};
use crate::store::{
    BillingStore, BusinessBilling, BusinessBillingUpdate, LocalSubscription, SubscriptionRecord,
    TenantBilling,
};

/// Default lifetime of the per-business fix lock
pub const DEFAULT_FIX_LOCK_TTL: Duration = Duration::minutes(5);

// =============================================================================
// Report types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    DuplicateSubs,
    MissingSubscription,
    OrphanedDbRecord,
    PlanMismatch,
    StatusMismatch,
    PriceIdMismatch,
    NoStripeCustomer,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::DuplicateSubs => "duplicate_subs",
            IssueKind::MissingSubscription => "missing_subscription",
            IssueKind::OrphanedDbRecord => "orphaned_db_record",
            IssueKind::PlanMismatch => "plan_mismatch",
            IssueKind::StatusMismatch => "status_mismatch",
            IssueKind::PriceIdMismatch => "price_id_mismatch",
            IssueKind::NoStripeCustomer => "no_stripe_customer",
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Billing is wrong right now
    Critical,
    /// Drift worth fixing, or worth a human look
    Warning,
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueSeverity::Critical => write!(f, "critical"),
            IssueSeverity::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    InSync,
    IssuesFound,
    NoStripeCustomer,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::InSync => "in_sync",
            SyncStatus::IssuesFound => "issues_found",
            SyncStatus::NoStripeCustomer => "no_stripe_customer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncIssue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub severity: IssueSeverity,
    pub message: String,
    pub details: serde_json::Value,
}

impl SyncIssue {
    fn new(
        kind: IssueKind,
        severity: IssueSeverity,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            details,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub id: String,
    pub status: ProcessorSubStatus,
    pub price_id: Option<String>,
    pub plan: Option<SubscriptionPlan>,
    pub billing_type: Option<BillingType>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StripeSnapshot {
    pub customer_id: Option<String>,
    pub customer_exists: bool,
    pub subscriptions: Vec<SubscriptionView>,
    pub has_payment_method: bool,
    pub last_payment: Option<ChargeSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSubscriptionView {
    pub id: Uuid,
    pub stripe_subscription_id: String,
    pub status: String,
    pub price_id: Option<String>,
    pub plan: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
}

impl From<&LocalSubscription> for LocalSubscriptionView {
    fn from(sub: &LocalSubscription) -> Self {
        Self {
            id: sub.id,
            stripe_subscription_id: sub.stripe_subscription_id.clone(),
            status: sub.status.clone(),
            price_id: sub.price_id.clone(),
            plan: sub.plan.clone(),
            current_period_end: sub.current_period_end,
            cancel_at_period_end: sub.cancel_at_period_end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSnapshot {
    pub plan: SubscriptionPlan,
    pub billing_type: BillingType,
    pub subscription_status: TenantSubscriptionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_ends_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub grace_ends_at: Option<OffsetDateTime>,
    pub subscription: Option<LocalSubscriptionView>,
}

/// Output of [`BillingReconciler::analyze`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub business_id: Uuid,
    pub business_name: String,
    pub status: SyncStatus,
    pub issues: Vec<SyncIssue>,
    pub stripe: StripeSnapshot,
    pub database: DatabaseSnapshot,
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
}

impl SyncReport {
    pub fn has_issue(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }
}

/// Output of [`BillingReconciler::fix`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixResult {
    pub business_id: Uuid,
    pub message: String,
    pub fixes_applied: usize,
    pub fixes_failed: usize,
    pub fixes_skipped: usize,
    /// One human-readable line per action taken or skipped
    pub results: Vec<String>,
    pub status_before: SyncStatus,
    pub status_after: Option<SyncStatus>,
}

/// Totals from one scheduled analysis pass over all eligible businesses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub checked: usize,
    pub in_sync: usize,
    pub with_issues: usize,
    pub no_customer: usize,
    pub errors: usize,
}

// =============================================================================
// Reconciler
// =============================================================================

/// Analysis plus the raw inputs Fix acts on
struct Analysis {
    report: SyncReport,
    tenant: TenantBilling,
    subscriptions: Vec<ProcessorSubscription>,
}

impl Analysis {
    fn live_subscriptions(&self) -> Vec<&ProcessorSubscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.status.is_live())
            .collect()
    }

    fn primary(&self) -> Option<&ProcessorSubscription> {
        primary_subscription(&self.subscriptions)
    }
}

/// Most recently created subscription that is not canceled or expired
fn primary_subscription(subscriptions: &[ProcessorSubscription]) -> Option<&ProcessorSubscription> {
    subscriptions
        .iter()
        .filter(|s| s.status.is_live())
        .max_by_key(|s| s.created)
}

enum FixOutcome {
    Applied(String),
    Skipped(String),
    Failed(String),
}

/// Reconciles Stripe subscription state with local billing records
pub struct BillingReconciler {
    processor: Arc<dyn PaymentProcessor>,
    store: Arc<dyn BillingStore>,
    prices: PriceIds,
    fix_lock_ttl: Duration,
}

impl BillingReconciler {
    pub fn new(
        processor: Arc<dyn PaymentProcessor>,
        store: Arc<dyn BillingStore>,
        prices: PriceIds,
    ) -> Self {
        Self {
            processor,
            store,
            prices,
            fix_lock_ttl: DEFAULT_FIX_LOCK_TTL,
        }
    }

    pub fn with_fix_lock_ttl(mut self, ttl: Duration) -> Self {
        self.fix_lock_ttl = ttl;
        self
    }

    pub fn store(&self) -> &Arc<dyn BillingStore> {
        &self.store
    }

    /// Diff Stripe against local state for one business.
    ///
    /// The only write is the sync-check stamp on the business row.
    pub async fn analyze(&self, business_id: Uuid) -> BillingResult<SyncReport> {
        Ok(self.run_analysis(business_id).await?.report)
    }

    async fn run_analysis(&self, business_id: Uuid) -> BillingResult<Analysis> {
        let tenant = self
            .store
            .load_tenant(business_id)
            .await?
            .ok_or(BillingError::BusinessNotFound(business_id))?;
        let checked_at = OffsetDateTime::now_utc();

        let database = database_snapshot(&tenant);
        let mut stripe = StripeSnapshot {
            customer_id: tenant.stripe_customer_id().map(str::to_string),
            customer_exists: false,
            subscriptions: Vec::new(),
            has_payment_method: false,
            last_payment: None,
        };

        let Some(customer_id) = tenant.stripe_customer_id().map(str::to_string) else {
            let mut issues = Vec::new();
            if tenant.business.plan.is_paid_tier() {
                issues.push(SyncIssue::new(
                    IssueKind::NoStripeCustomer,
                    IssueSeverity::Warning,
                    format!(
                        "Business is on the {} plan but its owner has no Stripe customer",
                        tenant.business.plan
                    ),
                    serde_json::json!({ "plan": tenant.business.plan }),
                ));
            }
            let report = SyncReport {
                business_id,
                business_name: tenant.business.name.clone(),
                status: SyncStatus::NoStripeCustomer,
                issues,
                stripe,
                database,
                checked_at,
            };
            self.stamp(business_id, report.status, checked_at).await;
            return Ok(Analysis {
                report,
                tenant,
                subscriptions: Vec::new(),
            });
        };

        if self.processor.customer_status(&customer_id).await? == CustomerStatus::Missing {
            tracing::warn!(
                business_id = %business_id,
                customer_id = %customer_id,
                "Stripe customer referenced by owner does not exist"
            );
            let report = SyncReport {
                business_id,
                business_name: tenant.business.name.clone(),
                status: SyncStatus::IssuesFound,
                issues: vec![SyncIssue::new(
                    IssueKind::NoStripeCustomer,
                    IssueSeverity::Critical,
                    format!("Stripe customer {} not found or deleted", customer_id),
                    serde_json::json!({ "customerId": customer_id }),
                )],
                stripe,
                database,
                checked_at,
            };
            self.stamp(business_id, report.status, checked_at).await;
            return Ok(Analysis {
                report,
                tenant,
                subscriptions: Vec::new(),
            });
        }
        stripe.customer_exists = true;

        let (subscriptions, payment_method, last_charge) = tokio::join!(
            self.processor
                .list_subscriptions(&customer_id, SUBSCRIPTION_PAGE_SIZE),
            self.processor.has_default_payment_method(&customer_id),
            self.processor.last_successful_charge(&customer_id),
        );
        let subscriptions = subscriptions?;

        stripe.has_payment_method = payment_method.unwrap_or_else(|e| {
            tracing::warn!(
                business_id = %business_id,
                error = %e,
                "Failed to check default payment method, assuming none"
            );
            false
        });
        stripe.last_payment = last_charge.unwrap_or_else(|e| {
            tracing::warn!(
                business_id = %business_id,
                error = %e,
                "Failed to fetch last successful charge, omitting"
            );
            None
        });
        stripe.subscriptions = subscriptions
            .iter()
            .map(|s| self.subscription_view(s))
            .collect();

        let issues = self.detect_issues(&tenant, &subscriptions);
        let status = if issues.is_empty() {
            SyncStatus::InSync
        } else {
            SyncStatus::IssuesFound
        };

        tracing::info!(
            business_id = %business_id,
            status = status.as_str(),
            issues = issues.len(),
            subscriptions = subscriptions.len(),
            "Stripe sync analysis complete"
        );

        let report = SyncReport {
            business_id,
            business_name: tenant.business.name.clone(),
            status,
            issues,
            stripe,
            database,
            checked_at,
        };
        self.stamp(business_id, status, checked_at).await;

        Ok(Analysis {
            report,
            tenant,
            subscriptions,
        })
    }

    /// Analyze every active business with a Stripe customer. Never fixes.
    ///
    /// A failure for one business is logged and counted; the sweep continues.
    pub async fn sweep(&self) -> BillingResult<SweepSummary> {
        let business_ids = self.store.sweep_candidates().await?;
        let mut summary = SweepSummary::default();

        for business_id in business_ids {
            summary.checked += 1;
            match self.analyze(business_id).await {
                Ok(report) => match report.status {
                    SyncStatus::InSync => summary.in_sync += 1,
                    SyncStatus::IssuesFound => {
                        summary.with_issues += 1;
                        tracing::warn!(
                            business_id = %business_id,
                            issues = ?report.issues.iter().map(|i| i.kind.as_str()).collect::<Vec<_>>(),
                            "Stripe sync drift detected"
                        );
                    }
                    SyncStatus::NoStripeCustomer => summary.no_customer += 1,
                },
                Err(e) => {
                    summary.errors += 1;
                    tracing::error!(
                        business_id = %business_id,
                        error = %e,
                        "Stripe sync check failed"
                    );
                }
            }
        }

        tracing::info!(
            checked = summary.checked,
            in_sync = summary.in_sync,
            with_issues = summary.with_issues,
            no_customer = summary.no_customer,
            errors = summary.errors,
            "Stripe sync sweep complete"
        );

        Ok(summary)
    }

    fn subscription_view(&self, sub: &ProcessorSubscription) -> SubscriptionView {
        let mapped = sub
            .price_id
            .as_deref()
            .and_then(|p| self.prices.plan_for_price_id(p));
        SubscriptionView {
            id: sub.id.clone(),
            status: sub.status,
            price_id: sub.price_id.clone(),
            plan: mapped.map(|(plan, _)| plan),
            billing_type: mapped.map(|(_, billing_type)| billing_type),
            current_period_end: sub.current_period_end_at(),
            created: OffsetDateTime::from_unix_timestamp(sub.created).ok(),
            cancel_at_period_end: sub.cancel_at_period_end,
        }
    }

    fn detect_issues(
        &self,
        tenant: &TenantBilling,
        subscriptions: &[ProcessorSubscription],
    ) -> Vec<SyncIssue> {
        let business = &tenant.business;
        let local = tenant.local_subscription.as_ref();
        let live: Vec<&ProcessorSubscription> =
            subscriptions.iter().filter(|s| s.status.is_live()).collect();
        let primary = primary_subscription(subscriptions);
        let local_is_active = business.subscription_status.is_active();
        let mut issues = Vec::new();

        if live.len() > 1 {
            issues.push(SyncIssue::new(
                IssueKind::DuplicateSubs,
                IssueSeverity::Critical,
                format!("Customer has {} active Stripe subscriptions", live.len()),
                serde_json::json!({
                    "subscriptionIds": live.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
                }),
            ));
        }

        if let Some(primary) = primary {
            let referenced = local.is_some_and(|l| l.stripe_subscription_id == primary.id);
            if !referenced {
                issues.push(SyncIssue::new(
                    IssueKind::MissingSubscription,
                    IssueSeverity::Critical,
                    format!("No local record for Stripe subscription {}", primary.id),
                    serde_json::json!({ "stripeSubscriptionId": primary.id }),
                ));
            }
        }

        if let Some(local) = local {
            if !subscriptions
                .iter()
                .any(|s| s.id == local.stripe_subscription_id)
            {
                issues.push(SyncIssue::new(
                    IssueKind::OrphanedDbRecord,
                    IssueSeverity::Warning,
                    format!(
                        "Local record references unknown Stripe subscription {}",
                        local.stripe_subscription_id
                    ),
                    serde_json::json!({
                        "localSubscriptionId": local.id,
                        "stripeSubscriptionId": local.stripe_subscription_id,
                    }),
                ));
            }
        }

        match primary {
            Some(primary) if primary.status.is_active_or_trialing() => {
                let mapped_plan = primary
                    .price_id
                    .as_deref()
                    .and_then(|p| self.prices.plan_for_price_id(p))
                    .map(|(plan, _)| plan);

                if let Some(mapped_plan) = mapped_plan {
                    if mapped_plan != business.plan {
                        issues.push(SyncIssue::new(
                            IssueKind::PlanMismatch,
                            IssueSeverity::Critical,
                            format!(
                                "Stripe plan is {} but business is on {}",
                                mapped_plan, business.plan
                            ),
                            serde_json::json!({
                                "stripePlan": mapped_plan,
                                "databasePlan": business.plan,
                            }),
                        ));
                    }
                }

                if !local_is_active {
                    issues.push(SyncIssue::new(
                        IssueKind::StatusMismatch,
                        IssueSeverity::Warning,
                        format!(
                            "Stripe subscription is {} but business status is {}",
                            primary.status, business.subscription_status
                        ),
                        serde_json::json!({
                            "stripeStatus": primary.status,
                            "databaseStatus": business.subscription_status,
                        }),
                    ));
                }

                if let Some(local) = local.filter(|l| l.stripe_subscription_id == primary.id) {
                    if local.price_id != primary.price_id {
                        issues.push(SyncIssue::new(
                            IssueKind::PriceIdMismatch,
                            IssueSeverity::Warning,
                            "Stripe price differs from the local subscription record",
                            serde_json::json!({
                                "stripePriceId": primary.price_id,
                                "databasePriceId": local.price_id,
                            }),
                        ));
                    }
                }
            }
            Some(primary) if primary.status == ProcessorSubStatus::Paused && local_is_active => {
                issues.push(SyncIssue::new(
                    IssueKind::StatusMismatch,
                    IssueSeverity::Critical,
                    "Stripe subscription is paused (trial expired) but business is still active",
                    serde_json::json!({
                        "stripeStatus": primary.status,
                        "databaseStatus": business.subscription_status,
                    }),
                ));
            }
            Some(_) => {}
            None => {
                if business.plan.is_paid_tier() && business.trial_ends_at.is_none() {
                    issues.push(SyncIssue::new(
                        IssueKind::StatusMismatch,
                        IssueSeverity::Warning,
                        format!(
                            "Business is on {} with no trial and no active Stripe subscription (manual override?)",
                            business.plan
                        ),
                        serde_json::json!({ "databasePlan": business.plan }),
                    ));
                }
            }
        }

        issues
    }

    async fn stamp(&self, business_id: Uuid, status: SyncStatus, checked_at: OffsetDateTime) {
        if let Err(e) = self
            .store
            .stamp_sync_check(business_id, status.as_str(), checked_at)
            .await
        {
            tracing::warn!(
                business_id = %business_id,
                error = %e,
                "Failed to record Stripe sync check"
            );
        }
    }

    /// Apply one corrective action per issue found by a fresh analysis.
    ///
    /// Holds the per-business fix lock for the duration of the run; a
    /// concurrent call gets [`BillingError::SyncInProgress`].
    pub async fn fix(&self, business_id: Uuid, actor_id: Option<Uuid>) -> BillingResult<FixResult> {
        let now = OffsetDateTime::now_utc();
        if !self
            .store
            .try_acquire_fix_lock(business_id, now, self.fix_lock_ttl)
            .await?
        {
            if self.store.load_tenant(business_id).await?.is_none() {
                return Err(BillingError::BusinessNotFound(business_id));
            }
            tracing::info!(business_id = %business_id, "Stripe sync fix already running");
            return Err(BillingError::SyncInProgress(business_id));
        }

        let result = self.fix_locked(business_id, actor_id).await;

        if let Err(e) = self.store.release_fix_lock(business_id).await {
            tracing::warn!(
                business_id = %business_id,
                error = %e,
                "Failed to release Stripe sync lock, it will expire on its own"
            );
        }

        result
    }

    async fn fix_locked(&self, business_id: Uuid, actor_id: Option<Uuid>) -> BillingResult<FixResult> {
        let analysis = self.run_analysis(business_id).await?;
        let status_before = analysis.report.status;

        if status_before != SyncStatus::IssuesFound {
            let message = match status_before {
                SyncStatus::NoStripeCustomer => "No Stripe customer, nothing to fix",
                _ => "Already in sync, nothing to fix",
            };
            return Ok(FixResult {
                business_id,
                message: message.to_string(),
                fixes_applied: 0,
                fixes_failed: 0,
                fixes_skipped: 0,
                results: Vec::new(),
                status_before,
                status_after: Some(status_before),
            });
        }

        let mut outcomes = Vec::new();
        // Tracks the owner's record as fixes create or remove it
        let mut local_id = analysis.tenant.local_subscription.as_ref().map(|l| l.id);

        for issue in &analysis.report.issues {
            match issue.kind {
                IssueKind::DuplicateSubs => {
                    outcomes.extend(self.cancel_duplicates(&analysis).await);
                }
                IssueKind::MissingSubscription => {
                    let outcome = self.create_missing(&analysis).await;
                    if let Ok(id) = &outcome {
                        local_id = Some(*id);
                    }
                    outcomes.push(match outcome {
                        Ok(id) => FixOutcome::Applied(format!(
                            "Created local subscription record {} and linked it to the owner",
                            id
                        )),
                        Err(line) => FixOutcome::Failed(line),
                    });
                }
                IssueKind::OrphanedDbRecord => {
                    let outcome = self.remove_orphan(&analysis).await;
                    if matches!(outcome, FixOutcome::Applied(_)) {
                        let orphan_id = analysis.tenant.local_subscription.as_ref().map(|l| l.id);
                        if local_id == orphan_id {
                            local_id = None;
                        }
                    }
                    outcomes.push(outcome);
                }
                IssueKind::PriceIdMismatch => {
                    outcomes.push(self.sync_local_record(&analysis, local_id).await);
                }
                IssueKind::PlanMismatch | IssueKind::StatusMismatch => {
                    if analysis.primary().is_none() {
                        outcomes.push(FixOutcome::Skipped(
                            "Paid plan without a Stripe subscription looks like a manual override, left unchanged"
                                .to_string(),
                        ));
                        continue;
                    }
                    outcomes.push(self.sync_local_record(&analysis, local_id).await);
                    outcomes.push(self.sync_business(&analysis).await);
                }
                IssueKind::NoStripeCustomer => {
                    outcomes.push(FixOutcome::Skipped(
                        "Stripe customer is missing; relink or recreate it manually".to_string(),
                    ));
                }
            }
        }

        let mut result = FixResult {
            business_id,
            message: String::new(),
            fixes_applied: 0,
            fixes_failed: 0,
            fixes_skipped: 0,
            results: Vec::with_capacity(outcomes.len()),
            status_before,
            status_after: None,
        };
        for outcome in outcomes {
            match outcome {
                FixOutcome::Applied(line) => {
                    result.fixes_applied += 1;
                    result.results.push(line);
                }
                FixOutcome::Skipped(line) => {
                    result.fixes_skipped += 1;
                    result.results.push(format!("Skipped: {}", line));
                }
                FixOutcome::Failed(line) => {
                    result.fixes_failed += 1;
                    result.results.push(format!("Failed: {}", line));
                }
            }
        }

        // Re-analysis re-stamps the business row
        match self.run_analysis(business_id).await {
            Ok(after) => result.status_after = Some(after.report.status),
            Err(e) => {
                tracing::warn!(
                    business_id = %business_id,
                    error = %e,
                    "Failed to re-check Stripe sync after fix"
                );
                self.stamp(business_id, status_before, OffsetDateTime::now_utc())
                    .await;
            }
        }

        result.message = format!(
            "Applied {} fix(es), {} failed, {} skipped",
            result.fixes_applied, result.fixes_failed, result.fixes_skipped
        );

        tracing::info!(
            business_id = %business_id,
            actor_id = ?actor_id,
            applied = result.fixes_applied,
            failed = result.fixes_failed,
            skipped = result.fixes_skipped,
            "Stripe sync fix complete"
        );

        let event = AuditEventBuilder::new(business_id, AuditAction::StripeSyncFix)
            .actor_opt(actor_id)
            .details(serde_json::json!({
                "fixes": analysis.report.issues.iter().map(|i| i.kind).collect::<Vec<_>>(),
                "results": result.results,
                "statusBefore": result.status_before,
                "statusAfter": result.status_after,
            }))
            .build();
        if let Err(e) = self.store.log_event(&event).await {
            tracing::warn!(
                business_id = %business_id,
                error = %e,
                "Failed to write Stripe sync audit log"
            );
        }

        Ok(result)
    }

    async fn cancel_duplicates(&self, analysis: &Analysis) -> Vec<FixOutcome> {
        let Some(primary) = analysis.primary() else {
            return Vec::new();
        };

        let mut outcomes = Vec::new();
        for sub in analysis.live_subscriptions() {
            if sub.id == primary.id {
                continue;
            }
            match self.processor.cancel_subscription(&sub.id).await {
                Ok(()) => outcomes.push(FixOutcome::Applied(format!(
                    "Canceled duplicate subscription {}",
                    sub.id
                ))),
                Err(e) => {
                    tracing::warn!(
                        business_id = %analysis.report.business_id,
                        subscription_id = %sub.id,
                        error = %e,
                        "Failed to cancel duplicate subscription"
                    );
                    outcomes.push(FixOutcome::Failed(format!(
                        "Could not cancel duplicate subscription {}: {}",
                        sub.id, e
                    )));
                }
            }
        }
        outcomes
    }

    async fn create_missing(&self, analysis: &Analysis) -> Result<Uuid, String> {
        let primary = analysis
            .primary()
            .ok_or_else(|| "No primary subscription to mirror".to_string())?;
        let owner = analysis
            .tenant
            .owner
            .as_ref()
            .ok_or_else(|| "Business has no billing owner".to_string())?;

        let record = self.record_for(primary, &analysis.tenant);
        self.store
            .create_local_subscription(owner.user_id, &record)
            .await
            .map_err(|e| {
                tracing::warn!(
                    business_id = %analysis.report.business_id,
                    subscription_id = %primary.id,
                    error = %e,
                    "Failed to create local subscription record"
                );
                format!("Could not create local record for {}: {}", primary.id, e)
            })
    }

    async fn remove_orphan(&self, analysis: &Analysis) -> FixOutcome {
        let Some(orphan) = analysis.tenant.local_subscription.as_ref() else {
            return FixOutcome::Skipped("Orphaned record no longer present".to_string());
        };

        if let Some(owner) = analysis.tenant.owner.as_ref() {
            if let Err(e) = self
                .store
                .unlink_local_subscription(owner.user_id, orphan.id)
                .await
            {
                return FixOutcome::Failed(format!(
                    "Could not unlink orphaned record {}: {}",
                    orphan.id, e
                ));
            }
        }

        match self.store.delete_local_subscription(orphan.id).await {
            Ok(()) => FixOutcome::Applied(format!(
                "Removed orphaned record {} ({})",
                orphan.id, orphan.stripe_subscription_id
            )),
            Err(e) => {
                tracing::warn!(
                    business_id = %analysis.report.business_id,
                    subscription_id = %orphan.id,
                    error = %e,
                    "Orphaned subscription record unlinked but not deleted"
                );
                FixOutcome::Applied(format!(
                    "Unlinked orphaned record {}; delete failed ({}), it may still be referenced",
                    orphan.id, e
                ))
            }
        }
    }

    async fn sync_local_record(&self, analysis: &Analysis, local_id: Option<Uuid>) -> FixOutcome {
        let Some(primary) = analysis.primary() else {
            return FixOutcome::Skipped("No primary subscription to copy from".to_string());
        };
        let Some(local_id) = local_id else {
            return FixOutcome::Skipped("No local subscription record to update".to_string());
        };

        let record = self.record_for(primary, &analysis.tenant);
        match self.store.update_local_subscription(local_id, &record).await {
            Ok(()) => FixOutcome::Applied(format!(
                "Updated local record from {} (price {}, status {})",
                primary.id,
                record.price_id.as_deref().unwrap_or("none"),
                record.status
            )),
            Err(e) => FixOutcome::Failed(format!("Could not update local record: {}", e)),
        }
    }

    async fn sync_business(&self, analysis: &Analysis) -> FixOutcome {
        let Some(primary) = analysis.primary() else {
            return FixOutcome::Skipped("No primary subscription to copy from".to_string());
        };
        let mapped = primary
            .price_id
            .as_deref()
            .and_then(|p| self.prices.plan_for_price_id(p));

        let Some(update) = business_update_for(primary.status, mapped, &analysis.tenant.business)
        else {
            return FixOutcome::Skipped(format!(
                "Business left unchanged while subscription is {}",
                primary.status
            ));
        };

        match self
            .store
            .update_business_billing(analysis.report.business_id, &update)
            .await
        {
            Ok(()) => FixOutcome::Applied(format!(
                "Set business plan to {} and status to {}",
                update.plan, update.subscription_status
            )),
            Err(e) => FixOutcome::Failed(format!("Could not update business billing: {}", e)),
        }
    }

    fn record_for(&self, primary: &ProcessorSubscription, tenant: &TenantBilling) -> SubscriptionRecord {
        let mapped_plan = primary
            .price_id
            .as_deref()
            .and_then(|p| self.prices.plan_for_price_id(p))
            .map(|(plan, _)| plan);
        let existing_plan = tenant
            .local_subscription
            .as_ref()
            .and_then(|l| SubscriptionPlan::from_stored(&l.plan).ok());

        SubscriptionRecord {
            stripe_subscription_id: primary.id.clone(),
            status: primary.status.as_str().to_string(),
            price_id: primary.price_id.clone(),
            plan: mapped_plan
                .or(existing_plan)
                .unwrap_or(tenant.business.plan),
            current_period_end: primary.current_period_end_at(),
            cancel_at_period_end: primary.cancel_at_period_end,
        }
    }
}

/// Business plan and status implied by the primary subscription's status.
///
/// `None` means the status says nothing about entitlement yet.
pub fn business_update_for(
    status: ProcessorSubStatus,
    mapped: Option<(SubscriptionPlan, BillingType)>,
    business: &BusinessBilling,
) -> Option<BusinessBillingUpdate> {
    match status {
        ProcessorSubStatus::Active | ProcessorSubStatus::Trialing => Some(BusinessBillingUpdate {
            plan: mapped.map(|(plan, _)| plan).unwrap_or(business.plan),
            billing_type: mapped.map(|(_, billing_type)| billing_type),
            subscription_status: TenantSubscriptionStatus::Active,
            clear_trial: status == ProcessorSubStatus::Active,
            clear_grace: true,
        }),
        ProcessorSubStatus::Paused
        | ProcessorSubStatus::Canceled
        | ProcessorSubStatus::Unpaid
        | ProcessorSubStatus::IncompleteExpired => Some(BusinessBillingUpdate {
            plan: SubscriptionPlan::default(),
            billing_type: None,
            subscription_status: TenantSubscriptionStatus::Inactive,
            clear_trial: false,
            clear_grace: false,
        }),
        ProcessorSubStatus::PastDue => Some(BusinessBillingUpdate {
            plan: business.plan,
            billing_type: None,
            subscription_status: TenantSubscriptionStatus::PastDue,
            clear_trial: false,
            clear_grace: false,
        }),
        ProcessorSubStatus::Incomplete => None,
    }
}

fn database_snapshot(tenant: &TenantBilling) -> DatabaseSnapshot {
    let business = &tenant.business;
    DatabaseSnapshot {
        plan: business.plan,
        billing_type: business.billing_type,
        subscription_status: business.subscription_status.clone(),
        trial_ends_at: business.trial_ends_at,
        grace_ends_at: business.grace_ends_at,
        subscription: tenant
            .local_subscription
            .as_ref()
            .map(LocalSubscriptionView::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn business(plan: SubscriptionPlan) -> BusinessBilling {
        BusinessBilling {
            id: Uuid::new_v4(),
            name: "Cafe".to_string(),
            plan,
            billing_type: BillingType::Monthly,
            subscription_status: TenantSubscriptionStatus::Active,
            trial_ends_at: None,
            grace_ends_at: None,
            is_active: true,
        }
    }

    #[test]
    fn test_active_subscription_takes_mapped_plan() {
        let update = business_update_for(
            ProcessorSubStatus::Active,
            Some((SubscriptionPlan::Business, BillingType::Yearly)),
            &business(SubscriptionPlan::Starter),
        )
        .unwrap();

        assert_eq!(update.plan, SubscriptionPlan::Business);
        assert_eq!(update.billing_type, Some(BillingType::Yearly));
        assert_eq!(update.subscription_status, TenantSubscriptionStatus::Active);
        assert!(update.clear_trial);
        assert!(update.clear_grace);
    }

    #[test]
    fn test_trialing_keeps_trial_end() {
        let update = business_update_for(
            ProcessorSubStatus::Trialing,
            None,
            &business(SubscriptionPlan::Pro),
        )
        .unwrap();

        assert_eq!(update.plan, SubscriptionPlan::Pro);
        assert!(!update.clear_trial);
        assert!(update.clear_grace);
    }

    #[test]
    fn test_inactive_statuses_downgrade_to_default_plan() {
        for status in [
            ProcessorSubStatus::Paused,
            ProcessorSubStatus::Canceled,
            ProcessorSubStatus::Unpaid,
            ProcessorSubStatus::IncompleteExpired,
        ] {
            let update = business_update_for(status, None, &business(SubscriptionPlan::Business))
                .unwrap();
            assert_eq!(update.plan, SubscriptionPlan::Starter, "{}", status);
            assert_eq!(update.subscription_status, TenantSubscriptionStatus::Inactive);
        }
    }

    #[test]
    fn test_past_due_keeps_plan() {
        let update = business_update_for(
            ProcessorSubStatus::PastDue,
            Some((SubscriptionPlan::Business, BillingType::Monthly)),
            &business(SubscriptionPlan::Pro),
        )
        .unwrap();
        assert_eq!(update.plan, SubscriptionPlan::Pro);
        assert_eq!(update.subscription_status, TenantSubscriptionStatus::PastDue);
    }

    #[test]
    fn test_incomplete_leaves_business_alone() {
        assert!(business_update_for(
            ProcessorSubStatus::Incomplete,
            None,
            &business(SubscriptionPlan::Pro)
        )
        .is_none());
    }

    #[test]
    fn test_primary_is_newest_live_subscription() {
        let sub = |id: &str, status, created| ProcessorSubscription {
            id: id.to_string(),
            status,
            price_id: None,
            created,
            current_period_end: 0,
            cancel_at_period_end: false,
        };
        let subs = vec![
            sub("sub_old", ProcessorSubStatus::Active, 100),
            sub("sub_newer_canceled", ProcessorSubStatus::Canceled, 300),
            sub("sub_new", ProcessorSubStatus::Paused, 200),
        ];
        assert_eq!(primary_subscription(&subs).map(|s| s.id.as_str()), Some("sub_new"));
        assert!(primary_subscription(&subs[1..2]).is_none());
    }

    #[test]
    fn test_issue_serializes_with_type_key() {
        let issue = SyncIssue::new(
            IssueKind::PriceIdMismatch,
            IssueSeverity::Warning,
            "msg",
            serde_json::Value::Null,
        );
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["type"], "price_id_mismatch");
        assert_eq!(json["severity"], "warning");
    }
}
