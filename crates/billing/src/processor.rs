//! Payment processor seam
//!
//! The reconciler only needs a handful of read calls and one cancel call
//! from the processor. [`PaymentProcessor`] names exactly those, and
//! [`StripeProcessor`] implements them on `async-stripe`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stripe::{
    CancelSubscription, Charge, ChargeStatus, Customer, CustomerId, ListCharges,
    ListSubscriptions, StripeError, Subscription, SubscriptionId,
    SubscriptionStatus as StripeSubStatus, SubscriptionStatusFilter,
};
use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Page size used when listing a customer's subscriptions
pub const SUBSCRIPTION_PAGE_SIZE: u64 = 100;

/// Subscription status as reported by the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorSubStatus {
    Active,
    Trialing,
    PastDue,
    /// Trial ended without a payment method
    Paused,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
}

impl ProcessorSubStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorSubStatus::Active => "active",
            ProcessorSubStatus::Trialing => "trialing",
            ProcessorSubStatus::PastDue => "past_due",
            ProcessorSubStatus::Paused => "paused",
            ProcessorSubStatus::Canceled => "canceled",
            ProcessorSubStatus::Unpaid => "unpaid",
            ProcessorSubStatus::Incomplete => "incomplete",
            ProcessorSubStatus::IncompleteExpired => "incomplete_expired",
        }
    }

    /// Still counts against the one-subscription-per-customer rule
    pub fn is_live(&self) -> bool {
        !matches!(
            self,
            ProcessorSubStatus::Canceled | ProcessorSubStatus::IncompleteExpired
        )
    }

    pub fn is_active_or_trialing(&self) -> bool {
        matches!(self, ProcessorSubStatus::Active | ProcessorSubStatus::Trialing)
    }
}

impl std::fmt::Display for ProcessorSubStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<StripeSubStatus> for ProcessorSubStatus {
    fn from(status: StripeSubStatus) -> Self {
        match status {
            StripeSubStatus::Active => ProcessorSubStatus::Active,
            StripeSubStatus::Trialing => ProcessorSubStatus::Trialing,
            StripeSubStatus::PastDue => ProcessorSubStatus::PastDue,
            StripeSubStatus::Paused => ProcessorSubStatus::Paused,
            StripeSubStatus::Canceled => ProcessorSubStatus::Canceled,
            StripeSubStatus::Unpaid => ProcessorSubStatus::Unpaid,
            StripeSubStatus::Incomplete => ProcessorSubStatus::Incomplete,
            StripeSubStatus::IncompleteExpired => ProcessorSubStatus::IncompleteExpired,
        }
    }
}

/// Processor-side subscription, fetched live and never persisted as-is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorSubscription {
    pub id: String,
    pub status: ProcessorSubStatus,
    pub price_id: Option<String>,
    /// Epoch seconds
    pub created: i64,
    /// Epoch seconds
    pub current_period_end: i64,
    pub cancel_at_period_end: bool,
}

impl ProcessorSubscription {
    pub fn current_period_end_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(self.current_period_end).ok()
    }
}

impl From<&Subscription> for ProcessorSubscription {
    fn from(sub: &Subscription) -> Self {
        Self {
            id: sub.id.to_string(),
            status: sub.status.clone().into(),
            price_id: sub
                .items
                .data
                .first()
                .and_then(|item| item.price.as_ref())
                .map(|price| price.id.to_string()),
            created: sub.created,
            current_period_end: sub.current_period_end,
            cancel_at_period_end: sub.cancel_at_period_end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeSummary {
    pub amount_cents: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Whether a stored customer id still resolves at the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerStatus {
    Found,
    /// Unknown to the processor, or deleted there
    Missing,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn customer_status(&self, customer_id: &str) -> BillingResult<CustomerStatus>;

    /// All subscriptions for the customer, whatever their status
    async fn list_subscriptions(
        &self,
        customer_id: &str,
        limit: u64,
    ) -> BillingResult<Vec<ProcessorSubscription>>;

    async fn has_default_payment_method(&self, customer_id: &str) -> BillingResult<bool>;

    async fn last_successful_charge(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<ChargeSummary>>;

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<()>;
}

/// [`PaymentProcessor`] backed by the Stripe API
#[derive(Clone)]
pub struct StripeProcessor {
    stripe: StripeClient,
}

impl StripeProcessor {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    fn parse_customer_id(customer_id: &str) -> BillingResult<CustomerId> {
        customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))
    }

    async fn retrieve_customer(&self, id: &CustomerId) -> Result<Customer, StripeError> {
        RetryIf::spawn(
            retry_strategy(),
            || Customer::retrieve(self.stripe.inner(), id, &[]),
            is_transient,
        )
        .await
    }
}

/// Backoff for read calls: 200ms, 400ms, 800ms with jitter
fn retry_strategy() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(100)
        .max_delay(Duration::from_secs(2))
        .map(jitter)
        .take(3)
}

/// Rate limits, server errors and timeouts are worth retrying
fn is_transient(e: &StripeError) -> bool {
    match e {
        StripeError::Stripe(req) => req.http_status == 429 || req.http_status >= 500,
        StripeError::Timeout => true,
        _ => false,
    }
}

fn is_not_found(e: &StripeError) -> bool {
    matches!(e, StripeError::Stripe(req) if req.http_status == 404)
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    async fn customer_status(&self, customer_id: &str) -> BillingResult<CustomerStatus> {
        let Ok(id) = customer_id.parse::<CustomerId>() else {
            tracing::warn!(customer_id = %customer_id, "Stored Stripe customer id is malformed");
            return Ok(CustomerStatus::Missing);
        };

        match self.retrieve_customer(&id).await {
            Ok(customer) => {
                // Deleted customers come back as a stub carrying `deleted: true`
                let deleted = serde_json::to_value(&customer)
                    .ok()
                    .and_then(|v| v.get("deleted").and_then(|d| d.as_bool()))
                    .unwrap_or(false);
                if deleted {
                    Ok(CustomerStatus::Missing)
                } else {
                    Ok(CustomerStatus::Found)
                }
            }
            Err(e) if is_not_found(&e) => Ok(CustomerStatus::Missing),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
        limit: u64,
    ) -> BillingResult<Vec<ProcessorSubscription>> {
        let customer = Self::parse_customer_id(customer_id)?;
        let params = ListSubscriptions {
            customer: Some(customer),
            status: Some(SubscriptionStatusFilter::All),
            limit: Some(limit),
            ..Default::default()
        };

        let subscriptions = RetryIf::spawn(
            retry_strategy(),
            || Subscription::list(self.stripe.inner(), &params),
            is_transient,
        )
        .await?;

        Ok(subscriptions
            .data
            .iter()
            .map(ProcessorSubscription::from)
            .collect())
    }

    async fn has_default_payment_method(&self, customer_id: &str) -> BillingResult<bool> {
        let id = Self::parse_customer_id(customer_id)?;
        let customer = self.retrieve_customer(&id).await?;

        let value = serde_json::to_value(&customer)
            .map_err(|e| BillingError::Internal(format!("Failed to inspect customer: {}", e)))?;
        let has_invoice_default = value
            .pointer("/invoice_settings/default_payment_method")
            .is_some_and(|v| !v.is_null());
        let has_default_source = value.get("default_source").is_some_and(|v| !v.is_null());

        Ok(has_invoice_default || has_default_source)
    }

    async fn last_successful_charge(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<ChargeSummary>> {
        let customer = Self::parse_customer_id(customer_id)?;
        let mut params = ListCharges::new();
        params.customer = Some(customer);
        params.limit = Some(10);

        let charges = RetryIf::spawn(
            retry_strategy(),
            || Charge::list(self.stripe.inner(), &params),
            is_transient,
        )
        .await?;

        Ok(charges
            .data
            .iter()
            .filter(|charge| charge.status == ChargeStatus::Succeeded)
            .max_by_key(|charge| charge.created)
            .and_then(|charge| {
                OffsetDateTime::from_unix_timestamp(charge.created)
                    .ok()
                    .map(|created_at| ChargeSummary {
                        amount_cents: charge.amount,
                        created_at,
                    })
            }))
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<()> {
        let sub_id = subscription_id
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))?;

        let params = CancelSubscription {
            cancellation_details: None,
            invoice_now: None,
            prorate: None,
        };

        // Not retried: a timed-out cancel may have gone through
        let subscription = Subscription::cancel(self.stripe.inner(), &sub_id, params).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            status = ?subscription.status,
            "Cancelled Stripe subscription"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_statuses() {
        assert!(ProcessorSubStatus::Active.is_live());
        assert!(ProcessorSubStatus::Paused.is_live());
        assert!(ProcessorSubStatus::PastDue.is_live());
        assert!(!ProcessorSubStatus::Canceled.is_live());
        assert!(!ProcessorSubStatus::IncompleteExpired.is_live());
    }

    #[test]
    fn test_stripe_status_conversion() {
        assert_eq!(
            ProcessorSubStatus::from(StripeSubStatus::IncompleteExpired),
            ProcessorSubStatus::IncompleteExpired
        );
        assert_eq!(ProcessorSubStatus::from(StripeSubStatus::Paused).as_str(), "paused");
    }

    #[test]
    fn test_retry_strategy_is_bounded() {
        let delays: Vec<Duration> = retry_strategy().collect();
        assert_eq!(delays.len(), 3);
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(2)));
    }

    #[test]
    fn test_timeouts_are_transient() {
        assert!(is_transient(&StripeError::Timeout));
        assert!(!is_transient(&StripeError::ClientError("bad".to_string())));
    }
}
