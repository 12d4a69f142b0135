//! Stripe client and price configuration

use std::sync::Arc;

use waveorder_shared::{BillingType, SubscriptionPlan};

use crate::error::{BillingError, BillingResult};

/// Stripe price ids for each (plan, billing type) pair.
///
/// Any of them may be left unset; subscriptions on an unset price are
/// reported with no mapped plan.
#[derive(Debug, Clone, Default)]
pub struct PriceIds {
    pub starter_monthly: Option<String>,
    pub starter_yearly: Option<String>,
    pub pro_monthly: Option<String>,
    pub pro_yearly: Option<String>,
    pub business_monthly: Option<String>,
    pub business_yearly: Option<String>,
}

impl PriceIds {
    pub fn from_env() -> Self {
        Self {
            starter_monthly: env_opt("STRIPE_PRICE_STARTER_MONTHLY"),
            starter_yearly: env_opt("STRIPE_PRICE_STARTER_YEARLY"),
            pro_monthly: env_opt("STRIPE_PRICE_PRO_MONTHLY"),
            pro_yearly: env_opt("STRIPE_PRICE_PRO_YEARLY"),
            business_monthly: env_opt("STRIPE_PRICE_BUSINESS_MONTHLY"),
            business_yearly: env_opt("STRIPE_PRICE_BUSINESS_YEARLY"),
        }
    }

    fn entries(&self) -> [(&Option<String>, SubscriptionPlan, BillingType); 6] {
        [
            (&self.starter_monthly, SubscriptionPlan::Starter, BillingType::Monthly),
            (&self.starter_yearly, SubscriptionPlan::Starter, BillingType::Yearly),
            (&self.pro_monthly, SubscriptionPlan::Pro, BillingType::Monthly),
            (&self.pro_yearly, SubscriptionPlan::Pro, BillingType::Yearly),
            (&self.business_monthly, SubscriptionPlan::Business, BillingType::Monthly),
            (&self.business_yearly, SubscriptionPlan::Business, BillingType::Yearly),
        ]
    }

    /// Map a Stripe price id to the plan and billing cadence it sells
    pub fn plan_for_price_id(&self, price_id: &str) -> Option<(SubscriptionPlan, BillingType)> {
        self.entries()
            .into_iter()
            .find(|(id, _, _)| id.as_deref() == Some(price_id))
            .map(|(_, plan, billing_type)| (plan, billing_type))
    }

    pub fn price_id_for(&self, plan: SubscriptionPlan, billing_type: BillingType) -> Option<&str> {
        self.entries()
            .into_iter()
            .find(|(_, p, b)| *p == plan && *b == billing_type)
            .and_then(|(id, _, _)| id.as_deref())
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub prices: PriceIds,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?;

        if secret_key.trim().is_empty() {
            return Err(BillingError::Config("STRIPE_SECRET_KEY is empty".to_string()));
        }

        let prices = PriceIds::from_env();
        if prices.entries().iter().all(|(id, _, _)| id.is_none()) {
            tracing::warn!("No STRIPE_PRICE_* ids configured; plan mismatches cannot be detected");
        }

        Ok(Self { secret_key, prices })
    }
}

/// Shared handle to the Stripe API
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = stripe::Client::new(config.secret_key.clone());
        Self {
            inner,
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices() -> PriceIds {
        PriceIds {
            starter_monthly: Some("price_starter_m".to_string()),
            starter_yearly: Some("price_starter_y".to_string()),
            pro_monthly: Some("price_pro_m".to_string()),
            pro_yearly: Some("price_pro_y".to_string()),
            business_monthly: None,
            business_yearly: Some("price_biz_y".to_string()),
        }
    }

    #[test]
    fn test_plan_for_price_id() {
        let prices = prices();
        assert_eq!(
            prices.plan_for_price_id("price_pro_y"),
            Some((SubscriptionPlan::Pro, BillingType::Yearly))
        );
        assert_eq!(
            prices.plan_for_price_id("price_starter_m"),
            Some((SubscriptionPlan::Starter, BillingType::Monthly))
        );
        assert_eq!(prices.plan_for_price_id("price_unknown"), None);
    }

    #[test]
    fn test_unset_price_never_matches() {
        let prices = prices();
        assert_eq!(
            prices.price_id_for(SubscriptionPlan::Business, BillingType::Monthly),
            None
        );
        assert_eq!(
            prices.price_id_for(SubscriptionPlan::Business, BillingType::Yearly),
            Some("price_biz_y")
        );
    }
}
