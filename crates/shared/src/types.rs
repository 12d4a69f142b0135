//! Common types used across WaveOrder services

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Subscription plans
// =============================================================================

/// Plans a business can currently be on.
///
/// `FREE` was retired; rows still carrying it are migrated through
/// [`SubscriptionPlan::from_stored`] rather than decoded as a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionPlan {
    /// Entry tier, and the tier businesses fall back to
    #[default]
    Starter,
    Pro,
    Business,
}

/// Legacy plan values and the plan each one migrates to
pub const LEGACY_PLAN_MIGRATIONS: &[(&str, SubscriptionPlan)] =
    &[("FREE", SubscriptionPlan::Starter)];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanParseError {
    #[error("legacy plan value '{0}' requires migration")]
    Legacy(String),
    #[error("unknown plan value '{0}'")]
    Unknown(String),
}

impl SubscriptionPlan {
    pub const ALL: [SubscriptionPlan; 3] = [
        SubscriptionPlan::Starter,
        SubscriptionPlan::Pro,
        SubscriptionPlan::Business,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionPlan::Starter => "STARTER",
            SubscriptionPlan::Pro => "PRO",
            SubscriptionPlan::Business => "BUSINESS",
        }
    }

    /// Plans above the default tier
    pub fn is_paid_tier(&self) -> bool {
        *self != SubscriptionPlan::default()
    }

    /// Decode a plan value read from storage, migrating legacy values.
    pub fn from_stored(value: &str) -> Result<Self, PlanParseError> {
        match value.parse::<SubscriptionPlan>() {
            Err(PlanParseError::Legacy(legacy)) => {
                let migrated = migrate_legacy_plan(&legacy)?;
                tracing::warn!(
                    legacy_plan = %legacy,
                    migrated_plan = %migrated,
                    "Read legacy plan value, treating as migrated plan"
                );
                Ok(migrated)
            }
            other => other,
        }
    }

    /// List price per month in cents. Yearly billing is quoted as its monthly equivalent.
    pub fn monthly_price_cents(&self, billing_type: BillingType) -> i64 {
        match (self, billing_type) {
            (SubscriptionPlan::Starter, BillingType::Monthly) => 1_900,
            (SubscriptionPlan::Starter, BillingType::Yearly) => 1_583,
            (SubscriptionPlan::Pro, BillingType::Monthly) => 3_900,
            (SubscriptionPlan::Pro, BillingType::Yearly) => 3_250,
            (SubscriptionPlan::Business, BillingType::Monthly) => 7_900,
            (SubscriptionPlan::Business, BillingType::Yearly) => 6_583,
        }
    }
}

impl fmt::Display for SubscriptionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionPlan {
    type Err = PlanParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "STARTER" => Ok(SubscriptionPlan::Starter),
            "PRO" => Ok(SubscriptionPlan::Pro),
            "BUSINESS" => Ok(SubscriptionPlan::Business),
            _ if LEGACY_PLAN_MIGRATIONS
                .iter()
                .any(|(legacy, _)| *legacy == normalized) =>
            {
                Err(PlanParseError::Legacy(normalized))
            }
            _ => Err(PlanParseError::Unknown(s.to_string())),
        }
    }
}

/// Map a retired plan value onto its replacement
pub fn migrate_legacy_plan(value: &str) -> Result<SubscriptionPlan, PlanParseError> {
    let normalized = value.trim().to_ascii_uppercase();
    LEGACY_PLAN_MIGRATIONS
        .iter()
        .find(|(legacy, _)| *legacy == normalized)
        .map(|(_, plan)| *plan)
        .ok_or_else(|| PlanParseError::Unknown(value.to_string()))
}

// =============================================================================
// Billing type
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingType {
    #[default]
    Monthly,
    Yearly,
}

impl BillingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingType::Monthly => "MONTHLY",
            BillingType::Yearly => "YEARLY",
        }
    }

    /// Unknown or missing values bill monthly
    pub fn from_stored(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_uppercase()).as_deref() {
            Some("YEARLY") | Some("ANNUAL") => BillingType::Yearly,
            _ => BillingType::Monthly,
        }
    }
}

impl fmt::Display for BillingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Business subscription status
// =============================================================================

/// Subscription status stored on the business row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TenantSubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Inactive,
    /// Value this service does not write; kept verbatim so it can be reported
    Other(String),
}

impl TenantSubscriptionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TenantSubscriptionStatus::Active => "ACTIVE",
            TenantSubscriptionStatus::Trialing => "TRIALING",
            TenantSubscriptionStatus::PastDue => "PAST_DUE",
            TenantSubscriptionStatus::Canceled => "CANCELED",
            TenantSubscriptionStatus::Inactive => "INACTIVE",
            TenantSubscriptionStatus::Other(value) => value,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TenantSubscriptionStatus::Active)
    }
}

impl From<String> for TenantSubscriptionStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => TenantSubscriptionStatus::Active,
            "TRIALING" => TenantSubscriptionStatus::Trialing,
            "PAST_DUE" => TenantSubscriptionStatus::PastDue,
            "CANCELED" | "CANCELLED" => TenantSubscriptionStatus::Canceled,
            "INACTIVE" => TenantSubscriptionStatus::Inactive,
            _ => TenantSubscriptionStatus::Other(value),
        }
    }
}

impl From<&str> for TenantSubscriptionStatus {
    fn from(value: &str) -> Self {
        TenantSubscriptionStatus::from(value.to_string())
    }
}

impl From<TenantSubscriptionStatus> for String {
    fn from(status: TenantSubscriptionStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for TenantSubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_round_trips_through_db_strings() {
        for plan in SubscriptionPlan::ALL {
            assert_eq!(plan.as_str().parse::<SubscriptionPlan>(), Ok(plan));
        }
        assert_eq!("pro".parse::<SubscriptionPlan>(), Ok(SubscriptionPlan::Pro));
    }

    #[test]
    fn test_legacy_free_plan_is_not_a_plan() {
        assert_eq!(
            "FREE".parse::<SubscriptionPlan>(),
            Err(PlanParseError::Legacy("FREE".to_string()))
        );
    }

    #[test]
    fn test_from_stored_migrates_legacy_free_to_starter() {
        assert_eq!(
            SubscriptionPlan::from_stored("FREE"),
            Ok(SubscriptionPlan::Starter)
        );
        assert_eq!(
            SubscriptionPlan::from_stored("BUSINESS"),
            Ok(SubscriptionPlan::Business)
        );
    }

    #[test]
    fn test_from_stored_rejects_unknown_plan() {
        assert_eq!(
            SubscriptionPlan::from_stored("PLATINUM"),
            Err(PlanParseError::Unknown("PLATINUM".to_string()))
        );
    }

    #[test]
    fn test_only_plans_above_default_are_paid_tiers() {
        assert!(!SubscriptionPlan::Starter.is_paid_tier());
        assert!(SubscriptionPlan::Pro.is_paid_tier());
        assert!(SubscriptionPlan::Business.is_paid_tier());
    }

    #[test]
    fn test_yearly_price_is_cheaper_per_month() {
        for plan in SubscriptionPlan::ALL {
            assert!(
                plan.monthly_price_cents(BillingType::Yearly)
                    < plan.monthly_price_cents(BillingType::Monthly)
            );
        }
    }

    #[test]
    fn test_billing_type_defaults_to_monthly() {
        assert_eq!(BillingType::from_stored(None), BillingType::Monthly);
        assert_eq!(BillingType::from_stored(Some("weird")), BillingType::Monthly);
        assert_eq!(BillingType::from_stored(Some("yearly")), BillingType::Yearly);
    }

    #[test]
    fn test_tenant_status_keeps_unknown_values() {
        let status = TenantSubscriptionStatus::from("GRACE_PERIOD");
        assert_eq!(status, TenantSubscriptionStatus::Other("GRACE_PERIOD".to_string()));
        assert_eq!(status.as_str(), "GRACE_PERIOD");
        assert!(TenantSubscriptionStatus::from("active").is_active());
    }

    #[test]
    fn test_tenant_status_serializes_as_db_string() {
        let json = serde_json::to_string(&TenantSubscriptionStatus::PastDue).unwrap();
        assert_eq!(json, "\"PAST_DUE\"");
    }
}
