#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! WaveOrder Shared Types
//!
//! Plan and status types shared by the billing, analytics and API crates,
//! plus database pool helpers.

pub mod db;
pub mod types;

pub use db::{create_migration_pool, create_pool, run_migrations};
pub use types::{
    migrate_legacy_plan, BillingType, PlanParseError, SubscriptionPlan, TenantSubscriptionStatus,
    LEGACY_PLAN_MIGRATIONS,
};
