// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! WaveOrder Billing Module
//!
//! Keeps local subscription state honest against Stripe.
//!
//! ## Features
//!
//! - **Analyze**: Diff a business's Stripe subscriptions against its local record
//! - **Fix**: Apply one corrective action per detected issue, under a per-business lock
//! - **Sweep**: List businesses eligible for the scheduled sync check
//! - **Audit**: Record who ran a fix and what it did

pub mod client;
pub mod error;
pub mod events;
pub mod processor;
pub mod reconcile;
pub mod store;


// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{AuditAction, AuditEvent, AuditEventBuilder};

// Processor
pub use processor::{
    ChargeSummary, CustomerStatus, PaymentProcessor, ProcessorSubStatus, ProcessorSubscription,
    StripeProcessor,
};

// Reconcile
pub use reconcile::{
    BillingReconciler, FixResult, IssueKind, IssueSeverity, SyncIssue, SyncReport, SyncStatus,
    SweepSummary, DEFAULT_FIX_LOCK_TTL,
};

// Store
pub use store::{BillingStore, PgBillingStore, TenantBilling};

use std::sync::Arc;

use sqlx::PgPool;

/// Stripe-backed billing services wired to the application database
pub struct BillingService {
    pub stripe: StripeClient,
    pub reconciler: BillingReconciler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        let stripe = StripeClient::new(config);
        let reconciler = BillingReconciler::new(
            Arc::new(StripeProcessor::new(stripe.clone())),
            Arc::new(PgBillingStore::new(pool)),
            stripe.config().prices.clone(),
        );

        Self { stripe, reconciler }
    }

    pub fn with_fix_lock_ttl(mut self, ttl: time::Duration) -> Self {
        self.reconciler = self.reconciler.with_fix_lock_ttl(ttl);
        self
    }
}
