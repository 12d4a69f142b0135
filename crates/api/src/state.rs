//! Application state

use std::sync::Arc;

use sqlx::PgPool;
use waveorder_analytics::{AnalyticsService, CxService};
use waveorder_billing::BillingService;

use crate::{auth::JwtManager, config::Config, error::ApiError};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt_manager: JwtManager,
    /// `None` when billing is disabled or Stripe is not configured
    pub billing: Option<Arc<BillingService>>,
    pub analytics: AnalyticsService,
    pub cx: CxService,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let billing = if config.enable_billing {
            match BillingService::from_env(pool.clone()) {
                Ok(svc) => {
                    tracing::info!("Stripe billing service initialized");
                    Some(Arc::new(svc.with_fix_lock_ttl(time::Duration::seconds(
                        config.fix_lock_ttl_secs,
                    ))))
                }
                Err(e) => {
                    tracing::warn!("Stripe billing not configured: {}", e);
                    None
                }
            }
        } else {
            tracing::info!("Billing disabled via config (ENABLE_BILLING=false)");
            None
        };

        Self {
            jwt_manager: JwtManager::new(&config.jwt_secret),
            analytics: AnalyticsService::from_pool(pool.clone()),
            cx: CxService::from_pool(pool.clone()),
            billing,
            pool,
            config,
        }
    }

    pub fn billing(&self) -> Result<&BillingService, ApiError> {
        self.billing
            .as_deref()
            .ok_or_else(|| ApiError::ServiceUnavailable("Billing is not configured".to_string()))
    }
}
