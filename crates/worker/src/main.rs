//! WaveOrder Background Worker
//!
//! Handles scheduled jobs:
//! - Stripe sync sweep: analyze every active business with a Stripe customer
//!   and stamp the result (daily at 03:30 UTC by default, never fixes)
//! - Heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use waveorder_billing::BillingService;
use waveorder_shared::create_pool;

const DEFAULT_SWEEP_CRON: &str = "0 30 3 * * *";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting WaveOrder Worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url, 5).await?;
    info!("Database pool created");

    let billing = match BillingService::from_env(pool.clone()) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            // Nothing to sweep without Stripe
            warn!(error = %e, "Failed to create billing service - running in minimal mode");
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    let sweep_cron =
        std::env::var("SYNC_SWEEP_CRON").unwrap_or_else(|_| DEFAULT_SWEEP_CRON.to_string());

    let scheduler = JobScheduler::new().await?;

    // Job 1: Stripe sync sweep
    let sweep_billing = billing.clone();
    scheduler
        .add(Job::new_async(sweep_cron.as_str(), move |_uuid, _l| {
            let billing = sweep_billing.clone();
            Box::pin(async move {
                info!("Running scheduled Stripe sync sweep");
                if let Err(e) = billing.reconciler.sweep().await {
                    error!(error = %e, "Stripe sync sweep failed");
                }
            })
        })?)
        .await?;
    info!(cron = %sweep_cron, "Scheduled: Stripe sync sweep");

    // Job 2: Heartbeat
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    scheduler.start().await?;
    info!("Scheduler started");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    Ok(())
}
