use std::{sync::Arc, time::Duration};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::{
    config::Config,
    error::AppResult,
    execution::PaymentPlanExecutor,
    ledger::LedgerRepository,
    payment_plans::PaymentPlanRepository,
    scheduler::{PaymentPlanScheduler, SchedulerConfig},
};

/// Wire the Postgres-backed stores into an executor and its scheduler.
/// The scheduler is returned unstarted.
pub async fn initialize_scheduler(config: &Config) -> AppResult<Arc<PaymentPlanScheduler>> {
    info!("Initializing application components ...");

    // Database pool
    let pool = initialize_database(&config.database_url, config.db_max_connections).await?;

    // Core components
    let ledger = Arc::new(LedgerRepository::new(pool.clone()));
    let plans = Arc::new(PaymentPlanRepository::new(pool));

    let executor = Arc::new(PaymentPlanExecutor::new(
        ledger.clone(),
        plans.clone(),
        ledger,
    ));
    info!("✅ Payment plan executor initialized");

    let scheduler = Arc::new(PaymentPlanScheduler::new(
        SchedulerConfig {
            interval: config.payment_plan_interval(),
        },
        executor,
        plans,
    ));

    Ok(scheduler)
}

async fn initialize_database(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: {} max connections", max_connections);

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
