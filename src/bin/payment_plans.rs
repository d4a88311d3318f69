// One-shot pass over the due payment plans, for cron-style deployments.

use groupbank::{bootstrap, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,groupbank=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let scheduler = bootstrap::initialize_scheduler(&config).await?;

    let report = scheduler.run_pass().await;
    info!(
        due = report.due,
        failed = report.failed,
        "🏁 Payment plan run finished in {}ms",
        (report.finished_at - report.started_at).num_milliseconds()
    );

    if report.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
