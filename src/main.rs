use groupbank::{api::handler::AppState, bootstrap, config::Config, server};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,groupbank=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("❌ Couldn't listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("❌ Couldn't listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("🛑 Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting group bank payment service");

    let config = Config::from_env()?;

    let scheduler = bootstrap::initialize_scheduler(&config).await?;
    let handle = scheduler.clone().start();

    // Create HTTP server
    let app = server::create_app(AppState { scheduler });

    // Run the server until ctrl-c or SIGTERM
    if let Err(e) = server::run_server(app, &config.bind_address, shutdown_signal()).await {
        tracing::error!("❌ Server error: {}", e);
    }

    handle.stop().await;
    info!("👋 Shutdown complete");

    Ok(())
}
