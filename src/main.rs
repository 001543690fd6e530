mod api;
mod bootstrap;
mod cancel;
mod chain;
mod config;
mod error;
mod ledger;
mod middleware;
mod server;
mod settlement;
mod sync;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cancel::CancelHandle;

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,merchant_ledger=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting merchant ledger backend");

    let config = config::Config::from_env()?;

    let shutdown = CancelHandle::new();
    let state = bootstrap::initialize_app_state(&config, shutdown.token()).await?;

    let app = server::create_app(state).await;
    server::run_server(app, &config.bind_address, shutdown).await?;

    info!("👋 Server stopped");

    Ok(())
}
