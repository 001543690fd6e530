use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::handler::{
        get_custodian_balance, get_merchant_transactions, get_transactions, health_check, refund,
        AppState,
    },
    cancel::CancelHandle,
    middleware::create_cors_layer,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api",
            Router::new()
                .route("/transactions", get(get_merchant_transactions))
                .route("/transactions/:account", get(get_transactions))
                .route("/refund", post(refund))
                .route("/custodian/balance", get(get_custodian_balance)),
        )
        .layer(CompressionLayer::new())
        .layer(create_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

/// Serve until Ctrl-C, then cancel in-flight ledger work.
pub async fn run_server(
    app: Router,
    bind_address: &str,
    shutdown: CancelHandle,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("🛑 Shutdown requested, cancelling in-flight work");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}
