use std::net::SocketAddr;
use std::sync::Arc;

use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use orderpay_backend::api::{self, AppState};
use orderpay_backend::config::Config;
use orderpay_backend::engine::ReconciliationEngine;
use orderpay_backend::gateways::GatewayRegistry;
use orderpay_backend::orders::OrderService;
use orderpay_backend::store::{self, LedgerStore, PgLedger, PoolConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    tracing::info!("Starting orderpay backend");
    tracing::info!("Environment: {}", config.server.environment);
    tracing::info!("eSewa merchant code: {}", config.esewa.merchant_code);

    let pool = store::init_pool(
        &config.database.url,
        Some(PoolConfig {
            max_connections: config.database.max_connections,
            ..PoolConfig::default()
        }),
    )
    .await?;

    let ledger: Arc<dyn LedgerStore> = Arc::new(PgLedger::new(pool));
    let gateways = GatewayRegistry::from_config(&config);

    let state = AppState {
        orders: Arc::new(OrderService::new(ledger.clone(), gateways.clone())),
        engine: Arc::new(ReconciliationEngine::new(ledger, gateways)),
        environment: config.server.environment.clone(),
    };

    let app = api::router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
