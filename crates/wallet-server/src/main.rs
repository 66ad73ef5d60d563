use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use wallet_server::provider::{PaypalClient, ProviderRegistry};
use wallet_server::store::{
    InMemoryIntentStore, InMemoryLedgerStore, IntentStore, LedgerStore, PgIntentStore,
    PgLedgerStore,
};
use wallet_server::{create_router, db, AppState, PaymentEngine, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wallet_server=info,tower_http=info")),
        )
        .init();

    let config = ServerConfig::parse();

    let intents: Arc<dyn IntentStore>;
    let ledger: Arc<dyn LedgerStore>;
    let pool = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::connect(url)
                .await
                .context("Failed to connect to database")?;
            intents = Arc::new(PgIntentStore::new(pool.clone()));
            ledger = Arc::new(PgLedgerStore::new(pool.clone()));
            Some(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores, state is lost on exit");
            intents = Arc::new(InMemoryIntentStore::new());
            ledger = Arc::new(InMemoryLedgerStore::new());
            None
        }
    };

    let mut providers = ProviderRegistry::new();
    match config.paypal() {
        Some(paypal) => {
            let client = PaypalClient::new(paypal).context("Failed to build PayPal client")?;
            providers = providers.register(Arc::new(client));
        }
        None => tracing::warn!("PayPal credentials not set; top-ups are disabled"),
    }

    let engine = PaymentEngine::new(intents, ledger, providers.clone(), config.engine());
    let mut state = AppState::new(engine).with_admin_token(config.admin_token.clone());
    if let Some(pool) = pool {
        state = state.with_pool(pool);
    }
    if state.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN not set; admin routes will reject every request");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scanner_task = config.scan_schedule().map(|schedule| {
        state
            .engine
            .scanner()
            .clone()
            .spawn(providers.kinds(), schedule, shutdown_rx)
    });

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    if let Some(task) = scanner_task {
        if let Err(e) = task.await {
            tracing::error!("Scanner task ended abnormally: {}", e);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
