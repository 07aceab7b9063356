// ledgerd - Collateral Market Ledger server entry point

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use collateral_market_ledger::app_state::AppState;
use collateral_market_ledger::handlers::router;
use collateral_market_ledger::{LedgerConfig, SystemClock};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "ledgerd stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = LedgerConfig::from_env()?;
    let state = Arc::new(AppState::load_or_new(&config, Arc::new(SystemClock))?);

    info!(
        owner = %config.owner,
        creation_agent = %config.creation_agent,
        resolution_agent = %config.resolution_agent,
        dispute_window = config.dispute_window_secs,
        dispute_bond = config.dispute_bond,
        dev_faucet = config.dev_faucet,
        "ledgerd configured"
    );

    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "ledgerd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown signal received, saving state");
    let _call = state.call_lock.lock().await;
    state.save_to_disk(&config.state_path)?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
}
