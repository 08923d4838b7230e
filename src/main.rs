use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use riven_companion::config::Config;
use riven_companion::debrid_client::RealDebridClient;
use riven_companion::engine::Engine;
use riven_companion::library_client::RivenClient;
use riven_companion::rate_limiter::RateLimiter;
use riven_companion::state::StateStore;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let config = Config::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = config.validate() {
        error!("configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    let config = Arc::new(config);

    let rate_limiter = Arc::new(RateLimiter::new());
    rate_limiter
        .configure("library", Duration::from_secs_f64(config.riven_rate_limit_seconds))
        .await;
    rate_limiter
        .configure("debrid", Duration::from_secs_f64(config.rd_rate_limit_seconds))
        .await;

    let library = Arc::new(RivenClient::new(&config, rate_limiter.clone()));
    let debrid = Arc::new(RealDebridClient::new(&config, rate_limiter));

    let store = StateStore::new(&config.state_file);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = Engine::new(config, library, debrid, store, shutdown_rx);

    let mut run_handle = tokio::spawn(engine.run());

    tokio::select! {
        result = &mut run_handle => {
            if let Err(e) = result {
                error!("engine task panicked: {}", e);
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping reconciliation engine");
            let _ = shutdown_tx.send(true);
            if let Err(e) = run_handle.await {
                error!("engine task panicked during shutdown: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
