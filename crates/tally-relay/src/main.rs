use std::time::Duration;

use tally_relay::api::{self, AppState};
use tally_relay::config::ServerConfig;
use tally_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tally_relay=debug")),
        )
        .init();

    info!("Starting Tally relay v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let db = Database::open_at(&config.database_path)?;
    let http_addr = config.http_addr;
    let state = AppState::new(db, config);

    // Forget rate-limit clients idle for more than 10 minutes
    let rl = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let purged = rl.evict_idle(Duration::from_secs(600)).await;
            if purged > 0 {
                tracing::debug!(purged, "purged idle rate-limit buckets");
            }
        }
    });

    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
