//! Camp Bug Hunter Server
//!
//! Serves the bug report and reward API

use std::sync::Arc;

use camp_bug_hunter::{housekeeping, open_storage, run_server, AppState, Config};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Camp Bug Hunter Server");

    let config = Config::load()?;
    let storage = open_storage(&config).await?;
    info!("{} storage initialized", storage.backend());

    let purge_interval = config.housekeeping.purge_interval_secs;
    housekeeping::spawn_purge_loop(storage.clone(), purge_interval);
    info!(
        "Registration code purge started (every {} seconds)",
        purge_interval
    );

    let state = Arc::new(AppState::new(config, storage));
    run_server(state).await?;

    Ok(())
}
