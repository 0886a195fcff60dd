//! Periodic cleanup of registration codes

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::storage::Storage;

/// Delay before the first pass so startup logs stay readable
const INITIAL_DELAY_SECS: u64 = 10;

/// Remove expired and used registration codes
pub async fn purge_codes(storage: &dyn Storage) -> Result<u64> {
    let purged = storage.purge_registration_codes(Utc::now()).await?;
    if purged > 0 {
        info!("Purged {} stale registration code(s)", purged);
    } else {
        debug!("No stale registration codes");
    }
    Ok(purged)
}

pub fn spawn_purge_loop(storage: Arc<dyn Storage>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(INITIAL_DELAY_SECS)).await;

        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            if let Err(e) = purge_codes(storage.as_ref()).await {
                error!("Registration code purge failed: {}", e);
            }
        }
    })
}
