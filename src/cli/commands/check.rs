//! One-shot run of the daily maintenance jobs.

use std::time::Instant;

use tracing::{error, info};

use crate::config::Config;
use crate::services::scheduler::{
    run_expiration_sweep, run_pending_payment_cleanup, run_removal_sweep,
};
use crate::state::SharedState;

pub async fn cmd_check(config: Config) -> anyhow::Result<()> {
    info!("Running maintenance jobs once...");

    let plex_config = config.plex.clone();
    let shared = SharedState::new(config).await?;
    let (connected, message) = shared.plex.reload(&plex_config).await;
    if !connected {
        error!(%message, "Plex unavailable, user sweeps will be skipped");
    }

    let mut failures = 0;

    let started = Instant::now();
    if let Err(e) = run_expiration_sweep(&shared).await {
        error!(job_name = "expiration_notifications", error = %e, "Job failed");
        failures += 1;
    }
    if let Err(e) = run_removal_sweep(&shared).await {
        error!(job_name = "blocked_user_removal", error = %e, "Job failed");
        failures += 1;
    }
    if let Err(e) = run_pending_payment_cleanup(&shared).await {
        error!(job_name = "pending_payment_cleanup", error = %e, "Job failed");
        failures += 1;
    }

    info!(
        failures,
        duration_ms = started.elapsed().as_millis(),
        "Check complete"
    );
    if failures > 0 {
        anyhow::bail!("{failures} maintenance job(s) failed");
    }
    Ok(())
}
