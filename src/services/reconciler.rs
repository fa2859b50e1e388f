//! Background catalog reconciliation
//!
//! A single long-lived task that periodically asks the upstream for its
//! set list and seeds whatever this instance doesn't have yet. Seeding is
//! strictly sequential to respect upstream rate limits; a failing set
//! never takes the cycle down with it. The shutdown token is honoured at
//! every await point.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReconcilerConfig;
use crate::services::ingestor::Ingestor;

/// Pause between consecutive set seedings within one cycle.
const SET_DELAY: Duration = Duration::from_secs(2);

/// Run the reconciliation loop until the shutdown token fires.
pub async fn run(ingestor: Arc<Ingestor>, config: ReconcilerConfig, shutdown: CancellationToken) {
    // Grace period so the process settles before the first upstream call.
    tokio::select! {
        _ = shutdown.cancelled() => return,
        _ = sleep(Duration::from_secs(config.initial_delay_secs)) => {}
    }
    info!(interval_secs = config.interval_secs, "reconciler started");

    loop {
        if let Err(e) = reconcile_once(&ingestor, &config, &shutdown).await {
            warn!(error = %e, "reconciliation cycle failed, retrying next cycle");
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sleep(Duration::from_secs(config.interval_secs)) => {}
        }
    }
    info!("reconciler stopped");
}

async fn reconcile_once(
    ingestor: &Ingestor,
    config: &ReconcilerConfig,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let sets = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        result = ingestor.client().list_sets() => result?,
    };

    let mut missing = Vec::new();
    for set in sets {
        if config.ignored_set_types.iter().any(|t| t == &set.set_type) {
            continue;
        }
        if shutdown.is_cancelled() {
            return Ok(());
        }
        let code = set.code.to_lowercase();
        if !ingestor.store().set_exists(&code).await? {
            missing.push(code);
        }
    }

    if missing.is_empty() {
        debug!("catalog up to date");
        return Ok(());
    }
    info!(sets = missing.len(), "seeding newly published sets");

    for code in missing {
        let outcome = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            result = ingestor.seed_set(&code) => result,
        };
        if let Err(e) = outcome {
            // Isolated: one broken set must not starve the others.
            warn!(set_code = %code, error = %e, "seeding failed, will retry next cycle");
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = sleep(SET_DELAY) => {}
        }
    }
    Ok(())
}
