//! Independent health monitor.
//!
//! Runs on its own loop, separate from the pool loops. Each tick verifies
//! that the shared evaluator responds (attempting one in-place reset if it
//! does not) and that the store accepts a trivial read. If either check
//! stays bad, the system-wide recovery procedure runs. The loop reschedules
//! itself unconditionally, whatever the check's outcome.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::recovery;
use super::scheduler::EngineCore;

/// Health monitor loop; runs until the shutdown signal arrives.
pub(crate) async fn health_loop(core: Arc<EngineCore>, mut shutdown: broadcast::Receiver<()>) {
    info!("health monitor started");
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(core.config.health_interval) => {}
        }
        if !core.state.is_active() {
            continue;
        }
        if let Some(reason) = failing_check(&core).await {
            warn!(reason = %reason, "health check failed");
            recovery::recover(&core, &reason).await;
        }
    }
    info!("health monitor stopped");
}

/// Runs both probes. Returns the failure reason, or `None` when healthy.
async fn failing_check(core: &EngineCore) -> Option<String> {
    if !oracle_healthy(core).await {
        return Some("evaluator unavailable after in-place reset".to_string());
    }
    let store_ok = tokio::time::timeout(core.config.health_probe_timeout, core.sink.probe())
        .await
        .unwrap_or(false);
    if !store_ok {
        return Some("store read probe failed".to_string());
    }
    None
}

/// Probes the evaluator, attempting one in-place reset if it is unresponsive.
///
/// A lock that cannot be acquired within the probe budget means an
/// evaluation is in flight, which is evidence of life, not of failure.
async fn oracle_healthy(core: &EngineCore) -> bool {
    let guard = tokio::time::timeout(core.config.health_probe_timeout, core.oracle.lock()).await;
    let mut oracle = match guard {
        Ok(oracle) => oracle,
        Err(_) => {
            debug!("evaluator busy during health check, skipping probe");
            return true;
        }
    };

    let available = tokio::time::timeout(core.config.health_probe_timeout, oracle.is_available())
        .await
        .unwrap_or(false);
    if available {
        return true;
    }

    warn!("evaluator unavailable, attempting in-place reset");
    let reset = tokio::time::timeout(core.config.warmup_timeout, oracle.reset()).await;
    match reset {
        Ok(Ok(())) => tokio::time::timeout(core.config.health_probe_timeout, oracle.is_available())
            .await
            .unwrap_or(false),
        Ok(Err(e)) => {
            warn!(error = %e, "in-place evaluator reset failed");
            false
        }
        Err(_) => {
            warn!("in-place evaluator reset timed out");
            false
        }
    }
}
