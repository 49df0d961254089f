//! System-wide recovery procedure.
//!
//! Recovery is the coordinated stop/backoff/reset/resume sequence triggered
//! when a pool crosses its consecutive-error threshold or a health probe
//! fails. It suspends all scheduling ticks, waits out a backoff so in-flight
//! network operations can drain, resets the shared evaluator, zeroes every
//! consecutive-error counter, persists the engine state, and resumes ticks
//! if the engine is still meant to be active.
//!
//! The procedure makes no exactly-once assumption: a second concurrent
//! invocation simply repeats the same steps, and the state it touches is
//! idempotent under repetition.

use tracing::{info, warn};

use super::events::EngineEvent;
use super::scheduler::EngineCore;

/// Runs one recovery cycle.
pub(crate) async fn recover(core: &EngineCore, reason: &str) {
    let generation = core.state.increment_recovery();
    warn!(reason = %reason, generation = generation, "recovery started");
    core.events.emit(EngineEvent::RecoveryStarted {
        generation,
        reason: reason.to_string(),
    });

    // Suspend every pool and health tick while the cycle runs.
    core.state.set_recovering(true);

    // Let in-flight network operations drain before touching the evaluator.
    tokio::time::sleep(core.config.recovery_backoff).await;

    let reset = tokio::time::timeout(core.config.warmup_timeout, async {
        core.oracle.lock().await.reset().await
    })
    .await;
    match reset {
        Ok(Ok(())) => info!("evaluator reset during recovery"),
        Ok(Err(e)) => warn!(error = %e, "evaluator reset failed during recovery"),
        Err(_) => warn!(
            timeout = ?core.config.warmup_timeout,
            "evaluator reset timed out during recovery"
        ),
    }

    core.state.clear_consecutive_errors();

    if let Err(e) = core.sink.save_engine_snapshot(&core.state.snapshot()).await {
        warn!(error = %e, "state persistence failed during recovery");
    }

    if core.state.is_armed() {
        // Short grace period before ticks resume.
        tokio::time::sleep(core.config.recovery_grace).await;
    }
    core.state.set_recovering(false);

    core.events.emit(EngineEvent::RecoveryComplete { generation });
    info!(generation = generation, "recovery complete");
}
