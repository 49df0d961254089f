//! Pool scheduler and engine lifecycle.
//!
//! The engine owns one cooperative loop per pool plus the health monitor
//! loop. A pool loop sleeps its configured interval (or is kicked by
//! `force_run_now`), checks the shared activity flags, runs one batch under
//! a hard timeout, updates counters, persists state, and continues —
//! unconditionally. That unconditional continue is the engine's never-stops
//! guarantee: every failure class is caught at the loop boundary and folded
//! into counters and events, and only an explicit `stop()` ends a loop.
//!
//! There are no module-level singletons: each `Engine` owns its state and
//! collaborators, so independent engines can coexist in one process.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{EngineConfig, PoolConfig};
use crate::error::EngineError;
use crate::oracle::{OracleClient, SharedOracle};
use crate::predictor::LocalPredictor;
use crate::sources::JobSource;
use crate::store::Store;

use super::batch::BatchRunner;
use super::events::{EngineEvent, EventBus};
use super::health;
use super::recovery;
use super::sink::ResultSink;
use super::state::{EngineState, EngineStatus};

/// Buffer size for per-batch progress channels.
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Shared internals handed to the pool, health and recovery code.
pub(crate) struct EngineCore {
    pub(crate) config: EngineConfig,
    pub(crate) state: EngineState,
    pub(crate) events: EventBus,
    pub(crate) oracle: SharedOracle,
    pub(crate) sink: ResultSink,
    pub(crate) runner: BatchRunner,
}

/// Handles owned only while the loops are armed.
#[derive(Default)]
struct LoopHandles {
    shutdown_tx: Option<broadcast::Sender<()>>,
    kicks: HashMap<String, mpsc::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
}

/// The continuous dual-pool analysis engine.
pub struct Engine {
    core: Arc<EngineCore>,
    loops: Mutex<LoopHandles>,
}

impl Engine {
    /// Creates an engine over the given collaborators.
    ///
    /// Must be called within a tokio runtime (the sink spawns its
    /// reaffirmation drain task).
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` if the configuration fails validation.
    pub fn new(
        config: EngineConfig,
        oracle: Box<dyn OracleClient>,
        source: Arc<dyn JobSource>,
        predictor: Arc<dyn LocalPredictor>,
        store: Arc<dyn Store>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let oracle: SharedOracle = Arc::new(Mutex::new(oracle));
        let sink = ResultSink::new(
            store,
            config.persist_chunk_size,
            config.known_ids_page_size,
        );
        let runner = BatchRunner::new(
            source,
            Arc::clone(&oracle),
            predictor,
            sink.clone(),
            config.overfetch_factor,
            config.min_cut_plies,
            config.rng_seed,
        );
        let state = EngineState::new(config.pools().map(|p| p.name.clone()));

        Ok(Self {
            core: Arc::new(EngineCore {
                config,
                state,
                events: EventBus::new(),
                oracle,
                sink,
                runner,
            }),
            loops: Mutex::new(LoopHandles::default()),
        })
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.core.events.subscribe()
    }

    /// Read access to the engine's state counters.
    pub fn state(&self) -> &EngineState {
        &self.core.state
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    /// Loads persisted state, warms the evaluator (best effort) and arms
    /// one loop per pool plus the health monitor.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AlreadyRunning` if the loops are already armed.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut loops = self.loops.lock().await;
        if self.core.state.is_armed() {
            return Err(EngineError::AlreadyRunning);
        }

        // Best-effort state restore; any failure falls back to zero state.
        match self.core.sink.load_engine_snapshot().await {
            Ok(Some(snapshot)) => {
                info!(
                    total_results = snapshot.total_results,
                    generation = snapshot.generation,
                    "restored persisted engine state"
                );
                self.core.state.restore(&snapshot);
            }
            Ok(None) => info!("no persisted engine state, starting fresh"),
            Err(e) => warn!(error = %e, "failed to load persisted state, starting fresh"),
        }

        // Best-effort warm-up; the first batch retries on failure.
        let warmed = tokio::time::timeout(self.core.config.warmup_timeout, async {
            self.core.oracle.lock().await.warm_up().await
        })
        .await;
        match warmed {
            Ok(Ok(())) => info!("evaluator warmed up"),
            Ok(Err(e)) => warn!(error = %e, "evaluator warm-up failed, first batch will retry"),
            Err(_) => warn!(
                timeout = ?self.core.config.warmup_timeout,
                "evaluator warm-up timed out, first batch will retry"
            ),
        }

        self.core.state.set_recovering(false);
        self.core.state.set_status(EngineStatus::Running);

        let (shutdown_tx, _) = broadcast::channel(1);
        for pool in self.core.config.pools() {
            let (kick_tx, kick_rx) = mpsc::channel(1);
            loops.kicks.insert(pool.name.clone(), kick_tx);
            loops.tasks.push(tokio::spawn(pool_loop(
                Arc::clone(&self.core),
                pool.clone(),
                kick_rx,
                shutdown_tx.subscribe(),
            )));
        }
        loops.tasks.push(tokio::spawn(health::health_loop(
            Arc::clone(&self.core),
            shutdown_tx.subscribe(),
        )));
        loops.shutdown_tx = Some(shutdown_tx);

        self.core.events.emit(EngineEvent::EngineStarted);
        info!("engine started");
        Ok(())
    }

    /// Pauses scheduling: loops stay armed but every tick is a no-op.
    /// Counters and state are untouched. An in-flight batch finishes under
    /// its own timeouts before the pause takes visible effect on its pool.
    pub fn pause(&self) -> Result<(), EngineError> {
        if self.core.state.status() != EngineStatus::Running {
            return Err(EngineError::NotRunning);
        }
        self.core.state.set_status(EngineStatus::Paused);
        self.core.events.emit(EngineEvent::EnginePaused);
        info!("engine paused");
        Ok(())
    }

    /// Resumes scheduling after a pause.
    pub fn resume(&self) -> Result<(), EngineError> {
        if self.core.state.status() != EngineStatus::Paused {
            return Err(EngineError::NotRunning);
        }
        self.core.state.set_status(EngineStatus::Running);
        self.core.events.emit(EngineEvent::EngineResumed);
        info!("engine resumed");
        Ok(())
    }

    /// Shuts the loops down, waits for in-flight batches to finish, and
    /// persists final state. Lifetime counters are kept.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotRunning` if the loops are not armed.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let mut loops = self.loops.lock().await;
        if !self.core.state.is_armed() {
            return Err(EngineError::NotRunning);
        }

        self.core.state.set_status(EngineStatus::Stopped);
        if let Some(shutdown_tx) = loops.shutdown_tx.take() {
            // Send error only means every loop already exited.
            let _ = shutdown_tx.send(());
        }
        loops.kicks.clear();

        for task in loops.tasks.drain(..) {
            if let Err(e) = task.await {
                error!(error = %e, "engine loop panicked during shutdown");
            }
        }

        if let Err(e) = self.core.sink.save_engine_snapshot(&self.core.state.snapshot()).await {
            warn!(error = %e, "final state persistence failed");
        }

        self.core.events.emit(EngineEvent::EngineStopped);
        info!("engine stopped");
        Ok(())
    }

    /// Triggers `pool`'s batch outside its normal interval. Returns whether
    /// the kick was accepted; a paused or stopped engine ignores kicks.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownPool` for an unconfigured pool name.
    pub async fn force_run_now(&self, pool: &str) -> Result<bool, EngineError> {
        if self.core.config.pool(pool).is_none() {
            return Err(EngineError::UnknownPool(pool.to_string()));
        }
        if !self.core.state.is_active() {
            return Ok(false);
        }
        let loops = self.loops.lock().await;
        match loops.kicks.get(pool) {
            Some(kick) => Ok(kick.try_send(()).is_ok()),
            None => Ok(false),
        }
    }
}

/// One pool's scheduling loop.
async fn pool_loop(
    core: Arc<EngineCore>,
    pool: PoolConfig,
    mut kick: mpsc::Receiver<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(pool = %pool.name, interval = ?pool.poll_interval, "pool loop started");
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(pool.poll_interval) => {}
            Some(()) = kick.recv() => {}
        }
        if !core.state.is_active() {
            // Paused, stopped since the timer armed, or mid-recovery.
            continue;
        }
        run_pool_batch(&core, &pool).await;
    }
    info!(pool = %pool.name, "pool loop stopped");
}

/// Runs one scheduled batch for `pool`, converting every failure class into
/// counters and events. Never returns an error.
async fn run_pool_batch(core: &Arc<EngineCore>, pool: &PoolConfig) {
    let generation = core.state.next_generation();
    core.events.emit(EngineEvent::BatchStarted {
        pool: pool.name.clone(),
        generation,
    });

    // Progress records are drained off the batch's channel and republished
    // as events, decoupling subscribers from the batch call stack.
    let (progress_tx, mut progress_rx) =
        mpsc::channel::<crate::types::ResultRecord>(PROGRESS_CHANNEL_CAPACITY);
    let progress_events = core.events.clone();
    let progress_pool = pool.name.clone();
    let drain = tokio::spawn(async move {
        while let Some(record) = progress_rx.recv().await {
            progress_events.emit(EngineEvent::PredictionComplete {
                pool: progress_pool.clone(),
                job_id: record.job_id,
                oracle_correct: record.oracle_correct,
                local_correct: record.local_correct,
            });
        }
    });

    let outcome = tokio::time::timeout(
        pool.batch_timeout,
        core.runner.run_batch(pool, generation, Some(&progress_tx)),
    )
    .await;
    drop(progress_tx);
    let _ = drain.await;

    match outcome {
        Ok(Ok(records)) => {
            let produced = records.len();
            match core.sink.persist(&records, &pool.name, generation).await {
                Ok(header) => {
                    let persisted = header.map(|h| h.total).unwrap_or(0);
                    core.state.record_batch_success(&pool.name, persisted);
                    core.events.emit(EngineEvent::BatchComplete {
                        pool: pool.name.clone(),
                        produced,
                        persisted,
                    });
                    info!(
                        pool = %pool.name,
                        generation = generation,
                        produced = produced,
                        persisted = persisted,
                        "batch complete"
                    );
                }
                Err(e) => {
                    // Persistence failure: surfaced via the error event, but
                    // not counted toward the engine's health counters.
                    warn!(pool = %pool.name, error = %e, "batch persistence failed");
                    core.events.emit(EngineEvent::BatchError {
                        pool: pool.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(Err(e)) => {
            batch_failure(core, pool, e.to_string(), false).await;
        }
        Err(_) => {
            let message = format!("batch timed out after {:?}", pool.batch_timeout);
            batch_failure(core, pool, message, true).await;
        }
    }

    if let Err(e) = core.sink.save_engine_snapshot(&core.state.snapshot()).await {
        warn!(error = %e, "state persistence failed after batch");
    }
}

/// Handles a batch-level failure: counters, events, oracle reset on a
/// suspected dead evaluator, and the recovery threshold.
async fn batch_failure(core: &Arc<EngineCore>, pool: &PoolConfig, message: String, timed_out: bool) {
    let consecutive = core.state.record_batch_failure(&pool.name);
    warn!(
        pool = %pool.name,
        consecutive = consecutive,
        error = %message,
        "batch failed"
    );
    core.events.emit(EngineEvent::BatchError {
        pool: pool.name.clone(),
        message,
    });

    if timed_out {
        // A timed-out batch usually means the evaluator process is wedged.
        let reset = tokio::time::timeout(core.config.warmup_timeout, async {
            core.oracle.lock().await.reset().await
        })
        .await;
        if let Ok(Err(e)) = reset {
            warn!(error = %e, "evaluator reset after batch timeout failed");
        }
    }

    if consecutive >= core.config.max_consecutive_errors {
        recovery::recover(core, &format!("{} consecutive batch failures on pool {}", consecutive, pool.name)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OracleError, SourceError};
    use crate::oracle::{EvalBudget, Evaluation};
    use crate::predictor::ScoreThresholdPredictor;
    use crate::sources::FetchWindow;
    use crate::store::MemoryStore;
    use crate::types::{GameSnapshot, Job};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::Duration;

    struct IdleOracle;

    #[async_trait]
    impl OracleClient for IdleOracle {
        async fn warm_up(&mut self) -> Result<(), OracleError> {
            Ok(())
        }
        async fn is_available(&mut self) -> bool {
            true
        }
        async fn evaluate(
            &mut self,
            _snapshot: &GameSnapshot,
            _budget: &EvalBudget,
        ) -> Result<Evaluation, OracleError> {
            Ok(Evaluation {
                score_cp: 0,
                depth_reached: 1,
                nodes_used: 1,
            })
        }
        async fn reset(&mut self) -> Result<(), OracleError> {
            Ok(())
        }
        async fn terminate(&mut self) {}
    }

    struct EmptySource;

    #[async_trait]
    impl JobSource for EmptySource {
        async fn fetch_candidates(
            &self,
            _exclude: &HashSet<String>,
            _count: usize,
            _window: FetchWindow,
        ) -> Result<Vec<Job>, SourceError> {
            Ok(Vec::new())
        }
    }

    fn quiet_config() -> EngineConfig {
        // Long intervals so scheduled ticks never fire during a test.
        let mut config = EngineConfig::default()
            .with_volume(PoolConfig::volume().with_poll_interval(Duration::from_secs(3_600)))
            .with_deep(PoolConfig::deep().with_poll_interval(Duration::from_secs(3_600)))
            .with_health_interval(Duration::from_secs(3_600));
        config.rng_seed = Some(1);
        config
    }

    fn engine() -> Engine {
        Engine::new(
            quiet_config(),
            Box::new(IdleOracle),
            Arc::new(EmptySource),
            Arc::new(ScoreThresholdPredictor::default()),
            Arc::new(MemoryStore::new()),
        )
        .expect("engine builds")
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let engine = engine();
        engine.start().await.expect("first start");
        assert!(matches!(
            engine.start().await,
            Err(EngineError::AlreadyRunning)
        ));
        engine.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_stop_when_idle_fails() {
        let engine = engine();
        assert!(matches!(engine.stop().await, Err(EngineError::NotRunning)));
    }

    #[tokio::test]
    async fn test_lifecycle_events_and_status() {
        let engine = engine();
        let mut events = engine.subscribe();

        engine.start().await.expect("start");
        assert_eq!(engine.state().status(), EngineStatus::Running);

        engine.pause().expect("pause");
        assert_eq!(engine.state().status(), EngineStatus::Paused);

        engine.resume().expect("resume");
        assert_eq!(engine.state().status(), EngineStatus::Running);

        engine.stop().await.expect("stop");
        assert_eq!(engine.state().status(), EngineStatus::Stopped);

        assert_eq!(events.recv().await.expect("e1"), EngineEvent::EngineStarted);
        assert_eq!(events.recv().await.expect("e2"), EngineEvent::EnginePaused);
        assert_eq!(events.recv().await.expect("e3"), EngineEvent::EngineResumed);
        assert_eq!(events.recv().await.expect("e4"), EngineEvent::EngineStopped);
    }

    #[tokio::test]
    async fn test_pause_requires_running() {
        let engine = engine();
        assert!(matches!(engine.pause(), Err(EngineError::NotRunning)));
        engine.start().await.expect("start");
        assert!(matches!(engine.resume(), Err(EngineError::NotRunning)));
        engine.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let engine = engine();
        engine.start().await.expect("start");
        engine.stop().await.expect("stop");
        engine.start().await.expect("second start");
        assert_eq!(engine.state().status(), EngineStatus::Running);
        engine.stop().await.expect("second stop");
    }

    #[tokio::test]
    async fn test_force_run_unknown_pool() {
        let engine = engine();
        engine.start().await.expect("start");
        assert!(matches!(
            engine.force_run_now("midnight").await,
            Err(EngineError::UnknownPool(_))
        ));
        engine.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_force_run_ignored_when_not_active() {
        let engine = engine();
        // Not started yet: known pool, but no kick accepted.
        assert!(!engine.force_run_now("volume").await.expect("no-op"));

        engine.start().await.expect("start");
        engine.pause().expect("pause");
        assert!(!engine.force_run_now("volume").await.expect("paused no-op"));
        engine.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_force_run_accepted_when_running() {
        let engine = engine();
        engine.start().await.expect("start");
        assert!(engine.force_run_now("volume").await.expect("kick"));
        engine.stop().await.expect("stop");
    }
}
