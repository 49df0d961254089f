//! Engine event bus.
//!
//! Lifecycle, batch and recovery notifications are published on a broadcast
//! channel. Subscribers receive their own receiver; a slow or dropped
//! subscriber can never propagate a failure back into the engine — a send
//! with no receivers simply discards the event.

use tokio::sync::broadcast;

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The engine armed its loops.
    EngineStarted,
    /// The engine was paused; ticks become no-ops.
    EnginePaused,
    /// The engine resumed from pause.
    EngineResumed,
    /// The engine shut its loops down.
    EngineStopped,
    /// A pool began a batch run.
    BatchStarted {
        /// Pool name.
        pool: String,
        /// Generation number of the batch.
        generation: u64,
    },
    /// A pool finished a batch run and persisted its results.
    BatchComplete {
        /// Pool name.
        pool: String,
        /// Records the batch produced.
        produced: usize,
        /// Records that passed completeness filtering and were persisted.
        persisted: usize,
    },
    /// A pool's batch run failed.
    BatchError {
        /// Pool name.
        pool: String,
        /// Failure description.
        message: String,
    },
    /// One job finished analysis inside a running batch.
    PredictionComplete {
        /// Pool name.
        pool: String,
        /// External job identifier.
        job_id: String,
        /// Whether the oracle-derived prediction matched the ground truth.
        oracle_correct: bool,
        /// Whether the local prediction matched the ground truth.
        local_correct: bool,
    },
    /// A recovery cycle began.
    RecoveryStarted {
        /// Recovery generation (lifetime count).
        generation: u64,
        /// What triggered the recovery.
        reason: String,
    },
    /// A recovery cycle finished.
    RecoveryComplete {
        /// Recovery generation (lifetime count).
        generation: u64,
    },
}

/// Default buffer size for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Broadcast-based event bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Creates a bus with the default buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a bus with an explicit buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. Never fails: with no subscribers the event is
    /// dropped.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
