//! Process-wide engine state: counters, flags, and the persisted snapshot.
//!
//! One `EngineState` instance is owned by one engine; there are no
//! module-level singletons, so independent engines (e.g. in tests) coexist
//! freely. All mutation goes through atomic operations on `&self`, and the
//! lifetime counters are monotonically non-decreasing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of the engine.
///
/// `Idle` is the only state before the first `start()`; `Stopped` is
/// terminal until `start()` is called again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// Constructed but never started.
    Idle,
    /// Scheduling loops are armed and ticking.
    Running,
    /// Loops are armed but every tick is a no-op.
    Paused,
    /// Loops have been shut down.
    Stopped,
}

impl EngineStatus {
    fn as_u8(self) -> u8 {
        match self {
            EngineStatus::Idle => 0,
            EngineStatus::Running => 1,
            EngineStatus::Paused => 2,
            EngineStatus::Stopped => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => EngineStatus::Running,
            2 => EngineStatus::Paused,
            3 => EngineStatus::Stopped,
            _ => EngineStatus::Idle,
        }
    }
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineStatus::Idle => write!(f, "idle"),
            EngineStatus::Running => write!(f, "running"),
            EngineStatus::Paused => write!(f, "paused"),
            EngineStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Per-pool health counters.
#[derive(Debug, Default)]
pub struct PoolHealth {
    completed: AtomicU64,
    consecutive_errors: AtomicU32,
}

impl PoolHealth {
    /// Lifetime number of results this pool has produced.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Current consecutive batch-failure count.
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }
}

/// Process-wide engine state.
#[derive(Debug)]
pub struct EngineState {
    status: AtomicU8,
    recovering: AtomicBool,
    total_results: AtomicU64,
    consecutive_errors: AtomicU32,
    recovery_count: AtomicU64,
    generation: AtomicU64,
    pools: HashMap<String, PoolHealth>,
    last_error_at: Mutex<Option<DateTime<Utc>>>,
    last_success_at: Mutex<Option<DateTime<Utc>>>,
}

impl EngineState {
    /// Creates state tracking the given pools.
    pub fn new<I, S>(pool_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pools = pool_names
            .into_iter()
            .map(|name| (name.into(), PoolHealth::default()))
            .collect();
        Self {
            status: AtomicU8::new(EngineStatus::Idle.as_u8()),
            recovering: AtomicBool::new(false),
            total_results: AtomicU64::new(0),
            consecutive_errors: AtomicU32::new(0),
            recovery_count: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            pools,
            last_error_at: Mutex::new(None),
            last_success_at: Mutex::new(None),
        }
    }

    /// Current lifecycle status.
    pub fn status(&self) -> EngineStatus {
        EngineStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Sets the lifecycle status.
    pub fn set_status(&self, status: EngineStatus) {
        self.status.store(status.as_u8(), Ordering::SeqCst);
    }

    /// Whether batch ticks should run right now.
    pub fn is_active(&self) -> bool {
        self.status() == EngineStatus::Running && !self.is_recovering()
    }

    /// Whether the engine is armed (running or merely paused).
    pub fn is_armed(&self) -> bool {
        matches!(self.status(), EngineStatus::Running | EngineStatus::Paused)
    }

    /// Whether a recovery cycle is in progress.
    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::SeqCst)
    }

    /// Marks a recovery cycle in progress (or finished).
    pub fn set_recovering(&self, recovering: bool) {
        self.recovering.store(recovering, Ordering::SeqCst);
    }

    /// Health counters for one pool.
    pub fn pool(&self, name: &str) -> Option<&PoolHealth> {
        self.pools.get(name)
    }

    /// Lifetime total of persisted results.
    pub fn total_results(&self) -> u64 {
        self.total_results.load(Ordering::SeqCst)
    }

    /// Engine-wide consecutive batch-failure count.
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }

    /// Number of completed recovery cycles.
    pub fn recovery_count(&self) -> u64 {
        self.recovery_count.load(Ordering::SeqCst)
    }

    /// Current batch generation number.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Advances the generation counter and returns the new value.
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Records a successful batch: bumps lifetime totals and breaks both the
    /// pool's and the engine's consecutive-error streak.
    pub fn record_batch_success(&self, pool: &str, produced: usize) {
        self.total_results
            .fetch_add(produced as u64, Ordering::SeqCst);
        if let Some(health) = self.pools.get(pool) {
            health
                .completed
                .fetch_add(produced as u64, Ordering::SeqCst);
            health.consecutive_errors.store(0, Ordering::SeqCst);
        }
        self.consecutive_errors.store(0, Ordering::SeqCst);
        *self.last_success_at.lock().expect("state lock poisoned") = Some(Utc::now());
    }

    /// Records a failed batch and returns the pool's new consecutive-error
    /// count.
    pub fn record_batch_failure(&self, pool: &str) -> u32 {
        self.consecutive_errors.fetch_add(1, Ordering::SeqCst);
        *self.last_error_at.lock().expect("state lock poisoned") = Some(Utc::now());
        match self.pools.get(pool) {
            Some(health) => health.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1,
            None => 0,
        }
    }

    /// Zeroes every consecutive-error counter (engine-wide and per pool).
    pub fn clear_consecutive_errors(&self) {
        self.consecutive_errors.store(0, Ordering::SeqCst);
        for health in self.pools.values() {
            health.consecutive_errors.store(0, Ordering::SeqCst);
        }
    }

    /// Bumps the recovery counter and returns the new value.
    pub fn increment_recovery(&self) -> u64 {
        self.recovery_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Timestamp of the most recent batch failure.
    pub fn last_error_at(&self) -> Option<DateTime<Utc>> {
        *self.last_error_at.lock().expect("state lock poisoned")
    }

    /// Timestamp of the most recent batch success.
    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        *self.last_success_at.lock().expect("state lock poisoned")
    }

    /// Captures a serializable snapshot of the current state.
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            status: self.status(),
            total_results: self.total_results(),
            pool_completed: self
                .pools
                .iter()
                .map(|(name, health)| (name.clone(), health.completed()))
                .collect(),
            pool_consecutive_errors: self
                .pools
                .iter()
                .map(|(name, health)| (name.clone(), health.consecutive_errors()))
                .collect(),
            consecutive_errors: self.consecutive_errors(),
            recovery_count: self.recovery_count(),
            generation: self.generation(),
            last_error_at: self.last_error_at(),
            last_success_at: self.last_success_at(),
            updated_at: Utc::now(),
        }
    }

    /// Restores counters from a persisted snapshot. Lifecycle status is not
    /// restored; a freshly started engine decides its own status.
    pub fn restore(&self, snapshot: &EngineSnapshot) {
        self.total_results
            .store(snapshot.total_results, Ordering::SeqCst);
        self.consecutive_errors
            .store(snapshot.consecutive_errors, Ordering::SeqCst);
        self.recovery_count
            .store(snapshot.recovery_count, Ordering::SeqCst);
        self.generation.store(snapshot.generation, Ordering::SeqCst);
        for (name, health) in &self.pools {
            if let Some(&completed) = snapshot.pool_completed.get(name) {
                health.completed.store(completed, Ordering::SeqCst);
            }
            if let Some(&errors) = snapshot.pool_consecutive_errors.get(name) {
                health.consecutive_errors.store(errors, Ordering::SeqCst);
            }
        }
        *self.last_error_at.lock().expect("state lock poisoned") = snapshot.last_error_at;
        *self.last_success_at.lock().expect("state lock poisoned") = snapshot.last_success_at;
    }
}

/// Serializable snapshot of engine state, persisted after every mutation
/// that matters and reloaded at the next start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Status at snapshot time (informational; not restored).
    pub status: EngineStatus,
    /// Lifetime total of persisted results.
    pub total_results: u64,
    /// Lifetime totals per pool.
    pub pool_completed: HashMap<String, u64>,
    /// Consecutive-error counters per pool.
    pub pool_consecutive_errors: HashMap<String, u32>,
    /// Engine-wide consecutive-error counter.
    pub consecutive_errors: u32,
    /// Completed recovery cycles.
    pub recovery_count: u64,
    /// Batch generation number.
    pub generation: u64,
    /// Most recent batch failure.
    pub last_error_at: Option<DateTime<Utc>>,
    /// Most recent batch success.
    pub last_success_at: Option<DateTime<Utc>>,
    /// When the snapshot was taken.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> EngineState {
        EngineState::new(["volume", "deep"])
    }

    #[test]
    fn test_initial_state() {
        let state = state();
        assert_eq!(state.status(), EngineStatus::Idle);
        assert!(!state.is_active());
        assert!(!state.is_armed());
        assert_eq!(state.total_results(), 0);
        assert_eq!(state.generation(), 0);
        assert_eq!(state.recovery_count(), 0);
        assert!(state.pool("volume").is_some());
        assert!(state.pool("nope").is_none());
    }

    #[test]
    fn test_status_transitions() {
        let state = state();
        state.set_status(EngineStatus::Running);
        assert!(state.is_active());
        assert!(state.is_armed());

        state.set_status(EngineStatus::Paused);
        assert!(!state.is_active());
        assert!(state.is_armed());

        state.set_status(EngineStatus::Stopped);
        assert!(!state.is_active());
        assert!(!state.is_armed());
    }

    #[test]
    fn test_recovering_suspends_activity() {
        let state = state();
        state.set_status(EngineStatus::Running);
        state.set_recovering(true);
        assert!(!state.is_active());
        state.set_recovering(false);
        assert!(state.is_active());
    }

    #[test]
    fn test_success_clears_error_streaks() {
        let state = state();
        assert_eq!(state.record_batch_failure("volume"), 1);
        assert_eq!(state.record_batch_failure("volume"), 2);
        assert_eq!(state.consecutive_errors(), 2);

        state.record_batch_success("volume", 5);
        assert_eq!(state.total_results(), 5);
        assert_eq!(state.pool("volume").unwrap().completed(), 5);
        assert_eq!(state.pool("volume").unwrap().consecutive_errors(), 0);
        assert_eq!(state.consecutive_errors(), 0);
        assert!(state.last_success_at().is_some());
    }

    #[test]
    fn test_failure_counting_is_per_pool() {
        let state = state();
        state.record_batch_failure("volume");
        state.record_batch_failure("deep");
        assert_eq!(state.pool("volume").unwrap().consecutive_errors(), 1);
        assert_eq!(state.pool("deep").unwrap().consecutive_errors(), 1);
        assert_eq!(state.consecutive_errors(), 2);
    }

    #[test]
    fn test_counters_monotone_across_partial_failures() {
        let state = state();
        state.record_batch_success("volume", 3);
        state.record_batch_failure("volume");
        state.record_batch_success("deep", 2);
        state.record_batch_failure("deep");

        assert_eq!(state.total_results(), 5);
        assert_eq!(state.pool("volume").unwrap().completed(), 3);
        assert_eq!(state.pool("deep").unwrap().completed(), 2);
    }

    #[test]
    fn test_generation_advances() {
        let state = state();
        assert_eq!(state.next_generation(), 1);
        assert_eq!(state.next_generation(), 2);
        assert_eq!(state.generation(), 2);
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let state = state();
        state.set_status(EngineStatus::Running);
        state.record_batch_success("volume", 7);
        state.record_batch_failure("deep");
        state.increment_recovery();
        state.next_generation();

        let snapshot = state.snapshot();
        let json = serde_json::to_string(&snapshot).expect("snapshot serializes");
        let parsed: EngineSnapshot = serde_json::from_str(&json).expect("snapshot parses");

        let restored = EngineState::new(["volume", "deep"]);
        restored.restore(&parsed);

        assert_eq!(restored.total_results(), 7);
        assert_eq!(restored.pool("volume").unwrap().completed(), 7);
        assert_eq!(restored.pool("deep").unwrap().consecutive_errors(), 1);
        assert_eq!(restored.recovery_count(), 1);
        assert_eq!(restored.generation(), 1);
        // Status is decided by the engine, not the snapshot
        assert_eq!(restored.status(), EngineStatus::Idle);
    }

    #[test]
    fn test_clear_consecutive_errors() {
        let state = state();
        state.record_batch_failure("volume");
        state.record_batch_failure("deep");
        state.clear_consecutive_errors();
        assert_eq!(state.consecutive_errors(), 0);
        assert_eq!(state.pool("volume").unwrap().consecutive_errors(), 0);
        assert_eq!(state.pool("deep").unwrap().consecutive_errors(), 0);
    }
}
