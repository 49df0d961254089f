//! Persistence interface for analysis results and engine state.
//!
//! The store is an opaque collaborator: the engine only needs to append
//! result records under a batch header, query which job identifiers have
//! already been analyzed (paginated), keep one engine-state snapshot up to
//! date, and answer a cheap liveness probe. Two implementations ship:
//!
//! - `MemoryStore`: in-process, used by tests and offline runs
//! - `PostgresStore`: sqlx-backed production store

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::engine::state::EngineSnapshot;
use crate::error::StoreError;
use crate::types::{BatchHeader, ResultRecord};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Persistence backend for the engine.
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts a batch header.
    async fn insert_run(&self, header: &BatchHeader) -> Result<(), StoreError>;

    /// Appends detail records belonging to `run_id`.
    async fn append_results(
        &self,
        run_id: Uuid,
        records: &[ResultRecord],
    ) -> Result<(), StoreError>;

    /// Deletes a run header and any detail records already written under it.
    /// Used for compensating rollback; deleting a missing run is not an error.
    async fn delete_run(&self, run_id: Uuid) -> Result<(), StoreError>;

    /// Lists distinct analyzed job identifiers, paginated from page 0.
    async fn list_known_ids(
        &self,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Counts persisted detail records.
    async fn count_results(&self) -> Result<u64, StoreError>;

    /// Cheap liveness check; returns `false` instead of erroring.
    async fn probe(&self) -> bool;

    /// Persists the engine-state snapshot, replacing any previous one.
    async fn upsert_engine_snapshot(&self, snapshot: &EngineSnapshot) -> Result<(), StoreError>;

    /// Loads the persisted engine-state snapshot, if any.
    async fn load_engine_snapshot(&self) -> Result<Option<EngineSnapshot>, StoreError>;

    /// Bumps the reaffirmation counter for an already-analyzed job id.
    /// Idempotent in effect; reaffirming an unknown id is a no-op.
    async fn reaffirm(&self, job_id: &str) -> Result<(), StoreError>;
}
