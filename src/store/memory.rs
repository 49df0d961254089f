//! In-process store implementation.
//!
//! Backs tests and database-less runs. All data lives behind one mutex; the
//! accessors at the bottom let tests assert on persisted contents directly.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::engine::state::EngineSnapshot;
use crate::error::StoreError;
use crate::types::{BatchHeader, ResultRecord};

use super::Store;

#[derive(Default)]
struct Inner {
    runs: HashMap<Uuid, BatchHeader>,
    results: Vec<ResultRecord>,
    result_runs: HashMap<Uuid, Vec<Uuid>>,
    snapshot: Option<EngineSnapshot>,
    reaffirmations: HashMap<String, u32>,
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }

    /// Returns all persisted batch headers.
    pub fn run_headers(&self) -> Vec<BatchHeader> {
        self.lock().runs.values().cloned().collect()
    }

    /// Returns all persisted detail records.
    pub fn all_results(&self) -> Vec<ResultRecord> {
        self.lock().results.clone()
    }

    /// Returns how often `job_id` has been reaffirmed.
    pub fn reaffirmation_count(&self, job_id: &str) -> u32 {
        self.lock()
            .reaffirmations
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the persisted engine snapshot, if any.
    pub fn engine_snapshot(&self) -> Option<EngineSnapshot> {
        self.lock().snapshot.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_run(&self, header: &BatchHeader) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.runs.insert(header.run_id, header.clone());
        inner.result_runs.entry(header.run_id).or_default();
        Ok(())
    }

    async fn append_results(
        &self,
        run_id: Uuid,
        records: &[ResultRecord],
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.runs.contains_key(&run_id) {
            return Err(StoreError::NotFound(format!("run {}", run_id)));
        }
        for record in records {
            inner.results.push(record.clone());
            inner
                .result_runs
                .entry(run_id)
                .or_default()
                .push(record.id);
        }
        Ok(())
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.runs.remove(&run_id);
        if let Some(record_ids) = inner.result_runs.remove(&run_id) {
            inner.results.retain(|r| !record_ids.contains(&r.id));
        }
        Ok(())
    }

    async fn list_known_ids(
        &self,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.lock();
        // BTreeSet gives distinct ids in sorted order, matching the SQL
        // DISTINCT + ORDER BY pagination of the production store.
        let ids: std::collections::BTreeSet<String> =
            inner.results.iter().map(|r| r.job_id.clone()).collect();
        Ok(ids
            .into_iter()
            .skip(page * page_size)
            .take(page_size)
            .collect())
    }

    async fn count_results(&self) -> Result<u64, StoreError> {
        Ok(self.lock().results.len() as u64)
    }

    async fn probe(&self) -> bool {
        true
    }

    async fn upsert_engine_snapshot(&self, snapshot: &EngineSnapshot) -> Result<(), StoreError> {
        self.lock().snapshot = Some(snapshot.clone());
        Ok(())
    }

    async fn load_engine_snapshot(&self) -> Result<Option<EngineSnapshot>, StoreError> {
        Ok(self.lock().snapshot.clone())
    }

    async fn reaffirm(&self, job_id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let known = inner.results.iter().any(|r| r.job_id == job_id);
        if known {
            *inner.reaffirmations.entry(job_id.to_string()).or_insert(0) += 1;
        }
        Ok(())
    }
}
