//! Result sink: validating, chunked, rollback-safe persistence.
//!
//! The sink is the only component that writes analysis output. It drops any
//! record with an incomplete or sentinel prediction before writing — a saved
//! record makes its job id permanently unselectable for reanalysis, so a
//! corrupt save is strictly worse than no save. Detail records are written
//! in fixed-size chunks after a batch header; if any chunk fails, the header
//! (and whatever details made it in) is deleted again so a partial batch is
//! never left behind.
//!
//! Reaffirmation writes for already-analyzed jobs go through a bounded queue
//! drained by a background task: they never block the caller, their errors
//! are swallowed, and the task ends when the last sink clone is dropped.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::state::EngineSnapshot;
use crate::error::StoreError;
use crate::store::Store;
use crate::types::{BatchHeader, ResultRecord};

/// Capacity of the reaffirmation queue; overflow drops the write.
const REAFFIRM_QUEUE_CAPACITY: usize = 64;

/// Errors that can occur while persisting a batch.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The store rejected an operation.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A detail chunk failed; the batch header was rolled back.
    #[error("Detail write failed for run {run_id}, header rolled back: {source}")]
    DetailWriteFailed {
        run_id: Uuid,
        #[source]
        source: StoreError,
    },
}

/// Validating persistence wrapper around a [`Store`].
#[derive(Clone)]
pub struct ResultSink {
    store: Arc<dyn Store>,
    chunk_size: usize,
    page_size: usize,
    reaffirm_tx: mpsc::Sender<String>,
}

impl ResultSink {
    /// Creates a sink over `store` and spawns its reaffirmation drain task.
    pub fn new(store: Arc<dyn Store>, chunk_size: usize, page_size: usize) -> Self {
        let (reaffirm_tx, mut reaffirm_rx) = mpsc::channel::<String>(REAFFIRM_QUEUE_CAPACITY);
        let drain_store = Arc::clone(&store);
        tokio::spawn(async move {
            while let Some(job_id) = reaffirm_rx.recv().await {
                if let Err(e) = drain_store.reaffirm(&job_id).await {
                    debug!(job_id = %job_id, error = %e, "reaffirmation write failed");
                }
            }
        });

        Self {
            store,
            chunk_size,
            page_size,
            reaffirm_tx,
        }
    }

    /// Persists a batch of results for `pool`.
    ///
    /// Records failing completeness validation are dropped. Returns the
    /// written header, or `None` when nothing was persistable.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::DetailWriteFailed` after rolling the header back
    /// if any detail chunk fails to write.
    pub async fn persist(
        &self,
        results: &[ResultRecord],
        pool: &str,
        generation: u64,
    ) -> Result<Option<BatchHeader>, SinkError> {
        let complete: Vec<ResultRecord> = results
            .iter()
            .filter(|r| r.is_complete())
            .cloned()
            .collect();

        let dropped = results.len() - complete.len();
        if dropped > 0 {
            warn!(
                pool = %pool,
                dropped = dropped,
                "dropping incomplete results before persistence"
            );
        }
        if complete.is_empty() {
            return Ok(None);
        }

        let header = BatchHeader::summarize(pool, generation, &complete);
        self.store.insert_run(&header).await?;

        for chunk in complete.chunks(self.chunk_size) {
            if let Err(source) = self.store.append_results(header.run_id, chunk).await {
                // Compensating rollback: a half-persisted batch must not
                // survive, or its ids would be excluded from reanalysis.
                if let Err(e) = self.store.delete_run(header.run_id).await {
                    warn!(run_id = %header.run_id, error = %e, "rollback of batch header failed");
                }
                return Err(SinkError::DetailWriteFailed {
                    run_id: header.run_id,
                    source,
                });
            }
        }

        Ok(Some(header))
    }

    /// Acquires the full set of already-analyzed job identifiers, paginated
    /// so no single store call hits a row limit.
    pub async fn known_ids(&self) -> Result<HashSet<String>, StoreError> {
        let mut ids = HashSet::new();
        let mut page = 0usize;
        loop {
            let batch = self.store.list_known_ids(page, self.page_size).await?;
            let batch_len = batch.len();
            ids.extend(batch);
            if batch_len < self.page_size {
                break;
            }
            page += 1;
        }
        Ok(ids)
    }

    /// Cheap liveness check against the store.
    pub async fn probe(&self) -> bool {
        self.store.probe().await
    }

    /// Queues a best-effort reaffirmation for an already-analyzed job id.
    /// Never blocks; a full queue drops the write.
    pub fn reaffirm(&self, job_id: &str) {
        if self.reaffirm_tx.try_send(job_id.to_string()).is_err() {
            debug!(job_id = %job_id, "reaffirmation queue full, dropping");
        }
    }

    /// Persists the engine snapshot.
    pub async fn save_engine_snapshot(&self, snapshot: &EngineSnapshot) -> Result<(), StoreError> {
        self.store.upsert_engine_snapshot(snapshot).await
    }

    /// Loads the persisted engine snapshot, if any.
    pub async fn load_engine_snapshot(&self) -> Result<Option<EngineSnapshot>, StoreError> {
        self.store.load_engine_snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{OutcomeLabel, Prediction};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn record(job_id: &str, complete: bool) -> ResultRecord {
        let prediction = if complete {
            Prediction::new(OutcomeLabel::WhiteWin, 0.7)
        } else {
            Prediction::unknown()
        };
        ResultRecord {
            id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            pool: "volume".to_string(),
            generation: 1,
            score_cp: 200,
            depth_reached: 10,
            nodes_used: 5_000,
            oracle_prediction: prediction,
            local_prediction: Prediction::new(OutcomeLabel::WhiteWin, 0.6),
            oracle_correct: complete,
            local_correct: false,
            cut_ply: 18,
            elapsed_ms: 50,
            created_at: Utc::now(),
        }
    }

    /// Store wrapper that fails every detail append.
    struct FailingAppendStore {
        inner: MemoryStore,
        fail_appends: AtomicBool,
    }

    impl FailingAppendStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                fail_appends: AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl Store for FailingAppendStore {
        async fn insert_run(&self, header: &BatchHeader) -> Result<(), StoreError> {
            self.inner.insert_run(header).await
        }

        async fn append_results(
            &self,
            run_id: Uuid,
            records: &[ResultRecord],
        ) -> Result<(), StoreError> {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(StoreError::WriteFailed("injected".to_string()));
            }
            self.inner.append_results(run_id, records).await
        }

        async fn delete_run(&self, run_id: Uuid) -> Result<(), StoreError> {
            self.inner.delete_run(run_id).await
        }

        async fn list_known_ids(
            &self,
            page: usize,
            page_size: usize,
        ) -> Result<Vec<String>, StoreError> {
            self.inner.list_known_ids(page, page_size).await
        }

        async fn count_results(&self) -> Result<u64, StoreError> {
            self.inner.count_results().await
        }

        async fn probe(&self) -> bool {
            self.inner.probe().await
        }

        async fn upsert_engine_snapshot(
            &self,
            snapshot: &EngineSnapshot,
        ) -> Result<(), StoreError> {
            self.inner.upsert_engine_snapshot(snapshot).await
        }

        async fn load_engine_snapshot(&self) -> Result<Option<EngineSnapshot>, StoreError> {
            self.inner.load_engine_snapshot().await
        }

        async fn reaffirm(&self, job_id: &str) -> Result<(), StoreError> {
            self.inner.reaffirm(job_id).await
        }
    }

    #[tokio::test]
    async fn test_persist_writes_header_and_details() {
        let store = Arc::new(MemoryStore::new());
        let sink = ResultSink::new(Arc::clone(&store) as Arc<dyn Store>, 2, 100);

        let records = vec![record("a", true), record("b", true), record("c", true)];
        let header = sink
            .persist(&records, "volume", 4)
            .await
            .expect("persist")
            .expect("header written");

        assert_eq!(header.total, 3);
        assert_eq!(header.generation, 4);
        assert_eq!(store.run_headers().len(), 1);
        assert_eq!(store.all_results().len(), 3);
    }

    #[tokio::test]
    async fn test_persist_filters_incomplete_records() {
        let store = Arc::new(MemoryStore::new());
        let sink = ResultSink::new(Arc::clone(&store) as Arc<dyn Store>, 10, 100);

        let records = vec![record("a", true), record("b", false)];
        let header = sink
            .persist(&records, "volume", 1)
            .await
            .expect("persist")
            .expect("header written");

        assert_eq!(header.total, 1);
        let persisted = store.all_results();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].job_id, "a");
    }

    #[tokio::test]
    async fn test_persist_all_incomplete_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let sink = ResultSink::new(Arc::clone(&store) as Arc<dyn Store>, 10, 100);

        let records = vec![record("a", false)];
        let header = sink.persist(&records, "volume", 1).await.expect("persist");

        assert!(header.is_none());
        assert!(store.run_headers().is_empty());
    }

    #[tokio::test]
    async fn test_detail_failure_rolls_back_header() {
        let store = Arc::new(FailingAppendStore::new());
        let sink = ResultSink::new(Arc::clone(&store) as Arc<dyn Store>, 10, 100);

        let records = vec![record("a", true)];
        let result = sink.persist(&records, "volume", 1).await;

        assert!(matches!(result, Err(SinkError::DetailWriteFailed { .. })));
        assert!(store.inner.run_headers().is_empty());
        assert!(store
            .inner
            .list_known_ids(0, 100)
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn test_known_ids_crosses_page_boundaries() {
        let store = Arc::new(MemoryStore::new());
        // Page size 2 forces three paginated calls for five ids.
        let sink = ResultSink::new(Arc::clone(&store) as Arc<dyn Store>, 10, 2);

        let records: Vec<ResultRecord> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|id| record(id, true))
            .collect();
        sink.persist(&records, "volume", 1).await.expect("persist");

        let ids = sink.known_ids().await.expect("known ids");
        assert_eq!(ids.len(), 5);
        assert!(ids.contains("e"));
    }

    #[tokio::test]
    async fn test_reaffirm_is_fire_and_forget() {
        let store = Arc::new(MemoryStore::new());
        let sink = ResultSink::new(Arc::clone(&store) as Arc<dyn Store>, 10, 100);

        let records = vec![record("a", true)];
        sink.persist(&records, "volume", 1).await.expect("persist");

        sink.reaffirm("a");
        // The drain task runs concurrently; give it a moment.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(store.reaffirmation_count("a"), 1);
    }

    #[tokio::test]
    async fn test_snapshot_passthrough() {
        let store = Arc::new(MemoryStore::new());
        let sink = ResultSink::new(Arc::clone(&store) as Arc<dyn Store>, 10, 100);

        assert!(sink.load_engine_snapshot().await.expect("load").is_none());

        let state = crate::engine::state::EngineState::new(["volume", "deep"]);
        state.record_batch_success("volume", 2);
        sink.save_engine_snapshot(&state.snapshot())
            .await
            .expect("save");

        let loaded = sink
            .load_engine_snapshot()
            .await
            .expect("load")
            .expect("present");
        assert_eq!(loaded.total_results, 2);
    }
}
