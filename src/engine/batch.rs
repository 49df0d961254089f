//! Batch runner: one bounded, deduplicated analysis pass for one pool.
//!
//! A batch run:
//!
//! 1. acquires the full set of already-analyzed job ids from the sink
//!    (paginated)
//! 2. overfetches candidates from the job source, excluding that set
//! 3. analyzes candidates in order until the pool's target is reached,
//!    truncating each game at a pseudo-random ply so the ground truth is
//!    hidden from the predictors, and racing every oracle call against the
//!    pool's per-job timeout
//! 4. returns the accumulated records
//!
//! A single job failing to validate or evaluate is skipped, never fatal; a
//! timed-out oracle call additionally resets the evaluator before the next
//! candidate. Producing fewer records than the target is not an error.

use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::{SourceError, StoreError};
use crate::oracle::{EvalBudget, SharedOracle};
use crate::predictor::{prediction_from_score, LocalPredictor};
use crate::sources::{FetchWindow, JobSource};
use crate::types::{Job, ResultRecord};

use super::sink::ResultSink;

/// Draw window applied when mapping the oracle's score to a label.
const ORACLE_DRAW_WINDOW_CP: i32 = 150;

/// Errors that fail a whole batch (as opposed to a single job).
#[derive(Debug, Error)]
pub enum BatchError {
    /// The job source failed outright.
    #[error("Job source failed: {0}")]
    Source(#[from] SourceError),

    /// The known-id set could not be acquired.
    #[error("Known-id acquisition failed: {0}")]
    Store(#[from] StoreError),
}

/// Runs analysis batches against the shared collaborators.
pub struct BatchRunner {
    source: std::sync::Arc<dyn JobSource>,
    oracle: SharedOracle,
    predictor: std::sync::Arc<dyn LocalPredictor>,
    sink: ResultSink,
    overfetch_factor: usize,
    min_cut_plies: usize,
    rng: Mutex<ChaCha8Rng>,
}

impl BatchRunner {
    /// Creates a runner. `rng_seed` fixes the cut-point sequence; pass
    /// `None` to seed from entropy.
    pub fn new(
        source: std::sync::Arc<dyn JobSource>,
        oracle: SharedOracle,
        predictor: std::sync::Arc<dyn LocalPredictor>,
        sink: ResultSink,
        overfetch_factor: usize,
        min_cut_plies: usize,
        rng_seed: Option<u64>,
    ) -> Self {
        let seed = rng_seed.unwrap_or_else(rand::random);
        Self {
            source,
            oracle,
            predictor,
            sink,
            overfetch_factor,
            min_cut_plies,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// Runs one batch for `pool`, streaming each finished record into
    /// `progress` (non-blocking; a full channel drops the update).
    pub async fn run_batch(
        &self,
        pool: &PoolConfig,
        generation: u64,
        progress: Option<&mpsc::Sender<ResultRecord>>,
    ) -> Result<Vec<ResultRecord>, BatchError> {
        let known = self.sink.known_ids().await?;
        let fetch_count = pool.target_batch_size * self.overfetch_factor;
        let candidates = self
            .source
            .fetch_candidates(&known, fetch_count, FetchWindow::unbounded())
            .await?;

        info!(
            pool = %pool.name,
            candidates = candidates.len(),
            known = known.len(),
            "starting batch analysis"
        );

        let budget = EvalBudget::new(pool.depth, pool.node_budget);
        let mut records = Vec::new();

        for job in candidates {
            if records.len() >= pool.target_batch_size {
                break;
            }

            if known.contains(&job.id) {
                // The exclusion set should have filtered this; reaffirm the
                // existing record and move on without counting an error.
                debug!(job_id = %job.id, "already analyzed, reaffirming");
                self.sink.reaffirm(&job.id);
                continue;
            }

            // Content validation: enough history must remain on both sides
            // of the cut point.
            if job.snapshot.ply_count() < self.min_cut_plies + 2 {
                debug!(job_id = %job.id, plies = job.snapshot.ply_count(), "game too short, skipping");
                continue;
            }

            match self.analyze_job(&job, pool, generation, &budget).await {
                Some(record) => {
                    if let Some(tx) = progress {
                        let _ = tx.try_send(record.clone());
                    }
                    records.push(record);
                }
                None => {
                    // Job-level failure: logged inside, batch continues.
                }
            }

            tokio::time::sleep(pool.delay_between_jobs).await;
        }

        info!(
            pool = %pool.name,
            produced = records.len(),
            target = pool.target_batch_size,
            "batch analysis finished"
        );
        Ok(records)
    }

    /// Analyzes one job. Returns `None` on any job-level failure.
    async fn analyze_job(
        &self,
        job: &Job,
        pool: &PoolConfig,
        generation: u64,
        budget: &EvalBudget,
    ) -> Option<ResultRecord> {
        let cut_ply = {
            let mut rng = self.rng.lock().expect("rng lock poisoned");
            rng.random_range(self.min_cut_plies..job.snapshot.ply_count())
        };
        let truncated = job.snapshot.truncated(cut_ply);

        let started = Instant::now();
        let eval = {
            let mut oracle = self.oracle.lock().await;
            match tokio::time::timeout(pool.analysis_timeout, oracle.evaluate(&truncated, budget))
                .await
            {
                Ok(Ok(eval)) => eval,
                Ok(Err(e)) => {
                    warn!(job_id = %job.id, error = %e, "evaluation failed, skipping job");
                    return None;
                }
                Err(_) => {
                    warn!(
                        job_id = %job.id,
                        timeout = ?pool.analysis_timeout,
                        "evaluation timed out, resetting evaluator and skipping job"
                    );
                    if let Err(e) = oracle.reset().await {
                        warn!(error = %e, "evaluator reset failed");
                    }
                    return None;
                }
            }
        };

        let oracle_prediction = prediction_from_score(eval.score_cp, ORACLE_DRAW_WINDOW_CP);
        let local_prediction = self.predictor.predict(&truncated, &eval);
        let truth = job.outcome.as_label();

        Some(ResultRecord {
            id: Uuid::new_v4(),
            job_id: job.id.clone(),
            pool: pool.name.clone(),
            generation,
            score_cp: eval.score_cp,
            depth_reached: eval.depth_reached,
            nodes_used: eval.nodes_used,
            oracle_correct: oracle_prediction.label == truth,
            local_correct: local_prediction.label == truth,
            oracle_prediction,
            local_prediction,
            cut_ply,
            elapsed_ms: started.elapsed().as_millis() as u64,
            created_at: Utc::now(),
        })
    }
}
