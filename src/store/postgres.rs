//! PostgreSQL store implementation.
//!
//! Persists batch headers, detail records and the engine-state snapshot
//! using sqlx. Detail appends are transactional per chunk; run deletion
//! removes the header and every detail row written under it, which is what
//! the sink's compensating rollback relies on.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use crate::engine::state::EngineSnapshot;
use crate::error::StoreError;
use crate::types::{BatchHeader, OutcomeLabel, Prediction, ResultRecord};

use super::Store;

/// PostgreSQL-backed store.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects to the database.
    ///
    /// # Arguments
    ///
    /// * `database_url` - PostgreSQL connection string
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Creates a store from an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the schema if it does not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_runs (
                run_id UUID PRIMARY KEY,
                pool TEXT NOT NULL,
                generation BIGINT NOT NULL,
                total INTEGER NOT NULL,
                oracle_correct INTEGER NOT NULL,
                local_correct INTEGER NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_results (
                id UUID PRIMARY KEY,
                run_id UUID NOT NULL REFERENCES analysis_runs(run_id) ON DELETE CASCADE,
                job_id TEXT NOT NULL,
                pool TEXT NOT NULL,
                generation BIGINT NOT NULL,
                score_cp INTEGER NOT NULL,
                depth_reached INTEGER NOT NULL,
                nodes_used BIGINT NOT NULL,
                oracle_label TEXT NOT NULL,
                oracle_confidence DOUBLE PRECISION NOT NULL,
                local_label TEXT NOT NULL,
                local_confidence DOUBLE PRECISION NOT NULL,
                oracle_correct BOOLEAN NOT NULL,
                local_correct BOOLEAN NOT NULL,
                cut_ply INTEGER NOT NULL,
                elapsed_ms BIGINT NOT NULL,
                reaffirmations INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_analysis_results_job_id ON analysis_results (job_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS engine_state (
                id SMALLINT PRIMARY KEY CHECK (id = 1),
                snapshot JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn insert_run(&self, header: &BatchHeader) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO analysis_runs (
                run_id, pool, generation, total, oracle_correct, local_correct, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(header.run_id)
        .bind(&header.pool)
        .bind(header.generation as i64)
        .bind(header.total as i32)
        .bind(header.oracle_correct as i32)
        .bind(header.local_correct as i32)
        .bind(header.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_results(
        &self,
        run_id: Uuid,
        records: &[ResultRecord],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO analysis_results (
                    id, run_id, job_id, pool, generation,
                    score_cp, depth_reached, nodes_used,
                    oracle_label, oracle_confidence, local_label, local_confidence,
                    oracle_correct, local_correct, cut_ply, elapsed_ms, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                "#,
            )
            .bind(record.id)
            .bind(run_id)
            .bind(&record.job_id)
            .bind(&record.pool)
            .bind(record.generation as i64)
            .bind(record.score_cp)
            .bind(record.depth_reached as i32)
            .bind(record.nodes_used as i64)
            .bind(record.oracle_prediction.label.to_string())
            .bind(record.oracle_prediction.confidence)
            .bind(record.local_prediction.label.to_string())
            .bind(record.local_prediction.confidence)
            .bind(record.oracle_correct)
            .bind(record.local_correct)
            .bind(record.cut_ply as i32)
            .bind(record.elapsed_ms as i64)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<(), StoreError> {
        // Detail rows cascade from the header delete.
        sqlx::query("DELETE FROM analysis_runs WHERE run_id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_known_ids(
        &self,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT job_id FROM analysis_results
            ORDER BY job_id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(page_size as i64)
        .bind((page * page_size) as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get("job_id")).collect())
    }

    async fn count_results(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM analysis_results")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("count");
        Ok(count as u64)
    }

    async fn probe(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    async fn upsert_engine_snapshot(&self, snapshot: &EngineSnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_value(snapshot)?;
        sqlx::query(
            r#"
            INSERT INTO engine_state (id, snapshot, updated_at)
            VALUES (1, $1, $2)
            ON CONFLICT (id) DO UPDATE SET
                snapshot = EXCLUDED.snapshot,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_engine_snapshot(&self) -> Result<Option<EngineSnapshot>, StoreError> {
        let row = sqlx::query("SELECT snapshot FROM engine_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: serde_json::Value = row.get("snapshot");
                Ok(Some(serde_json::from_value(json)?))
            }
            None => Ok(None),
        }
    }

    async fn reaffirm(&self, job_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE analysis_results SET reaffirmations = reaffirmations + 1 WHERE job_id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Rebuilds a prediction from its persisted label/confidence pair.
#[allow(dead_code)]
fn prediction_from_row(label: &str, confidence: f64) -> Prediction {
    let label = match label {
        "white_win" => OutcomeLabel::WhiteWin,
        "black_win" => OutcomeLabel::BlackWin,
        "draw" => OutcomeLabel::Draw,
        _ => OutcomeLabel::Unknown,
    };
    Prediction::new(label, confidence)
}
