//! Core data model for the analysis engine.
//!
//! This module defines the types that flow through the engine:
//!
//! - `Job`: one externally-sourced game awaiting analysis
//! - `GameSnapshot`: the position/history payload of a job
//! - `GameOutcome` / `OutcomeLabel`: ground truth and predicted outcomes
//! - `Prediction`: a label plus confidence from either predictor
//! - `ResultRecord`: one completed analysis, immutable once persisted
//! - `BatchHeader`: aggregate record written ahead of a batch's details

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Final outcome of a game as recorded by the archive.
///
/// This is the ground truth that both predictors are benchmarked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOutcome {
    /// White won the game.
    WhiteWin,
    /// Black won the game.
    BlackWin,
    /// The game was drawn.
    Draw,
}

impl GameOutcome {
    /// Parses a PGN-style result tag ("1-0", "0-1", "1/2-1/2").
    ///
    /// Returns `None` for unterminated or unknown results ("*").
    pub fn from_pgn_result(s: &str) -> Option<Self> {
        match s.trim() {
            "1-0" => Some(GameOutcome::WhiteWin),
            "0-1" => Some(GameOutcome::BlackWin),
            "1/2-1/2" => Some(GameOutcome::Draw),
            _ => None,
        }
    }

    /// Returns the label corresponding to this outcome.
    pub fn as_label(&self) -> OutcomeLabel {
        match self {
            GameOutcome::WhiteWin => OutcomeLabel::WhiteWin,
            GameOutcome::BlackWin => OutcomeLabel::BlackWin,
            GameOutcome::Draw => OutcomeLabel::Draw,
        }
    }
}

impl fmt::Display for GameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameOutcome::WhiteWin => write!(f, "1-0"),
            GameOutcome::BlackWin => write!(f, "0-1"),
            GameOutcome::Draw => write!(f, "1/2-1/2"),
        }
    }
}

/// Outcome predicted by a predictor.
///
/// `Unknown` is the sentinel a predictor returns when it cannot commit to a
/// label; records carrying it are dropped by the sink rather than persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeLabel {
    /// White is predicted to win.
    WhiteWin,
    /// Black is predicted to win.
    BlackWin,
    /// A draw is predicted.
    Draw,
    /// No prediction could be made.
    Unknown,
}

impl fmt::Display for OutcomeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeLabel::WhiteWin => write!(f, "white_win"),
            OutcomeLabel::BlackWin => write!(f, "black_win"),
            OutcomeLabel::Draw => write!(f, "draw"),
            OutcomeLabel::Unknown => write!(f, "unknown"),
        }
    }
}

/// A prediction: outcome label plus confidence in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted outcome.
    pub label: OutcomeLabel,
    /// Confidence in the label (0.0 - 1.0).
    pub confidence: f64,
}

impl Prediction {
    /// Creates a new prediction.
    pub fn new(label: OutcomeLabel, confidence: f64) -> Self {
        Self { label, confidence }
    }

    /// Returns the sentinel prediction used when no label could be produced.
    pub fn unknown() -> Self {
        Self {
            label: OutcomeLabel::Unknown,
            confidence: 0.0,
        }
    }

    /// Returns whether this prediction is complete enough to persist.
    ///
    /// A prediction with an `Unknown` label or a non-finite / out-of-range
    /// confidence must never be written: a saved-but-unusable record would
    /// make its job id unselectable for reanalysis forever.
    pub fn is_complete(&self) -> bool {
        self.label != OutcomeLabel::Unknown
            && self.confidence.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
    }
}

/// Position and partial move history of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    /// Starting position in FEN, or `None` for the standard initial position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_fen: Option<String>,
    /// Moves played from the starting position, in UCI notation.
    pub moves: Vec<String>,
}

impl GameSnapshot {
    /// Creates a snapshot starting from the standard initial position.
    pub fn from_moves(moves: Vec<String>) -> Self {
        Self {
            initial_fen: None,
            moves,
        }
    }

    /// Creates a snapshot starting from a custom FEN position.
    pub fn from_fen(fen: impl Into<String>, moves: Vec<String>) -> Self {
        Self {
            initial_fen: Some(fen.into()),
            moves,
        }
    }

    /// Number of plies in the recorded history.
    pub fn ply_count(&self) -> usize {
        self.moves.len()
    }

    /// Returns a copy truncated to the first `plies` moves.
    pub fn truncated(&self, plies: usize) -> Self {
        Self {
            initial_fen: self.initial_fen.clone(),
            moves: self.moves.iter().take(plies).cloned().collect(),
        }
    }

    /// Returns whether white is to move after the recorded history.
    ///
    /// When a custom FEN is present, the FEN's side-to-move field is combined
    /// with the parity of the moves played on top of it.
    pub fn white_to_move(&self) -> bool {
        let white_at_start = match &self.initial_fen {
            None => true,
            Some(fen) => fen.split_whitespace().nth(1) != Some("b"),
        };
        if self.moves.len() % 2 == 0 {
            white_at_start
        } else {
            !white_at_start
        }
    }
}

/// One candidate unit of analysis work, keyed by a stable external id.
///
/// A job is consumed at most once per identifier across the lifetime of the
/// engine; the identifier is the deduplication key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Stable identifier assigned by the external archive.
    pub id: String,
    /// Position and move history.
    pub snapshot: GameSnapshot,
    /// Ground-truth outcome of the full game.
    pub outcome: GameOutcome,
    /// Name of the archive the job came from.
    pub source: String,
    /// When the job was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl Job {
    /// Creates a new job.
    pub fn new(
        id: impl Into<String>,
        snapshot: GameSnapshot,
        outcome: GameOutcome,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            snapshot,
            outcome,
            source: source.into(),
            fetched_at: Utc::now(),
        }
    }
}

/// One completed analysis. Immutable once persisted; the only later write a
/// record sees is an idempotent reaffirmation-count bump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Unique id of this record.
    pub id: Uuid,
    /// External identifier of the analyzed job.
    pub job_id: String,
    /// Name of the pool that produced the record.
    pub pool: String,
    /// Batch generation number at production time.
    pub generation: u64,
    /// Evaluator score in centipawns, from white's point of view.
    pub score_cp: i32,
    /// Search depth the evaluator actually reached.
    pub depth_reached: u32,
    /// Nodes the evaluator searched.
    pub nodes_used: u64,
    /// Prediction derived from the evaluator's score.
    pub oracle_prediction: Prediction,
    /// Prediction from the local predictor.
    pub local_prediction: Prediction,
    /// Whether the oracle-derived prediction matched the ground truth.
    pub oracle_correct: bool,
    /// Whether the local prediction matched the ground truth.
    pub local_correct: bool,
    /// Ply at which the history was truncated before analysis.
    pub cut_ply: usize,
    /// Wall-clock time spent analyzing this job.
    pub elapsed_ms: u64,
    /// When the record was produced.
    pub created_at: DateTime<Utc>,
}

impl ResultRecord {
    /// Returns whether both predictions are complete enough to persist.
    pub fn is_complete(&self) -> bool {
        self.oracle_prediction.is_complete() && self.local_prediction.is_complete()
    }
}

/// Aggregate header written ahead of a batch's detail records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchHeader {
    /// Unique id of the persisted run.
    pub run_id: Uuid,
    /// Pool that produced the batch.
    pub pool: String,
    /// Generation number of the batch.
    pub generation: u64,
    /// Number of detail records in the batch.
    pub total: usize,
    /// Detail records whose oracle prediction was correct.
    pub oracle_correct: usize,
    /// Detail records whose local prediction was correct.
    pub local_correct: usize,
    /// When the header was assembled.
    pub created_at: DateTime<Utc>,
}

impl BatchHeader {
    /// Builds a header summarizing `records` for `pool`.
    pub fn summarize(pool: &str, generation: u64, records: &[ResultRecord]) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pool: pool.to_string(),
            generation,
            total: records.len(),
            oracle_correct: records.iter().filter(|r| r.oracle_correct).count(),
            local_correct: records.iter().filter(|r| r.local_correct).count(),
            created_at: Utc::now(),
        }
    }

    /// Oracle accuracy over the batch, or 0.0 for an empty batch.
    pub fn oracle_accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.oracle_correct as f64 / self.total as f64
    }

    /// Local-predictor accuracy over the batch, or 0.0 for an empty batch.
    pub fn local_accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.local_correct as f64 / self.total as f64
    }
}
