//! Reference position evaluator ("oracle") interface.
//!
//! The oracle is the one shared, resource-constrained collaborator of the
//! engine. It must be explicitly warmed up before use, reports its own
//! availability, evaluates a position to a depth/node budget, and can be
//! forcibly reset when it is suspected dead. At most one oracle operation may
//! be in flight at any instant; the engine enforces this with an async mutex
//! around the client.

pub mod uci;

use async_trait::async_trait;

use crate::error::OracleError;
use crate::types::GameSnapshot;

pub use uci::UciOracle;

/// The engine's handle to its one evaluator: an async mutex makes the
/// at-most-one-operation-in-flight rule explicit even if pools ever run
/// truly in parallel.
pub type SharedOracle = std::sync::Arc<tokio::sync::Mutex<Box<dyn OracleClient>>>;

/// Analysis budget handed to the evaluator for one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalBudget {
    /// Target search depth; 0 means unconstrained.
    pub depth: u32,
    /// Node budget; 0 means unconstrained.
    pub nodes: u64,
}

impl EvalBudget {
    /// Creates a budget with the given depth and node limits.
    pub fn new(depth: u32, nodes: u64) -> Self {
        Self { depth, nodes }
    }
}

/// Result of evaluating one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// Score in centipawns from white's point of view. Mate scores are
    /// clamped to +/-`MATE_SCORE_CP`.
    pub score_cp: i32,
    /// Depth the search actually reached.
    pub depth_reached: u32,
    /// Nodes the search actually visited.
    pub nodes_used: u64,
}

/// Centipawn value used to represent a forced mate.
pub const MATE_SCORE_CP: i32 = 30_000;

/// Client for the shared position evaluator.
///
/// `warm_up` is idempotent and safe to call when already warm. `reset` and
/// `terminate` free the underlying resources; after `terminate` the next
/// `warm_up` reinitializes from scratch.
#[async_trait]
pub trait OracleClient: Send {
    /// Initializes the evaluator, or verifies it if already initialized.
    async fn warm_up(&mut self) -> Result<(), OracleError>;

    /// Returns whether the evaluator currently responds.
    async fn is_available(&mut self) -> bool;

    /// Evaluates the position reached after `snapshot`'s move history.
    async fn evaluate(
        &mut self,
        snapshot: &GameSnapshot,
        budget: &EvalBudget,
    ) -> Result<Evaluation, OracleError>;

    /// Tears the evaluator down and immediately re-warms it.
    async fn reset(&mut self) -> Result<(), OracleError>;

    /// Tears the evaluator down without re-warming.
    async fn terminate(&mut self);
}
