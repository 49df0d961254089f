//! Integration tests for the UCI oracle adapter.
//!
//! These tests drive a real UCI engine binary.
//! Run with: AUTOBENCH_ENGINE_BIN=/path/to/stockfish cargo test --test uci_engine -- --ignored

use std::time::Duration;

use autobench::oracle::{EvalBudget, OracleClient, UciOracle};
use autobench::types::GameSnapshot;

fn engine_bin() -> String {
    std::env::var("AUTOBENCH_ENGINE_BIN").unwrap_or_else(|_| "stockfish".to_string())
}

fn test_oracle() -> UciOracle {
    UciOracle::new(engine_bin())
        .with_option("Threads", "1")
        .with_io_timeout(Duration::from_secs(15))
}

#[tokio::test]
#[ignore] // Run with: cargo test --test uci_engine -- --ignored
async fn test_warm_up_and_availability() {
    let mut oracle = test_oracle();

    assert!(!oracle.is_available().await);
    oracle.warm_up().await.expect("warm-up should succeed");
    assert!(oracle.is_available().await);

    // Idempotent: a second warm-up on a live engine is a no-op.
    oracle.warm_up().await.expect("second warm-up");
    assert!(oracle.is_available().await);

    oracle.terminate().await;
    assert!(!oracle.is_available().await);
}

#[tokio::test]
#[ignore]
async fn test_evaluate_startpos() {
    let mut oracle = test_oracle();
    oracle.warm_up().await.expect("warm-up");

    let snapshot = GameSnapshot::from_moves(vec!["e2e4".to_string(), "e7e5".to_string()]);
    let eval = oracle
        .evaluate(&snapshot, &EvalBudget::new(8, 0))
        .await
        .expect("evaluation should succeed");

    assert!(eval.depth_reached >= 1);
    assert!(eval.nodes_used > 0);
    // A balanced opening should not read as a decisive advantage.
    assert!(eval.score_cp.abs() < 300, "score: {}", eval.score_cp);

    oracle.terminate().await;
}

#[tokio::test]
#[ignore]
async fn test_evaluate_winning_position_for_black() {
    let mut oracle = test_oracle();
    oracle.warm_up().await.expect("warm-up");

    // White has only a king; black keeps a queen. White to move.
    let snapshot = GameSnapshot::from_fen("4k2q/8/8/8/8/8/8/4K3 w - - 0 1", vec![]);
    let eval = oracle
        .evaluate(&snapshot, &EvalBudget::new(10, 0))
        .await
        .expect("evaluation should succeed");

    // White-relative score must be heavily negative.
    assert!(eval.score_cp < -500, "score: {}", eval.score_cp);

    oracle.terminate().await;
}

#[tokio::test]
#[ignore]
async fn test_reset_recovers_evaluator() {
    let mut oracle = test_oracle();
    oracle.warm_up().await.expect("warm-up");

    oracle.reset().await.expect("reset should respawn");
    assert!(oracle.is_available().await);

    let snapshot = GameSnapshot::from_moves(vec!["d2d4".to_string()]);
    oracle
        .evaluate(&snapshot, &EvalBudget::new(6, 0))
        .await
        .expect("evaluation after reset");

    oracle.terminate().await;
}
