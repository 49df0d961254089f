//! Local outcome predictor interface.
//!
//! The local predictor is a pure function from a game snapshot plus the
//! evaluator's output to a secondary outcome prediction. The production
//! predictor lives in the analytics product; this module carries the trait
//! and a thin score-threshold implementation so the engine runs end to end.

use std::sync::Arc;

use crate::oracle::Evaluation;
use crate::types::{GameSnapshot, OutcomeLabel, Prediction};

/// Pure predictor: no I/O, no shared state.
pub trait LocalPredictor: Send + Sync {
    /// Predicts the game outcome from the truncated snapshot and the
    /// evaluator's assessment of it.
    fn predict(&self, snapshot: &GameSnapshot, eval: &Evaluation) -> Prediction;
}

impl<T: LocalPredictor + ?Sized> LocalPredictor for Arc<T> {
    fn predict(&self, snapshot: &GameSnapshot, eval: &Evaluation) -> Prediction {
        (**self).predict(snapshot, eval)
    }
}

/// Maps a white-relative score to an outcome label using a draw window.
///
/// Scores inside `(-draw_window_cp, +draw_window_cp)` read as a draw.
pub fn label_from_score(score_cp: i32, draw_window_cp: i32) -> OutcomeLabel {
    if score_cp >= draw_window_cp {
        OutcomeLabel::WhiteWin
    } else if score_cp <= -draw_window_cp {
        OutcomeLabel::BlackWin
    } else {
        OutcomeLabel::Draw
    }
}

/// Confidence derived from score magnitude: 0.5 at the window edge, rising
/// toward 1.0 as the advantage grows.
fn confidence_from_score(score_cp: i32, draw_window_cp: i32) -> f64 {
    let magnitude = score_cp.unsigned_abs() as f64;
    let window = draw_window_cp.max(1) as f64;
    (0.5 + 0.5 * (magnitude / (magnitude + window))).clamp(0.0, 1.0)
}

/// Builds a complete prediction from a white-relative score.
pub fn prediction_from_score(score_cp: i32, draw_window_cp: i32) -> Prediction {
    Prediction::new(
        label_from_score(score_cp, draw_window_cp),
        confidence_from_score(score_cp, draw_window_cp),
    )
}

/// Score-threshold predictor with a wider draw window than the oracle
/// mapping, so the two predictions can legitimately disagree on balanced
/// positions.
#[derive(Debug, Clone)]
pub struct ScoreThresholdPredictor {
    draw_window_cp: i32,
}

impl ScoreThresholdPredictor {
    /// Creates a predictor with the given draw window in centipawns.
    pub fn new(draw_window_cp: i32) -> Self {
        Self { draw_window_cp }
    }
}

impl Default for ScoreThresholdPredictor {
    fn default() -> Self {
        Self::new(250)
    }
}

impl LocalPredictor for ScoreThresholdPredictor {
    fn predict(&self, _snapshot: &GameSnapshot, eval: &Evaluation) -> Prediction {
        prediction_from_score(eval.score_cp, self.draw_window_cp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(score_cp: i32) -> Evaluation {
        Evaluation {
            score_cp,
            depth_reached: 10,
            nodes_used: 10_000,
        }
    }

    #[test]
    fn test_label_from_score() {
        assert_eq!(label_from_score(300, 150), OutcomeLabel::WhiteWin);
        assert_eq!(label_from_score(150, 150), OutcomeLabel::WhiteWin);
        assert_eq!(label_from_score(-300, 150), OutcomeLabel::BlackWin);
        assert_eq!(label_from_score(0, 150), OutcomeLabel::Draw);
        assert_eq!(label_from_score(149, 150), OutcomeLabel::Draw);
        assert_eq!(label_from_score(-149, 150), OutcomeLabel::Draw);
    }

    #[test]
    fn test_threshold_predictor() {
        let predictor = ScoreThresholdPredictor::new(250);
        let snapshot = GameSnapshot::from_moves(vec![]);

        let white = predictor.predict(&snapshot, &eval(400));
        assert_eq!(white.label, OutcomeLabel::WhiteWin);
        assert!(white.is_complete());

        let draw = predictor.predict(&snapshot, &eval(100));
        assert_eq!(draw.label, OutcomeLabel::Draw);

        let black = predictor.predict(&snapshot, &eval(-600));
        assert_eq!(black.label, OutcomeLabel::BlackWin);
    }

    #[test]
    fn test_confidence_grows_with_magnitude() {
        let predictor = ScoreThresholdPredictor::default();
        let snapshot = GameSnapshot::from_moves(vec![]);

        let mild = predictor.predict(&snapshot, &eval(300)).confidence;
        let crushing = predictor.predict(&snapshot, &eval(2_000)).confidence;

        assert!(mild < crushing);
        assert!((0.0..=1.0).contains(&mild));
        assert!((0.0..=1.0).contains(&crushing));
    }

    #[test]
    fn test_predictions_always_complete() {
        let predictor = ScoreThresholdPredictor::default();
        let snapshot = GameSnapshot::from_moves(vec![]);
        for score in [-30_000, -1, 0, 1, 30_000] {
            assert!(predictor.predict(&snapshot, &eval(score)).is_complete());
        }
    }
}
