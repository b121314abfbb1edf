//! Behavioral alignment scoring between champion and challenger decisions.

use crate::rollout::types::ShadowDecision;
use serde::{Deserialize, Serialize};

/// Default timestamp tolerance for the timing ratio, in milliseconds.
pub const DEFAULT_TIMING_TOLERANCE_MS: u64 = 1_000;

/// Default size tolerance for the size ratio, in units.
pub const DEFAULT_SIZE_TOLERANCE: f64 = 0.5;

/// Three independent alignment ratios, each in [0, 1]. A ratio whose
/// denominator set is empty defaults to 1.0 (no evidence of misalignment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentScores {
    /// Fraction of paired steps whose actions match exactly
    pub decision_alignment: f64,
    /// Among matching steps, fraction whose timestamps are within tolerance
    pub timing_alignment: f64,
    /// Among matching steps, fraction whose sizes are within tolerance
    pub size_alignment: f64,
}

impl Default for AlignmentScores {
    fn default() -> Self {
        Self {
            decision_alignment: 1.0,
            timing_alignment: 1.0,
            size_alignment: 1.0,
        }
    }
}

/// Behavioral alignment checker with configurable tolerances.
#[derive(Debug, Clone)]
pub struct AlignmentChecker {
    timing_tolerance_ms: u64,
    size_tolerance: f64,
}

impl Default for AlignmentChecker {
    fn default() -> Self {
        Self {
            timing_tolerance_ms: DEFAULT_TIMING_TOLERANCE_MS,
            size_tolerance: DEFAULT_SIZE_TOLERANCE,
        }
    }
}

impl AlignmentChecker {
    pub fn new(timing_tolerance_ms: u64, size_tolerance: f64) -> Self {
        Self {
            timing_tolerance_ms,
            size_tolerance,
        }
    }

    /// Score the paired decision sequence. Pairs beyond the shorter series
    /// are ignored.
    pub fn compare(
        &self,
        champion: &[ShadowDecision],
        challenger: &[ShadowDecision],
    ) -> AlignmentScores {
        let pairs: Vec<(&ShadowDecision, &ShadowDecision)> =
            champion.iter().zip(challenger.iter()).collect();

        if pairs.is_empty() {
            return AlignmentScores::default();
        }

        let matching: Vec<&(&ShadowDecision, &ShadowDecision)> =
            pairs.iter().filter(|(a, b)| a.action == b.action).collect();

        let decision_alignment = matching.len() as f64 / pairs.len() as f64;

        let (timing_alignment, size_alignment) = if matching.is_empty() {
            (1.0, 1.0)
        } else {
            let timing_hits = matching
                .iter()
                .filter(|(a, b)| a.timestamp.abs_diff(b.timestamp) <= self.timing_tolerance_ms)
                .count();
            let size_hits = matching
                .iter()
                .filter(|(a, b)| (a.size - b.size).abs() <= self.size_tolerance)
                .count();
            (
                timing_hits as f64 / matching.len() as f64,
                size_hits as f64 / matching.len() as f64,
            )
        };

        AlignmentScores {
            decision_alignment,
            timing_alignment,
            size_alignment,
        }
    }
}
