//! Promotion gate: folds the four analysis results into a single
//! promote/reject verdict with a reason for every failing gate.

use crate::rollout::alignment::AlignmentScores;
use crate::rollout::constraints::ConstraintReport;
use crate::rollout::metrics::ModelRiskMetrics;
use crate::rollout::significance::SignificanceResult;
use crate::rollout::types::RecommendedAction;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Minimum alignment ratios a challenger must hold against the champion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateThresholds {
    pub min_decision_alignment: f64,
    pub min_timing_alignment: f64,
    pub min_size_alignment: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            min_decision_alignment: 0.8,
            min_timing_alignment: 0.8,
            min_size_alignment: 0.7,
        }
    }
}

/// The five independent gate outcomes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GateChecks {
    pub performance: bool,
    pub risk: bool,
    pub significance: bool,
    pub alignment: bool,
    pub constraints: bool,
}

impl GateChecks {
    /// All five gates must hold for a promotion recommendation.
    pub fn all_passed(&self) -> bool {
        self.performance && self.risk && self.significance && self.alignment && self.constraints
    }
}

/// Verdict produced by the gate: the per-gate outcomes, the combined flag,
/// the recommended action, and one reason per failing gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    pub checks: GateChecks,
    pub passed_all_gates: bool,
    pub recommended_action: RecommendedAction,
    pub failure_reasons: Vec<String>,
}

/// Evaluates the five promotion gates over a completed shadow test.
#[derive(Debug, Clone, Default)]
pub struct PromotionGate {
    thresholds: GateThresholds,
}

impl PromotionGate {
    pub fn new(thresholds: GateThresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(
        &self,
        champion: &ModelRiskMetrics,
        challenger: &ModelRiskMetrics,
        significance: &SignificanceResult,
        alignment: &AlignmentScores,
        constraints: &ConstraintReport,
    ) -> GateVerdict {
        let checks = GateChecks {
            performance: challenger.sharpe > champion.sharpe
                && challenger.sortino > champion.sortino,
            // Both are negative-or-zero quantities; "better" means less negative.
            risk: challenger.cvar > champion.cvar
                && challenger.max_drawdown > champion.max_drawdown,
            significance: significance.significant,
            alignment: alignment.decision_alignment >= self.thresholds.min_decision_alignment
                && alignment.timing_alignment >= self.thresholds.min_timing_alignment
                && alignment.size_alignment >= self.thresholds.min_size_alignment,
            constraints: constraints.passed(),
        };

        let mut failure_reasons = Vec::new();
        if !checks.performance {
            failure_reasons.push(format!(
                "performance gate failed: challenger Sharpe {:.3} / Sortino {:.3} vs champion {:.3} / {:.3}",
                challenger.sharpe, challenger.sortino, champion.sharpe, champion.sortino
            ));
        }
        if !checks.risk {
            failure_reasons.push(format!(
                "risk gate failed: challenger CVaR {:.4} / max drawdown {:.4} vs champion {:.4} / {:.4}",
                challenger.cvar, challenger.max_drawdown, champion.cvar, champion.max_drawdown
            ));
        }
        if !checks.significance {
            failure_reasons.push(format!(
                "significance gate failed: p={:.4} over {} paired samples",
                significance.p_value, significance.sample_size
            ));
        }
        if !checks.alignment {
            failure_reasons.push(format!(
                "alignment gate failed: decision {:.2} / timing {:.2} / size {:.2} (minimums {:.2}/{:.2}/{:.2})",
                alignment.decision_alignment,
                alignment.timing_alignment,
                alignment.size_alignment,
                self.thresholds.min_decision_alignment,
                self.thresholds.min_timing_alignment,
                self.thresholds.min_size_alignment
            ));
        }
        if !checks.constraints {
            for failure in &constraints.failures {
                failure_reasons.push(format!("constraint gate failed: {}", failure));
            }
            if constraints.failures.is_empty() {
                failure_reasons.push("constraint gate failed".to_string());
            }
        }

        let passed_all_gates = checks.all_passed();
        let recommended_action = if passed_all_gates {
            RecommendedAction::Promote
        } else {
            RecommendedAction::Reject
        };

        info!(
            "Promotion gates: performance={} risk={} significance={} alignment={} constraints={} -> {}",
            checks.performance,
            checks.risk,
            checks.significance,
            checks.alignment,
            checks.constraints,
            recommended_action
        );

        GateVerdict {
            checks,
            passed_all_gates,
            recommended_action,
            failure_reasons,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(sharpe: f64, sortino: f64, cvar: f64, max_dd: f64) -> ModelRiskMetrics {
        ModelRiskMetrics {
            sharpe,
            sortino,
            cvar,
            max_drawdown: max_dd,
            total_return: 0.0,
            decision_count: 100,
        }
    }

    fn passing_inputs() -> (
        ModelRiskMetrics,
        ModelRiskMetrics,
        SignificanceResult,
        AlignmentScores,
        ConstraintReport,
    ) {
        let champion = metrics(1.0, 1.2, -0.05, -0.10);
        let challenger = metrics(1.5, 1.8, -0.03, -0.06);
        let significance = SignificanceResult {
            mean_difference: 0.001,
            std_error: 0.0002,
            t_statistic: 5.0,
            p_value: 0.001,
            sample_size: 200,
            significant: true,
        };
        let alignment = AlignmentScores {
            decision_alignment: 0.9,
            timing_alignment: 0.95,
            size_alignment: 0.85,
        };
        let constraints = ConstraintReport {
            latency_ok: true,
            memory_ok: true,
            anomaly_ok: true,
            ..Default::default()
        };
        (champion, challenger, significance, alignment, constraints)
    }

    #[test]
    fn test_all_gates_pass_recommends_promote() {
        let (champ, chall, sig, align, cons) = passing_inputs();
        let verdict = PromotionGate::default().evaluate(&champ, &chall, &sig, &align, &cons);
        assert!(verdict.passed_all_gates);
        assert_eq!(verdict.recommended_action, RecommendedAction::Promote);
        assert!(verdict.failure_reasons.is_empty());
    }

    #[test]
    fn test_any_failing_gate_rejects_truth_table() {
        // Exhaustive over all 32 combinations of per-gate outcomes.
        for mask in 0u32..32 {
            let checks = GateChecks {
                performance: mask & 1 != 0,
                risk: mask & 2 != 0,
                significance: mask & 4 != 0,
                alignment: mask & 8 != 0,
                constraints: mask & 16 != 0,
            };
            assert_eq!(checks.all_passed(), mask == 31, "mask {:05b}", mask);
        }
    }

    #[test]
    fn test_performance_gate_requires_both_ratios() {
        let (champ, mut chall, sig, align, cons) = passing_inputs();
        chall.sortino = champ.sortino; // Sharpe better, Sortino merely equal
        let verdict = PromotionGate::default().evaluate(&champ, &chall, &sig, &align, &cons);
        assert!(!verdict.passed_all_gates);
        assert!(verdict
            .failure_reasons
            .iter()
            .any(|r| r.contains("performance gate")));
    }

    #[test]
    fn test_risk_gate_compares_less_negative_as_better() {
        let (champ, mut chall, sig, align, cons) = passing_inputs();
        chall.max_drawdown = -0.5; // worse (more negative) than champion's -0.10
        let verdict = PromotionGate::default().evaluate(&champ, &chall, &sig, &align, &cons);
        assert!(!verdict.passed_all_gates);
        assert!(verdict
            .failure_reasons
            .iter()
            .any(|r| r.contains("risk gate")));
    }

    #[test]
    fn test_every_failing_gate_contributes_a_reason() {
        let champion = metrics(2.0, 2.0, -0.01, -0.02);
        let challenger = metrics(0.5, 0.5, -0.20, -0.40);
        let significance = SignificanceResult {
            p_value: 0.9,
            sample_size: 100,
            ..Default::default()
        };
        let alignment = AlignmentScores {
            decision_alignment: 0.2,
            timing_alignment: 0.2,
            size_alignment: 0.2,
        };
        let constraints = ConstraintReport {
            latency_ok: false,
            memory_ok: true,
            anomaly_ok: true,
            failures: vec!["latency budget exceeded".to_string()],
            ..Default::default()
        };

        let verdict = PromotionGate::default().evaluate(
            &champion,
            &challenger,
            &significance,
            &alignment,
            &constraints,
        );
        assert_eq!(verdict.recommended_action, RecommendedAction::Reject);
        assert_eq!(verdict.failure_reasons.len(), 5);
    }
}
