//! Paired-difference significance testing for challenger vs champion returns.
//!
//! Exact distribution precision is not required here: large samples use a
//! normal approximation, small samples use a conservative band table. Both
//! are monotonic in |t|, which is all the promotion gate relies on.

use crate::rollout::metrics::std_dev;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Sample size at which the normal approximation takes over from the band table.
const NORMAL_APPROX_MIN_SAMPLES: usize = 30;

/// Conservative two-sided p-value bands for small samples, keyed by |t|.
const SMALL_SAMPLE_BANDS: &[(f64, f64)] = &[
    (6.0, 0.002),
    (4.0, 0.01),
    (3.0, 0.02),
    (2.5, 0.04),
    (2.0, 0.08),
    (1.5, 0.15),
    (1.0, 0.35),
];

/// Outcome of the paired test over per-step return differences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignificanceResult {
    /// Mean of (challenger - champion) per-step differences
    pub mean_difference: f64,
    pub std_error: f64,
    pub t_statistic: f64,
    /// Approximate two-sided p-value
    pub p_value: f64,
    pub sample_size: usize,
    pub significant: bool,
}

impl SignificanceResult {
    /// Neutral result used when there are too few paired samples.
    fn insufficient(sample_size: usize) -> Self {
        Self {
            p_value: 1.0,
            sample_size,
            ..Default::default()
        }
    }
}

/// Paired t-test over aligned return series. Pairs beyond the shorter
/// series are dropped (replay drives both models in near-lockstep, so the
/// mismatch is at most one in-flight batch).
pub fn paired_t_test(
    champion_returns: &[f64],
    challenger_returns: &[f64],
    significance_level: f64,
) -> SignificanceResult {
    let n = champion_returns.len().min(challenger_returns.len());
    if n < 2 {
        return SignificanceResult::insufficient(n);
    }

    let diffs: Vec<f64> = challenger_returns
        .iter()
        .zip(champion_returns.iter())
        .take(n)
        .map(|(b, a)| b - a)
        .collect();

    let mean_difference = diffs.iter().sum::<f64>() / n as f64;
    let std_error = std_dev(&diffs) / (n as f64).sqrt();

    if std_error <= f64::EPSILON {
        // Zero variance in the differences (e.g. a constant shift) makes
        // the t-statistic undefined. Fail closed: report p = 1.0 / not
        // significant rather than treating the degenerate case as
        // infinitely significant, so it can never open the promotion gate.
        return SignificanceResult {
            mean_difference,
            sample_size: n,
            p_value: 1.0,
            ..Default::default()
        };
    }

    let t_statistic = mean_difference / std_error;
    let p_value = two_sided_p_value(t_statistic, n);
    let significant = p_value < significance_level;

    debug!(
        "Paired test over {} samples: t = {:.3}, p = {:.4}",
        n, t_statistic, p_value
    );

    SignificanceResult {
        mean_difference,
        std_error,
        t_statistic,
        p_value,
        sample_size: n,
        significant,
    }
}

/// Approximate two-sided p-value for a t-statistic.
pub fn two_sided_p_value(t: f64, sample_size: usize) -> f64 {
    let abs_t = t.abs();
    if sample_size >= NORMAL_APPROX_MIN_SAMPLES {
        (2.0 * (1.0 - normal_cdf(abs_t))).clamp(0.0, 1.0)
    } else {
        small_sample_p_value(abs_t)
    }
}

fn small_sample_p_value(abs_t: f64) -> f64 {
    for (threshold, p) in SMALL_SAMPLE_BANDS {
        if abs_t >= *threshold {
            return *p;
        }
    }
    1.0
}

/// Standard normal CDF via the Abramowitz-Stegun erf approximation.
fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    // Abramowitz & Stegun 7.1.26, max absolute error 1.5e-7
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_samples_are_not_significant() {
        let result = paired_t_test(&[], &[], 0.05);
        assert_eq!(result.p_value, 1.0);
        assert!(!result.significant);

        let result = paired_t_test(&[0.1], &[0.2], 0.05);
        assert_eq!(result.p_value, 1.0);
        assert!(!result.significant);
    }

    #[test]
    fn test_identical_series_not_significant() {
        let returns = vec![0.01, -0.02, 0.03, 0.0, 0.01];
        let result = paired_t_test(&returns, &returns, 0.05);
        assert_eq!(result.mean_difference, 0.0);
        assert_eq!(result.p_value, 1.0);
        assert!(!result.significant);
    }

    #[test]
    fn test_consistent_large_sample_difference_is_significant() {
        let champion: Vec<f64> = (0..100).map(|i| 0.001 * (i % 7) as f64).collect();
        let challenger: Vec<f64> = champion
            .iter()
            .enumerate()
            .map(|(i, r)| r + 0.01 + 0.0001 * (i % 3) as f64)
            .collect();
        let result = paired_t_test(&champion, &challenger, 0.05);
        assert!(result.t_statistic > 2.0);
        assert!(result.significant);
        assert!(result.mean_difference > 0.0);
    }

    #[test]
    fn test_p_value_monotonic_in_t() {
        for n in [10, 50] {
            let mut prev = 1.0;
            for t in [0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 4.0, 6.0] {
                let p = two_sided_p_value(t, n);
                assert!(p <= prev, "p must not increase with |t| (n = {})", n);
                prev = p;
            }
        }
    }

    #[test]
    fn test_normal_cdf_reference_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-6);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-3);
    }

    #[test]
    fn test_zero_variance_differences_are_neutral() {
        let champion = vec![0.01, 0.02, 0.03];
        let challenger: Vec<f64> = champion.iter().map(|r| r + 0.05).collect();
        let result = paired_t_test(&champion, &challenger, 0.05);
        // Constant shift has zero diff variance; fail closed so the
        // degenerate case cannot pass the significance gate.
        assert_eq!(result.p_value, 1.0);
        assert!(!result.significant);
        assert!(result.mean_difference > 0.0);
    }
}
