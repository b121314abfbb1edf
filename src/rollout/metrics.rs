//! Risk-adjusted return metrics computed from shadow decision sequences.
//!
//! All functions here are pure and degrade gracefully: with fewer than two
//! returns every metric reports 0 instead of failing, so a short or empty
//! replay never aborts the analysis pipeline.

use crate::rollout::types::ShadowDecision;
use crate::types::TradeAction;
use serde::{Deserialize, Serialize};

/// Trading-day annualization factor for Sharpe/Sortino.
const ANNUALIZATION: f64 = 252.0;

/// Sortino value reported when there is no downside volatility but the mean
/// return is positive. Kept finite so champion/challenger comparisons stay
/// well ordered.
const SORTINO_CAP: f64 = 1_000.0;

/// Default tail fraction for Conditional Value at Risk.
pub const DEFAULT_CVAR_LEVEL: f64 = 0.05;

/// Risk-adjusted performance summary for one model over one replay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRiskMetrics {
    pub sharpe: f64,
    pub sortino: f64,
    /// Mean of the worst-tail returns; more negative is worse
    pub cvar: f64,
    /// Largest peak-to-trough decline of the cumulative curve, <= 0
    pub max_drawdown: f64,
    pub total_return: f64,
    pub decision_count: usize,
}

/// Derive a per-step return series from a shadow decision sequence.
///
/// A BUY opens a long (or closes a short); a SELL closes a long (or opens a
/// short). Positioned steps contribute `sign(position) * pct price move *
/// confidence`; flat steps contribute zero.
pub fn derive_returns(decisions: &[ShadowDecision]) -> Vec<f64> {
    let mut returns = Vec::with_capacity(decisions.len());
    let mut position: i8 = 0;
    let mut prev_price: Option<f64> = None;

    for decision in decisions {
        let step_return = match prev_price {
            Some(prev) if position != 0 && prev > 0.0 => {
                position as f64 * ((decision.price - prev) / prev) * decision.confidence
            }
            _ => 0.0,
        };
        returns.push(step_return);

        match decision.action {
            TradeAction::Buy => {
                position = if position < 0 { 0 } else { 1 };
            }
            TradeAction::Sell => {
                position = if position > 0 { 0 } else { -1 };
            }
            TradeAction::Hold => {}
        }
        prev_price = Some(decision.price);
    }

    returns
}

/// Compute the full risk summary for one model's replay output.
pub fn compute_model_metrics(decisions: &[ShadowDecision], cvar_level: f64) -> ModelRiskMetrics {
    let returns = derive_returns(decisions);
    ModelRiskMetrics {
        sharpe: sharpe_ratio(&returns),
        sortino: sortino_ratio(&returns),
        cvar: conditional_value_at_risk(&returns, cvar_level),
        max_drawdown: max_drawdown(&returns),
        total_return: returns.iter().sum(),
        decision_count: decisions.len(),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation. Returns 0 for fewer than two values.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Annualized Sharpe ratio: mean / stdev * sqrt(252).
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let sd = std_dev(returns);
    if sd <= f64::EPSILON {
        return 0.0;
    }
    mean(returns) / sd * ANNUALIZATION.sqrt()
}

/// Sortino ratio: like Sharpe but the denominator only sees negative returns.
pub fn sortino_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let m = mean(returns);
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let downside_dev = if downside.is_empty() {
        0.0
    } else {
        (downside.iter().map(|r| r.powi(2)).sum::<f64>() / downside.len() as f64).sqrt()
    };

    if downside_dev <= f64::EPSILON {
        return if m > 0.0 { SORTINO_CAP } else { 0.0 };
    }
    m / downside_dev * ANNUALIZATION.sqrt()
}

/// Conditional Value at Risk: mean of the worst `level`-fraction of returns.
pub fn conditional_value_at_risk(returns: &[f64], level: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let tail_len = ((sorted.len() as f64 * level).ceil() as usize).max(1);
    mean(&sorted[..tail_len])
}

/// Maximum drawdown of the cumulative return curve, returned as a value <= 0.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mut cumulative = 0.0;
    let mut peak = 0.0f64;
    let mut worst = 0.0f64;
    for r in returns {
        cumulative += r;
        peak = peak.max(cumulative);
        worst = worst.min(cumulative - peak);
    }
    worst
}

/// Nearest-rank percentile over an unsorted sample set.
pub fn percentile(samples: &[f64], pct: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.clamp(1, sorted.len()) - 1;
    sorted[idx]
}

/// p95/p99 over the concatenated champion+challenger inference latencies.
pub fn latency_percentiles(
    champion: &[ShadowDecision],
    challenger: &[ShadowDecision],
) -> (f64, f64) {
    let samples: Vec<f64> = champion
        .iter()
        .chain(challenger.iter())
        .map(|d| d.inference_latency_ms)
        .collect();
    (percentile(&samples, 95.0), percentile(&samples, 99.0))
}
