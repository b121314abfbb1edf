//! Core types and data structures for the shadowgate rollout system.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Trading action produced by a decision model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "BUY"),
            TradeAction::Sell => write!(f, "SELL"),
            TradeAction::Hold => write!(f, "HOLD"),
        }
    }
}

/// Immutable market snapshot handed to the router once per decision tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingContext {
    /// Instrument symbol (e.g. "ES")
    pub symbol: String,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    /// Current price
    pub price: f64,
    /// Open of the latest bar
    pub open: f64,
    /// High of the latest bar
    pub high: f64,
    /// Low of the latest bar
    pub low: f64,
    /// Close of the latest bar
    pub close: f64,
    /// Bar volume
    pub volume: f64,
    /// Current volatility estimate
    pub volatility: f64,
    /// Current signed position (positive = long)
    pub position: f64,
    /// Account balance
    pub account_balance: f64,
    /// Daily profit and loss
    pub daily_pnl: f64,
    /// Free-form metadata (e.g. carried historical bars)
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Output of a decision model for one context. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: TradeAction,
    /// Order size in units
    pub size: f64,
    /// Model confidence in [0, 1]
    pub confidence: f64,
    /// Strategy or algorithm label that produced this decision
    pub strategy: String,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    /// Audit-trail map of string keys to values
    pub reasoning: HashMap<String, String>,
}

/// Pairs a champion and challenger decision made for the same context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionComparison {
    pub champion: Decision,
    pub challenger: Decision,
    /// True when both models chose the same action
    pub agreement: bool,
    /// challenger.confidence - champion.confidence
    pub confidence_delta: f64,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

impl DecisionComparison {
    pub fn new(champion: Decision, challenger: Decision) -> Self {
        let agreement = champion.action == challenger.action;
        let confidence_delta = challenger.confidence - champion.confidence;
        let timestamp = champion.timestamp.max(challenger.timestamp);
        Self {
            champion,
            challenger,
            agreement,
            confidence_delta,
            timestamp,
        }
    }
}

/// One historical quote bar from a data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub symbol: String,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A registered model version: identifier plus artifact location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    /// Unique version identifier
    pub version_id: String,
    /// Algorithm this version belongs to
    pub algorithm: String,
    /// Location of the model artifact (path or URI)
    pub artifact: String,
}
