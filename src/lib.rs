//! shadowgate - champion/challenger model rollout control plane
//!
//! This crate provides safe model rollout for an automated trading
//! platform: live dual-model routing with atomic promote/rollback, and
//! offline shadow tests that replay historical data through both models
//! and gate promotion on risk, significance, alignment, and constraints.

pub mod types;
pub mod rollout;

// Re-export main types for convenience
pub use types::{Decision, DecisionComparison, ModelVersion, QuoteSnapshot, TradeAction, TradingContext};
