//! Model boundary: registry and inference contracts, feature extraction,
//! output parsing, and the conservative rule-based fallback decision.
//!
//! The inference output schema is fixed and versioned: argmax over the
//! first three outputs selects BUY/SELL/HOLD; an optional 4th output is
//! the order size and an optional 5th is the confidence.

use crate::types::{Decision, ModelVersion, TradeAction, TradingContext};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Length of the normalized feature vector handed to the inference engine.
pub const FEATURE_VECTOR_LEN: usize = 8;

/// Order size used when a model emits no explicit size output.
pub const DEFAULT_ORDER_SIZE: f64 = 1.0;

/// Confidence marker carried by rule-based fallback decisions.
pub const FALLBACK_CONFIDENCE: f64 = 0.2;

/// A model that can produce a trading decision for a context.
#[async_trait]
pub trait DecisionModel: Send + Sync {
    fn version_id(&self) -> &str;
    async fn decide(&self, context: &TradingContext) -> Result<Decision>;
}

/// External model catalog; real implementations live outside this crate.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn get_champion(&self, algorithm: &str) -> Result<Option<ModelVersion>>;
    async fn get_model(&self, version_id: &str) -> Result<Option<ModelVersion>>;
}

/// External inference runtime: loaded artifact + feature vector -> outputs.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn infer(&self, artifact: &str, features: &[f64]) -> Result<Vec<f64>>;
}

/// Extract the fixed 8-element normalized feature vector from a context.
///
/// Layout: price, volume, volatility, position, P&L, bar range, bar
/// direction, account balance.
pub fn extract_features(context: &TradingContext) -> [f64; FEATURE_VECTOR_LEN] {
    let safe_open = if context.open.abs() > f64::EPSILON {
        context.open
    } else {
        1.0
    };
    let safe_balance = if context.account_balance.abs() > f64::EPSILON {
        context.account_balance
    } else {
        1.0
    };
    [
        context.price / 10_000.0,
        context.volume / 1_000_000.0,
        context.volatility,
        context.position / 10.0,
        context.daily_pnl / safe_balance,
        (context.high - context.low) / safe_open,
        (context.close - context.open) / safe_open,
        context.account_balance / 1_000_000.0,
    ]
}

/// Parse a model output vector into a decision.
pub fn parse_model_output(
    outputs: &[f64],
    context: &TradingContext,
    strategy: &str,
) -> Result<Decision> {
    if outputs.len() < 3 {
        bail!(
            "model output has {} values, expected at least 3",
            outputs.len()
        );
    }

    let (argmax, argmax_value) = outputs[..3]
        .iter()
        .enumerate()
        .fold((0usize, f64::NEG_INFINITY), |acc, (i, v)| {
            if *v > acc.1 {
                (i, *v)
            } else {
                acc
            }
        });

    let action = match argmax {
        0 => TradeAction::Buy,
        1 => TradeAction::Sell,
        _ => TradeAction::Hold,
    };

    let size = outputs
        .get(3)
        .copied()
        .filter(|s| *s > 0.0)
        .unwrap_or(DEFAULT_ORDER_SIZE);
    let confidence = outputs
        .get(4)
        .copied()
        .unwrap_or(argmax_value)
        .clamp(0.0, 1.0);

    let mut reasoning = HashMap::new();
    reasoning.insert("source".to_string(), "inference".to_string());
    reasoning.insert("argmax_index".to_string(), argmax.to_string());

    Ok(Decision {
        action,
        size,
        confidence,
        strategy: strategy.to_string(),
        timestamp: context.timestamp,
        reasoning,
    })
}

/// Conservative rule-based fallback: momentum sign of the latest bar with a
/// low confidence marker. Used whenever a model call fails so that live
/// routing and replay both continue uninterrupted.
pub fn fallback_decision(context: &TradingContext, strategy: &str) -> Decision {
    let action = if context.close > context.open {
        TradeAction::Buy
    } else if context.close < context.open {
        TradeAction::Sell
    } else {
        TradeAction::Hold
    };

    let mut reasoning = HashMap::new();
    reasoning.insert("fallback".to_string(), "rule_momentum".to_string());

    Decision {
        action,
        size: DEFAULT_ORDER_SIZE,
        confidence: FALLBACK_CONFIDENCE,
        strategy: strategy.to_string(),
        timestamp: context.timestamp,
        reasoning,
    }
}

/// A registered model version bound to an inference engine.
pub struct InferenceModel {
    version: ModelVersion,
    engine: Arc<dyn InferenceEngine>,
}

impl InferenceModel {
    pub fn new(version: ModelVersion, engine: Arc<dyn InferenceEngine>) -> Self {
        Self { version, engine }
    }

    pub fn version(&self) -> &ModelVersion {
        &self.version
    }
}

#[async_trait]
impl DecisionModel for InferenceModel {
    fn version_id(&self) -> &str {
        &self.version.version_id
    }

    async fn decide(&self, context: &TradingContext) -> Result<Decision> {
        let features = extract_features(context);
        let outputs = self
            .engine
            .infer(&self.version.artifact, &features)
            .await
            .with_context(|| format!("inference failed for model {}", self.version.version_id))?;
        debug!(
            "Model {} produced {} outputs for {}",
            self.version.version_id,
            outputs.len(),
            context.symbol
        );
        parse_model_output(&outputs, context, &self.version.version_id)
    }
}

/// In-memory model registry for embedded deployments and tests.
#[derive(Default)]
pub struct MemoryModelRegistry {
    champions: RwLock<HashMap<String, ModelVersion>>,
    models: RwLock<HashMap<String, ModelVersion>>,
}

impl MemoryModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model version; optionally install it as its algorithm's champion.
    pub async fn register(&self, version: ModelVersion, champion: bool) {
        if champion {
            self.champions
                .write()
                .await
                .insert(version.algorithm.clone(), version.clone());
        }
        self.models
            .write()
            .await
            .insert(version.version_id.clone(), version);
    }
}

#[async_trait]
impl ModelRegistry for MemoryModelRegistry {
    async fn get_champion(&self, algorithm: &str) -> Result<Option<ModelVersion>> {
        Ok(self.champions.read().await.get(algorithm).cloned())
    }

    async fn get_model(&self, version_id: &str) -> Result<Option<ModelVersion>> {
        Ok(self.models.read().await.get(version_id).cloned())
    }
}
