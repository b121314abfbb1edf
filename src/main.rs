//! Main entry point for the shadowgate rollout demo
//!
//! This runs one offline shadow test (champion vs challenger over seeded
//! synthetic data) and a short live-routing session with a manual
//! promote/rollback round trip.

use anyhow::Result;
use async_trait::async_trait;
use shadowgate::rollout::{
    DecisionRouter, InferenceEngine, InferenceModel, MemoryModelRegistry, ModelRegistry,
    ShadowTestConfig, ShadowTestRegistry, SqliteRolloutLedger, SyntheticDataSource,
    HistoricalDataSource, RolloutLedger,
};
use shadowgate::types::{ModelVersion, TradingContext};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber;

/// Demo engine: follows the bar-direction feature.
struct MomentumEngine;

#[async_trait]
impl InferenceEngine for MomentumEngine {
    async fn infer(&self, _artifact: &str, features: &[f64]) -> Result<Vec<f64>> {
        let direction = features.get(6).copied().unwrap_or(0.0);
        if direction > 0.0 {
            Ok(vec![0.8, 0.1, 0.1, 1.0, 0.8])
        } else if direction < 0.0 {
            Ok(vec![0.1, 0.8, 0.1, 1.0, 0.8])
        } else {
            Ok(vec![0.1, 0.1, 0.8, 1.0, 0.6])
        }
    }
}

/// Demo engine: same signal with a slightly stronger conviction scaling.
struct TunedMomentumEngine;

#[async_trait]
impl InferenceEngine for TunedMomentumEngine {
    async fn infer(&self, _artifact: &str, features: &[f64]) -> Result<Vec<f64>> {
        let direction = features.get(6).copied().unwrap_or(0.0);
        let conviction = (direction.abs() * 400.0).clamp(0.5, 0.95);
        if direction > 0.0 {
            Ok(vec![0.9, 0.05, 0.05, 1.0, conviction])
        } else if direction < 0.0 {
            Ok(vec![0.05, 0.9, 0.05, 1.0, conviction])
        } else {
            Ok(vec![0.05, 0.05, 0.9, 1.0, 0.5])
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting shadowgate rollout demo");

    // Register a champion and a challenger for the momentum algorithm
    let models = Arc::new(MemoryModelRegistry::new());
    models
        .register(
            ModelVersion {
                version_id: "momentum-v1".to_string(),
                algorithm: "momentum".to_string(),
                artifact: "models/momentum-v1.onnx".to_string(),
            },
            true,
        )
        .await;
    models
        .register(
            ModelVersion {
                version_id: "momentum-v2".to_string(),
                algorithm: "momentum".to_string(),
                artifact: "models/momentum-v2.onnx".to_string(),
            },
            false,
        )
        .await;

    let ledger: Arc<dyn RolloutLedger> = Arc::new(SqliteRolloutLedger::new_in_memory().await?);

    // Offline shadow test over seeded synthetic data
    let registry = ShadowTestRegistry::new(models.clone(), Arc::new(MomentumEngine))
        .with_ledger(ledger.clone())
        .with_synthetic_seed(7);

    let report = registry
        .run_shadow_test(
            "momentum",
            "momentum-v2",
            ShadowTestConfig {
                min_trades: 50,
                min_sessions: 2,
                ..Default::default()
            },
        )
        .await?;

    info!(
        "Shadow test {}: passed_all_gates={} action={}",
        report.test_id, report.passed_all_gates, report.recommended_action
    );
    for reason in &report.failure_reasons {
        info!("  gate failure: {}", reason);
    }
    info!(
        "Audit ledger now holds {} promotion report(s)",
        ledger.report_count().await?
    );

    // Live routing session with both models shadowed on every tick
    let champion_version = models
        .get_champion("momentum")
        .await?
        .ok_or_else(|| anyhow::anyhow!("champion disappeared from the registry"))?;
    let challenger_version = models
        .get_model("momentum-v2")
        .await?
        .ok_or_else(|| anyhow::anyhow!("challenger disappeared from the registry"))?;

    let router = Arc::new(
        DecisionRouter::new(
            "momentum".to_string(),
            Arc::new(InferenceModel::new(champion_version, Arc::new(MomentumEngine))),
            Arc::new(InferenceModel::new(
                challenger_version,
                Arc::new(TunedMomentumEngine),
            )),
        )
        .with_ledger(ledger.clone()),
    );

    let ticks = SyntheticDataSource::new(11);
    for bar in ticks.fetch("ES", 0, 20).await? {
        let context = TradingContext {
            symbol: bar.symbol.clone(),
            timestamp: bar.timestamp,
            price: bar.close,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            volatility: (bar.high - bar.low) / bar.open,
            position: 0.0,
            account_balance: 100_000.0,
            daily_pnl: 0.0,
            metadata: HashMap::new(),
        };
        let decision = router.decide(&context).await;
        info!(
            "Tick {} -> {} (size {:.1}, confidence {:.2}, via {})",
            bar.timestamp,
            decision.action,
            decision.size,
            decision.confidence,
            decision
                .reasoning
                .get("routed_model")
                .map(String::as_str)
                .unwrap_or("unknown")
        );
    }

    let stats = router.statistics();
    info!(
        "Routing stats: {} ticks, agreement rate {:.1}%, primary {}",
        stats.total_decisions,
        stats.agreement_rate * 100.0,
        stats.current_primary
    );

    // Manual promote/rollback round trip
    router.promote_to_primary().await;
    info!("Primary after promotion: {}", router.statistics().current_primary);
    router.rollback_to_champion().await;
    info!("Primary after rollback: {}", router.statistics().current_primary);

    info!("Demo completed.");
    Ok(())
}
