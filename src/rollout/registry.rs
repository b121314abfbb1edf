//! Shadow test registry: concurrency-safe catalog of in-flight and
//! completed tests, and the orchestration of one full test run from
//! model resolution through replay, analysis, and gate evaluation.

use crate::rollout::alignment::AlignmentChecker;
use crate::rollout::constraints::ConstraintValidator;
use crate::rollout::data_sources::HistoricalDataSource;
use crate::rollout::gate::PromotionGate;
use crate::rollout::ledger::RolloutLedger;
use crate::rollout::metrics::{compute_model_metrics, derive_returns, DEFAULT_CVAR_LEVEL};
use crate::rollout::model::{InferenceEngine, InferenceModel, ModelRegistry};
use crate::rollout::replay::{ReplayConfig, ReplayEngine};
use crate::rollout::significance::paired_t_test;
use crate::rollout::types::{
    PromotionTestReport, ShadowTest, ShadowTestConfig, ShadowTestStatus, TestStatusSnapshot,
};
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// Catalog and runner for champion-vs-challenger shadow tests.
///
/// Tests are retained for the process lifetime; callers query them by id.
pub struct ShadowTestRegistry {
    tests: RwLock<HashMap<String, Arc<RwLock<ShadowTest>>>>,
    models: Arc<dyn ModelRegistry>,
    engine: Arc<dyn InferenceEngine>,
    historical_source: Option<Arc<dyn HistoricalDataSource>>,
    ledger: Option<Arc<dyn RolloutLedger>>,
    gate: PromotionGate,
    validator: ConstraintValidator,
    alignment: AlignmentChecker,
    replay_config: ReplayConfig,
    synthetic_seed: u64,
    test_counter: AtomicU64,
}

impl ShadowTestRegistry {
    pub fn new(models: Arc<dyn ModelRegistry>, engine: Arc<dyn InferenceEngine>) -> Self {
        Self {
            tests: RwLock::new(HashMap::new()),
            models,
            engine,
            historical_source: None,
            ledger: None,
            gate: PromotionGate::default(),
            validator: ConstraintValidator::default(),
            alignment: AlignmentChecker::default(),
            replay_config: ReplayConfig::default(),
            synthetic_seed: 42,
            test_counter: AtomicU64::new(0),
        }
    }

    /// Use a real quote archive; the seeded synthetic generator remains the
    /// fallback when the archive fails or holds no data.
    pub fn with_historical_source(mut self, source: Arc<dyn HistoricalDataSource>) -> Self {
        self.historical_source = Some(source);
        self
    }

    /// Persist every completed test's report to the audit ledger.
    pub fn with_ledger(mut self, ledger: Arc<dyn RolloutLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_synthetic_seed(mut self, seed: u64) -> Self {
        self.synthetic_seed = seed;
        self
    }

    fn next_test_id(&self, algorithm: &str, challenger_version: &str) -> String {
        let seq = self.test_counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}-{}-{}", algorithm, challenger_version, now_ms(), seq)
    }

    /// Run a full shadow test and return its report.
    ///
    /// Long-running: replays historical data until the configured trade and
    /// session minimums are met. Fails hard when either model cannot be
    /// resolved; an error during replay marks the test `Failed`; a
    /// cancellation marks it `Cancelled` and surfaces as an error here. The
    /// test stays queryable through `test_status` in all cases.
    #[instrument(skip(self, config), fields(algorithm = %algorithm, challenger = %challenger_version_id))]
    pub async fn run_shadow_test(
        &self,
        algorithm: &str,
        challenger_version_id: &str,
        config: ShadowTestConfig,
    ) -> Result<PromotionTestReport> {
        let champion_version = self
            .models
            .get_champion(algorithm)
            .await
            .with_context(|| format!("champion lookup failed for algorithm {}", algorithm))?
            .ok_or_else(|| anyhow!("no champion registered for algorithm {}", algorithm))?;
        let challenger_version = self
            .models
            .get_model(challenger_version_id)
            .await
            .with_context(|| format!("challenger lookup failed for {}", challenger_version_id))?
            .ok_or_else(|| anyhow!("challenger model {} not found", challenger_version_id))?;

        if challenger_version.algorithm != algorithm {
            bail!(
                "challenger {} belongs to algorithm {}, not {}",
                challenger_version_id,
                challenger_version.algorithm,
                algorithm
            );
        }

        let champion = InferenceModel::new(champion_version.clone(), self.engine.clone());
        let challenger = InferenceModel::new(challenger_version.clone(), self.engine.clone());

        let test_id = self.next_test_id(algorithm, challenger_version_id);
        let test = Arc::new(RwLock::new(ShadowTest::new(
            test_id.clone(),
            algorithm.to_string(),
            champion_version.version_id.clone(),
            challenger_version.version_id.clone(),
            config,
        )));
        self.tests
            .write()
            .await
            .insert(test_id.clone(), test.clone());

        info!(
            "Shadow test {} created: {} (champion) vs {} (challenger)",
            test_id, champion_version.version_id, challenger_version.version_id
        );

        {
            let mut t = test.write().await;
            t.status = ShadowTestStatus::Running;
            t.started_at = Some(now_ms());
        }

        let replay = ReplayEngine::new(
            self.historical_source.clone(),
            self.synthetic_seed,
            self.replay_config.clone(),
        );
        if let Err(e) = replay.replay(&test, &champion, &challenger).await {
            let mut t = test.write().await;
            t.status = ShadowTestStatus::Failed;
            t.ended_at = Some(now_ms());
            error!("Shadow test {} failed during replay: {:#}", test_id, e);
            return Err(e.context(format!("shadow test {} failed", test_id)));
        }

        {
            let t = test.read().await;
            if t.cancel.is_cancelled() {
                drop(t);
                let mut t = test.write().await;
                if !t.status.is_terminal() {
                    t.status = ShadowTestStatus::Cancelled;
                }
                t.ended_at.get_or_insert_with(now_ms);
                bail!("shadow test {} was cancelled", test_id);
            }
        }

        let report = self.analyze(&test).await;

        {
            let mut t = test.write().await;
            // A cancel may have landed while the analysis ran; terminal
            // states are final, so never overwrite one with Completed.
            if t.status.is_terminal() {
                bail!("shadow test {} was cancelled", test_id);
            }
            t.status = ShadowTestStatus::Completed;
            t.ended_at = Some(now_ms());
        }

        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.insert_report(&report).await {
                warn!("Failed to persist report for test {}: {:#}", test_id, e);
            }
        }

        info!(
            "Shadow test {} completed: passed_all_gates={} action={}",
            test_id, report.passed_all_gates, report.recommended_action
        );
        Ok(report)
    }

    /// Run the analysis pipeline over the recorded decision lists.
    async fn analyze(&self, test: &Arc<RwLock<ShadowTest>>) -> PromotionTestReport {
        let t = test.read().await;

        let champion_metrics = compute_model_metrics(&t.champion_decisions, DEFAULT_CVAR_LEVEL);
        let challenger_metrics = compute_model_metrics(&t.challenger_decisions, DEFAULT_CVAR_LEVEL);

        let champion_returns = derive_returns(&t.champion_decisions);
        let challenger_returns = derive_returns(&t.challenger_decisions);
        let significance = paired_t_test(
            &champion_returns,
            &challenger_returns,
            t.config.significance_level,
        );

        let alignment = self
            .alignment
            .compare(&t.champion_decisions, &t.challenger_decisions);
        let constraints = self
            .validator
            .validate(&t.champion_decisions, &t.challenger_decisions);

        let verdict = self.gate.evaluate(
            &champion_metrics,
            &challenger_metrics,
            &significance,
            &alignment,
            &constraints,
        );

        PromotionTestReport {
            test_id: t.id.clone(),
            algorithm: t.algorithm.clone(),
            champion_version: t.champion_version.clone(),
            challenger_version: t.challenger_version.clone(),
            champion_metrics,
            challenger_metrics,
            significance,
            alignment,
            constraints,
            passed_all_gates: verdict.passed_all_gates,
            recommended_action: verdict.recommended_action,
            failure_reasons: verdict.failure_reasons,
            generated_at: now_ms(),
        }
    }

    /// Point-in-time view of a test, including live progress while running.
    pub async fn test_status(&self, test_id: &str) -> Option<TestStatusSnapshot> {
        let tests = self.tests.read().await;
        let test = tests.get(test_id)?.clone();
        drop(tests);

        let t = test.read().await;
        Some(TestStatusSnapshot {
            test_id: t.id.clone(),
            status: t.status,
            progress: t.progress(),
            champion_decisions: t.champion_decisions.len(),
            challenger_decisions: t.challenger_decisions.len(),
            sessions_recorded: t.sessions_recorded,
            intermediate_results: t.intermediate_results.clone(),
        })
    }

    /// Cancel a queued or running test. Returns false for unknown ids and
    /// tests already in a terminal state. The replay loop observes the
    /// signal at its next step boundary.
    pub async fn cancel_test(&self, test_id: &str) -> bool {
        let tests = self.tests.read().await;
        let test = match tests.get(test_id) {
            Some(test) => test.clone(),
            None => return false,
        };
        drop(tests);

        let mut t = test.write().await;
        if t.status.is_terminal() {
            return false;
        }
        t.cancel.cancel();
        t.status = ShadowTestStatus::Cancelled;
        t.ended_at = Some(now_ms());
        info!("Shadow test {} cancelled", test_id);
        true
    }

    /// Ids of all known tests, newest last.
    pub async fn test_ids(&self) -> Vec<String> {
        self.tests.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollout::model::MemoryModelRegistry;
    use crate::types::ModelVersion;
    use async_trait::async_trait;

    /// Engine that always prefers BUY with strong confidence.
    struct BuyEngine;

    #[async_trait]
    impl InferenceEngine for BuyEngine {
        async fn infer(&self, _artifact: &str, _features: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![0.9, 0.05, 0.05, 1.0, 0.9])
        }
    }

    async fn registry_with_models() -> ShadowTestRegistry {
        let models = MemoryModelRegistry::new();
        models
            .register(
                ModelVersion {
                    version_id: "v1".to_string(),
                    algorithm: "momentum".to_string(),
                    artifact: "models/v1.onnx".to_string(),
                },
                true,
            )
            .await;
        models
            .register(
                ModelVersion {
                    version_id: "v2".to_string(),
                    algorithm: "momentum".to_string(),
                    artifact: "models/v2.onnx".to_string(),
                },
                false,
            )
            .await;
        ShadowTestRegistry::new(Arc::new(models), Arc::new(BuyEngine))
    }

    #[tokio::test]
    async fn test_missing_champion_is_a_hard_failure() {
        let registry = registry_with_models().await;
        let result = registry
            .run_shadow_test("unknown_algo", "v2", ShadowTestConfig::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_challenger_is_a_hard_failure() {
        let registry = registry_with_models().await;
        let result = registry
            .run_shadow_test("momentum", "v99", ShadowTestConfig::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_algorithm_mismatch_is_rejected() {
        let models = MemoryModelRegistry::new();
        models
            .register(
                ModelVersion {
                    version_id: "m1".to_string(),
                    algorithm: "momentum".to_string(),
                    artifact: "a".to_string(),
                },
                true,
            )
            .await;
        models
            .register(
                ModelVersion {
                    version_id: "r1".to_string(),
                    algorithm: "reversion".to_string(),
                    artifact: "b".to_string(),
                },
                false,
            )
            .await;
        let registry = ShadowTestRegistry::new(Arc::new(models), Arc::new(BuyEngine));
        let result = registry
            .run_shadow_test("momentum", "r1", ShadowTestConfig::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_completed_test_reaches_min_trades() {
        let registry = registry_with_models().await;
        let config = ShadowTestConfig {
            min_trades: 50,
            min_sessions: 1,
            ..Default::default()
        };
        let report = registry
            .run_shadow_test("momentum", "v2", config)
            .await
            .unwrap();

        assert_eq!(report.algorithm, "momentum");
        assert!(report.champion_metrics.decision_count >= 50);

        let snapshot = registry.test_status(&report.test_id).await.unwrap();
        assert_eq!(snapshot.status, ShadowTestStatus::Completed);
        assert!(snapshot.progress >= 1.0 - 1e-9);
        assert!(snapshot.champion_decisions >= 50);
    }

    #[tokio::test]
    async fn test_identical_models_fail_performance_gate() {
        // Same engine for both models, so the challenger cannot strictly
        // beat the champion on Sharpe.
        let registry = registry_with_models().await;
        let report = registry
            .run_shadow_test(
                "momentum",
                "v2",
                ShadowTestConfig {
                    min_trades: 30,
                    min_sessions: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!report.passed_all_gates);
        assert_eq!(
            report.recommended_action,
            crate::rollout::types::RecommendedAction::Reject
        );
        assert!(!report.failure_reasons.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_test_returns_false() {
        let registry = registry_with_models().await;
        assert!(!registry.cancel_test("nope").await);
    }

    #[tokio::test]
    async fn test_status_for_unknown_test_is_none() {
        let registry = registry_with_models().await;
        assert!(registry.test_status("nope").await.is_none());
    }

    /// Engine slow enough for a cancel to race the end of a run.
    struct SlowBuyEngine;

    #[async_trait]
    impl InferenceEngine for SlowBuyEngine {
        async fn infer(&self, _artifact: &str, _features: &[f64]) -> Result<Vec<f64>> {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            Ok(vec![0.9, 0.05, 0.05, 1.0, 0.9])
        }
    }

    #[tokio::test]
    async fn test_cancel_acknowledgment_matches_final_status() {
        let models = MemoryModelRegistry::new();
        models
            .register(
                ModelVersion {
                    version_id: "v1".to_string(),
                    algorithm: "momentum".to_string(),
                    artifact: "a".to_string(),
                },
                true,
            )
            .await;
        models
            .register(
                ModelVersion {
                    version_id: "v2".to_string(),
                    algorithm: "momentum".to_string(),
                    artifact: "b".to_string(),
                },
                false,
            )
            .await;
        let registry = Arc::new(ShadowTestRegistry::new(
            Arc::new(models),
            Arc::new(SlowBuyEngine),
        ));

        let runner = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .run_shadow_test(
                        "momentum",
                        "v2",
                        ShadowTestConfig {
                            min_trades: 30,
                            min_sessions: 1,
                            ..Default::default()
                        },
                    )
                    .await
            })
        };

        let test_id = loop {
            if let Some(id) = registry.test_ids().await.first() {
                break id.clone();
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let cancelled = registry.cancel_test(&test_id).await;
        let result = runner.await.expect("runner task should not panic");
        let status = registry
            .test_status(&test_id)
            .await
            .expect("test stays queryable")
            .status;

        // Whichever side wins the race, the acknowledgment and the final
        // status must agree, and a terminal state is never re-entered.
        if cancelled {
            assert!(result.is_err());
            assert_eq!(status, ShadowTestStatus::Cancelled);
        } else {
            assert!(result.is_ok());
            assert_eq!(status, ShadowTestStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_ids_are_unique_across_runs() {
        let registry = registry_with_models().await;
        let config = ShadowTestConfig {
            min_trades: 5,
            min_sessions: 1,
            ..Default::default()
        };
        let a = registry
            .run_shadow_test("momentum", "v2", config.clone())
            .await
            .unwrap();
        let b = registry
            .run_shadow_test("momentum", "v2", config)
            .await
            .unwrap();
        assert_ne!(a.test_id, b.test_id);
        assert_eq!(registry.test_ids().await.len(), 2);
    }
}
