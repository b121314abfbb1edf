//! Live decision router: runs champion and challenger on every tick,
//! tracks rolling agreement statistics, and owns the atomic primary flag.
//!
//! Routing is fail-closed: `decide` never errors. A failed model call is
//! replaced by the rule-based fallback, and a failed challenger while the
//! challenger is primary fails over to the champion's decision.

use crate::rollout::ledger::RolloutLedger;
use crate::rollout::model::{fallback_decision, DecisionModel};
use crate::rollout::types::{PrimaryModel, RouterStatistics};
use crate::types::{Decision, DecisionComparison, TradingContext};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Rolling comparison buffer capacity; oldest entries are evicted.
const COMPARISON_BUFFER_CAPACITY: usize = 500;

/// Advisory promotion check: minimum comparisons in the rolling window
/// before the agreement rate is considered meaningful.
const ADVISORY_MIN_SAMPLES: usize = 100;

/// Advisory promotion check: agreement rate above which a promotion
/// opportunity is flagged for human review.
const ADVISORY_AGREEMENT_THRESHOLD: f64 = 0.8;

/// Default cadence of the background advisory check.
pub const DEFAULT_ADVISORY_INTERVAL: Duration = Duration::from_secs(3_600);

struct RouterState {
    comparisons: VecDeque<DecisionComparison>,
    /// Agreements among the comparisons currently in the window
    window_agreements: usize,
    total_decisions: u64,
    agreement_count: u64,
    disagreement_count: u64,
    last_decision_time: Option<u64>,
}

impl RouterState {
    fn new() -> Self {
        Self {
            comparisons: VecDeque::with_capacity(COMPARISON_BUFFER_CAPACITY),
            window_agreements: 0,
            total_decisions: 0,
            agreement_count: 0,
            disagreement_count: 0,
            last_decision_time: None,
        }
    }

    /// Agreement rate over the comparisons still in the rolling window.
    fn window_agreement_rate(&self) -> f64 {
        if self.comparisons.is_empty() {
            return 0.0;
        }
        self.window_agreements as f64 / self.comparisons.len() as f64
    }
}

/// Advisory-only readiness snapshot. The router never promotes on its own;
/// this exists to flag an opportunity for a human-initiated shadow test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionReadiness {
    /// Agreement rate over the rolling comparison window
    pub agreement_rate: f64,
    /// Comparisons currently in the window
    pub sample_count: usize,
    pub sufficient_samples: bool,
    pub opportunity: bool,
}

/// Routes every live tick to the current primary model while shadowing the
/// other model for comparison.
pub struct DecisionRouter {
    algorithm: String,
    champion: Arc<dyn DecisionModel>,
    challenger: Arc<dyn DecisionModel>,
    /// false = champion primary, true = challenger primary
    primary_is_challenger: AtomicBool,
    state: Mutex<RouterState>,
    ledger: Option<Arc<dyn RolloutLedger>>,
}

impl DecisionRouter {
    pub fn new(
        algorithm: String,
        champion: Arc<dyn DecisionModel>,
        challenger: Arc<dyn DecisionModel>,
    ) -> Self {
        Self {
            algorithm,
            champion,
            challenger,
            primary_is_challenger: AtomicBool::new(false),
            state: Mutex::new(RouterState::new()),
            ledger: None,
        }
    }

    /// Record promote/rollback transitions in the audit ledger.
    pub fn with_ledger(mut self, ledger: Arc<dyn RolloutLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, RouterState> {
        // A poisoned lock only means another tick panicked mid-update;
        // the counters are still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Route one live tick. Infallible: both models are invoked
    /// concurrently, errors are replaced by the rule-based fallback, and
    /// the returned decision always comes from a healthy path.
    pub async fn decide(&self, context: &TradingContext) -> Decision {
        let started = std::time::Instant::now();
        let (champion_result, challenger_result) = tokio::join!(
            self.champion.decide(context),
            self.challenger.decide(context)
        );

        let challenger_failed = challenger_result.is_err();
        let champion_decision = champion_result.unwrap_or_else(|e| {
            warn!("Champion {} failed on live tick: {:#}", self.champion.version_id(), e);
            fallback_decision(context, self.champion.version_id())
        });
        let challenger_decision = challenger_result.unwrap_or_else(|e| {
            warn!("Challenger {} failed on live tick: {:#}", self.challenger.version_id(), e);
            fallback_decision(context, self.challenger.version_id())
        });

        let comparison =
            DecisionComparison::new(champion_decision.clone(), challenger_decision.clone());
        let agreement_rate = {
            let mut state = self.lock_state();
            if state.comparisons.len() == COMPARISON_BUFFER_CAPACITY {
                if let Some(evicted) = state.comparisons.pop_front() {
                    if evicted.agreement {
                        state.window_agreements -= 1;
                    }
                }
            }
            if comparison.agreement {
                state.agreement_count += 1;
                state.window_agreements += 1;
            } else {
                state.disagreement_count += 1;
            }
            state.total_decisions += 1;
            state.last_decision_time = Some(context.timestamp);
            state.comparisons.push_back(comparison);
            state.window_agreement_rate()
        };

        let challenger_primary = self.primary_is_challenger.load(Ordering::SeqCst);
        let (mut routed, routed_label) = if challenger_primary && !challenger_failed {
            (challenger_decision, PrimaryModel::Challenger)
        } else {
            if challenger_primary {
                warn!("Challenger primary failed; failing over to champion for this tick");
            }
            (champion_decision, PrimaryModel::Champion)
        };

        routed
            .reasoning
            .insert("routed_model".to_string(), routed_label.to_string());
        routed.reasoning.insert(
            "agreement_rate".to_string(),
            format!("{:.4}", agreement_rate),
        );
        routed.reasoning.insert(
            "processing_ms".to_string(),
            format!("{:.3}", started.elapsed().as_secs_f64() * 1_000.0),
        );
        routed
    }

    /// Current primary designator. A single atomic read; no tick ever
    /// observes an intermediate state.
    pub fn current_primary(&self) -> PrimaryModel {
        if self.primary_is_challenger.load(Ordering::SeqCst) {
            PrimaryModel::Challenger
        } else {
            PrimaryModel::Champion
        }
    }

    /// Promote the challenger to primary. Returns false if it already is.
    pub async fn promote_to_primary(&self) -> bool {
        let changed = self
            .primary_is_challenger
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if changed {
            info!(
                "Promoted challenger {} to primary for {}",
                self.challenger.version_id(),
                self.algorithm
            );
            self.record_transition(PrimaryModel::Challenger, "manual promotion")
                .await;
        }
        changed
    }

    /// Roll the primary back to the champion. Returns false if it already is.
    pub async fn rollback_to_champion(&self) -> bool {
        let changed = self
            .primary_is_challenger
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if changed {
            info!(
                "Rolled back to champion {} for {}",
                self.champion.version_id(),
                self.algorithm
            );
            self.record_transition(PrimaryModel::Champion, "manual rollback")
                .await;
        }
        changed
    }

    async fn record_transition(&self, new_primary: PrimaryModel, reason: &str) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger
                .record_transition(&self.algorithm, new_primary, reason)
                .await
            {
                warn!("Failed to record primary transition: {:#}", e);
            }
        }
    }

    /// Rolling statistics over the live comparison stream.
    pub fn statistics(&self) -> RouterStatistics {
        let state = self.lock_state();
        let agreement_rate = if state.total_decisions > 0 {
            state.agreement_count as f64 / state.total_decisions as f64
        } else {
            0.0
        };
        RouterStatistics {
            total_decisions: state.total_decisions,
            agreement_count: state.agreement_count,
            disagreement_count: state.disagreement_count,
            agreement_rate,
            current_primary: self.current_primary(),
            last_decision_time: state.last_decision_time,
        }
    }

    /// Advisory-only promotion readiness over the rolling comparison
    /// window, so a recent behavior change is not diluted by all-time
    /// counters. Flags an opportunity when the window is full enough and
    /// its agreement rate clears the threshold; the actual promotion
    /// decision stays with a human-initiated shadow test.
    pub fn evaluate_promotion_readiness(&self) -> PromotionReadiness {
        let (agreement_rate, sample_count) = {
            let state = self.lock_state();
            (state.window_agreement_rate(), state.comparisons.len())
        };
        let sufficient_samples = sample_count >= ADVISORY_MIN_SAMPLES;
        let opportunity =
            sufficient_samples && agreement_rate >= ADVISORY_AGREEMENT_THRESHOLD;
        PromotionReadiness {
            agreement_rate,
            sample_count,
            sufficient_samples,
            opportunity,
        }
    }

    /// One advisory check: evaluate readiness and log the outcome. Never
    /// mutates the primary flag.
    fn run_advisory_check(&self) {
        let readiness = self.evaluate_promotion_readiness();
        if readiness.opportunity {
            info!(
                "Promotion opportunity for {}: window agreement {:.1}% over {} comparisons; run a shadow test to confirm",
                self.algorithm,
                readiness.agreement_rate * 100.0,
                readiness.sample_count
            );
        } else if !readiness.sufficient_samples {
            info!(
                "Advisory check for {}: {} comparisons in window, waiting for {}",
                self.algorithm, readiness.sample_count, ADVISORY_MIN_SAMPLES
            );
        } else {
            info!(
                "Advisory check for {}: window agreement {:.1}% below the {:.0}% opportunity threshold",
                self.algorithm,
                readiness.agreement_rate * 100.0,
                ADVISORY_AGREEMENT_THRESHOLD * 100.0
            );
        }
    }

    /// Spawn the recurring advisory check. Each invocation runs inside its
    /// own error boundary so one bad iteration never kills the task.
    pub fn spawn_advisory_task(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                let check = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    self.run_advisory_check()
                }));
                if check.is_err() {
                    warn!(
                        "Advisory check for {} panicked; continuing on the next tick",
                        self.algorithm
                    );
                }
            }
        })
    }

    /// Most recent comparisons, oldest first. Test and diagnostics hook.
    pub fn recent_comparisons(&self, limit: usize) -> Vec<DecisionComparison> {
        let state = self.lock_state();
        state
            .comparisons
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeAction;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FixedModel {
        id: String,
        action: TradeAction,
    }

    #[async_trait]
    impl DecisionModel for FixedModel {
        fn version_id(&self) -> &str {
            &self.id
        }

        async fn decide(&self, context: &TradingContext) -> Result<Decision> {
            Ok(Decision {
                action: self.action,
                size: 1.0,
                confidence: 0.8,
                strategy: self.id.clone(),
                timestamp: context.timestamp,
                reasoning: HashMap::new(),
            })
        }
    }

    struct FailingModel;

    #[async_trait]
    impl DecisionModel for FailingModel {
        fn version_id(&self) -> &str {
            "broken"
        }

        async fn decide(&self, _context: &TradingContext) -> Result<Decision> {
            Err(anyhow!("inference runtime unavailable"))
        }
    }

    fn context(timestamp: u64) -> TradingContext {
        TradingContext {
            symbol: "ES".to_string(),
            timestamp,
            price: 101.0,
            open: 100.0,
            high: 102.0,
            low: 99.0,
            close: 101.0,
            volume: 10_000.0,
            volatility: 0.01,
            position: 0.0,
            account_balance: 100_000.0,
            daily_pnl: 0.0,
            metadata: HashMap::new(),
        }
    }

    fn agree_router() -> DecisionRouter {
        DecisionRouter::new(
            "momentum".to_string(),
            Arc::new(FixedModel {
                id: "v1".to_string(),
                action: TradeAction::Buy,
            }),
            Arc::new(FixedModel {
                id: "v2".to_string(),
                action: TradeAction::Buy,
            }),
        )
    }

    #[tokio::test]
    async fn test_agreement_statistics() {
        let router = DecisionRouter::new(
            "momentum".to_string(),
            Arc::new(FixedModel {
                id: "v1".to_string(),
                action: TradeAction::Buy,
            }),
            Arc::new(FixedModel {
                id: "v2".to_string(),
                action: TradeAction::Sell,
            }),
        );

        for i in 0..10 {
            router.decide(&context(i)).await;
        }
        let stats = router.statistics();
        assert_eq!(stats.total_decisions, 10);
        assert_eq!(stats.disagreement_count, 10);
        assert_eq!(stats.agreement_rate, 0.0);
        assert_eq!(stats.last_decision_time, Some(9));
    }

    #[tokio::test]
    async fn test_promote_rollback_round_trip() {
        let router = agree_router();
        assert_eq!(router.statistics().current_primary, PrimaryModel::Champion);

        assert!(router.promote_to_primary().await);
        assert_eq!(
            router.statistics().current_primary,
            PrimaryModel::Challenger
        );
        assert!(!router.promote_to_primary().await); // already primary

        assert!(router.rollback_to_champion().await);
        assert_eq!(router.statistics().current_primary, PrimaryModel::Champion);
        assert!(!router.rollback_to_champion().await);
    }

    #[tokio::test]
    async fn test_decide_never_fails_with_broken_models() {
        let router = DecisionRouter::new(
            "momentum".to_string(),
            Arc::new(FailingModel),
            Arc::new(FailingModel),
        );
        let decision = router.decide(&context(1)).await;
        assert_eq!(
            decision.reasoning.get("fallback").map(String::as_str),
            Some("rule_momentum")
        );
        assert!(decision.reasoning.contains_key("routed_model"));
    }

    #[tokio::test]
    async fn test_challenger_primary_fails_over_to_champion() {
        let router = DecisionRouter::new(
            "momentum".to_string(),
            Arc::new(FixedModel {
                id: "v1".to_string(),
                action: TradeAction::Sell,
            }),
            Arc::new(FailingModel),
        );
        router.promote_to_primary().await;

        let decision = router.decide(&context(1)).await;
        assert_eq!(decision.action, TradeAction::Sell);
        assert_eq!(
            decision.reasoning.get("routed_model").map(String::as_str),
            Some("champion")
        );
    }

    #[tokio::test]
    async fn test_routed_model_marker_follows_primary() {
        let router = agree_router();
        let decision = router.decide(&context(1)).await;
        assert_eq!(
            decision.reasoning.get("routed_model").map(String::as_str),
            Some("champion")
        );

        router.promote_to_primary().await;
        let decision = router.decide(&context(2)).await;
        assert_eq!(
            decision.reasoning.get("routed_model").map(String::as_str),
            Some("challenger")
        );
    }

    #[tokio::test]
    async fn test_comparison_buffer_is_bounded() {
        let router = agree_router();
        for i in 0..(COMPARISON_BUFFER_CAPACITY as u64 + 50) {
            router.decide(&context(i)).await;
        }
        let stats = router.statistics();
        assert_eq!(stats.total_decisions, COMPARISON_BUFFER_CAPACITY as u64 + 50);
        assert_eq!(
            router.recent_comparisons(usize::MAX).len(),
            COMPARISON_BUFFER_CAPACITY
        );
    }

    #[tokio::test]
    async fn test_readiness_is_advisory_only() {
        let router = agree_router();
        for i in 0..ADVISORY_MIN_SAMPLES as u64 {
            router.decide(&context(i)).await;
        }
        let readiness = router.evaluate_promotion_readiness();
        assert!(readiness.opportunity);
        // High agreement never flips the primary by itself.
        assert_eq!(router.current_primary(), PrimaryModel::Champion);
    }

    /// Challenger that disagrees with the champion until `switch_at`, then
    /// agrees from that tick onward.
    struct SwitchingModel {
        switch_at: u64,
    }

    #[async_trait]
    impl DecisionModel for SwitchingModel {
        fn version_id(&self) -> &str {
            "switching"
        }

        async fn decide(&self, context: &TradingContext) -> Result<Decision> {
            let action = if context.timestamp >= self.switch_at {
                TradeAction::Buy
            } else {
                TradeAction::Sell
            };
            Ok(Decision {
                action,
                size: 1.0,
                confidence: 0.8,
                strategy: "switching".to_string(),
                timestamp: context.timestamp,
                reasoning: HashMap::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_readiness_tracks_rolling_window_not_all_time() {
        let window = COMPARISON_BUFFER_CAPACITY as u64;
        let router = DecisionRouter::new(
            "momentum".to_string(),
            Arc::new(FixedModel {
                id: "v1".to_string(),
                action: TradeAction::Buy,
            }),
            Arc::new(SwitchingModel { switch_at: 2_000 }),
        );

        // 2000 disagreeing ticks, then a full window of agreeing ones.
        for i in 0..(2_000 + window) {
            router.decide(&context(i)).await;
        }

        let stats = router.statistics();
        assert!((stats.agreement_rate - window as f64 / (2_000.0 + window as f64)).abs() < 1e-9);

        let readiness = router.evaluate_promotion_readiness();
        assert_eq!(readiness.sample_count, COMPARISON_BUFFER_CAPACITY);
        assert!((readiness.agreement_rate - 1.0).abs() < 1e-9);
        assert!(readiness.opportunity);

        let decision = router.decide(&context(2_000 + window)).await;
        assert_eq!(
            decision.reasoning.get("agreement_rate").map(String::as_str),
            Some("1.0000")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_advisory_task_ticks_without_flipping_primary() {
        let router = Arc::new(agree_router());
        for i in 0..ADVISORY_MIN_SAMPLES as u64 {
            router.decide(&context(i)).await;
        }
        assert!(router.evaluate_promotion_readiness().opportunity);

        let handle = router
            .clone()
            .spawn_advisory_task(Duration::from_secs(3_600));
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(3_600)).await;
            tokio::task::yield_now().await;
        }

        assert!(!handle.is_finished());
        assert_eq!(router.current_primary(), PrimaryModel::Champion);
        handle.abort();
    }
}
