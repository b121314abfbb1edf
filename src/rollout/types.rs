//! Domain types for the shadow-test and promotion pipeline.

use crate::rollout::alignment::AlignmentScores;
use crate::rollout::constraints::ConstraintReport;
use crate::rollout::metrics::ModelRiskMetrics;
use crate::rollout::significance::SignificanceResult;
use crate::types::TradeAction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lightweight decision record used only during historical replay.
/// Lifetime is scoped to a single shadow test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowDecision {
    pub action: TradeAction,
    pub size: f64,
    pub confidence: f64,
    /// Unix timestamp in milliseconds of the replayed bar
    pub timestamp: u64,
    /// Inference wall time in milliseconds
    pub inference_latency_ms: f64,
    /// Bar close observed when the decision was made
    pub price: f64,
}

/// Completion criteria and statistical configuration for one shadow test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowTestConfig {
    /// Instrument symbol replayed through both models
    pub symbol: String,
    /// Minimum number of non-HOLD champion decisions before the test may complete
    pub min_trades: usize,
    /// Minimum number of replay sessions before the test may complete
    pub min_sessions: usize,
    /// Significance level for the paired test (p < level means significant)
    pub significance_level: f64,
}

impl Default for ShadowTestConfig {
    fn default() -> Self {
        Self {
            symbol: "ES".to_string(),
            min_trades: 50,
            min_sessions: 5,
            significance_level: 0.05,
        }
    }
}

/// Lifecycle state of a shadow test. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShadowTestStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ShadowTestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShadowTestStatus::Completed | ShadowTestStatus::Failed | ShadowTestStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ShadowTestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ShadowTestStatus::Queued => "QUEUED",
            ShadowTestStatus::Running => "RUNNING",
            ShadowTestStatus::Completed => "COMPLETED",
            ShadowTestStatus::Failed => "FAILED",
            ShadowTestStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Cooperative cancellation signal shared between the registry and the
/// replay loop. The replay engine checks it at every step boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The unit of work for one champion-vs-challenger historical comparison.
#[derive(Debug, Clone)]
pub struct ShadowTest {
    pub id: String,
    pub algorithm: String,
    pub champion_version: String,
    pub challenger_version: String,
    pub config: ShadowTestConfig,
    pub status: ShadowTestStatus,
    /// Unix timestamp in milliseconds
    pub started_at: Option<u64>,
    /// Unix timestamp in milliseconds
    pub ended_at: Option<u64>,
    pub champion_decisions: Vec<ShadowDecision>,
    pub challenger_decisions: Vec<ShadowDecision>,
    pub sessions_recorded: usize,
    /// Intermediate progress values exposed through status queries
    pub intermediate_results: HashMap<String, f64>,
    pub cancel: CancelHandle,
}

impl ShadowTest {
    pub fn new(
        id: String,
        algorithm: String,
        champion_version: String,
        challenger_version: String,
        config: ShadowTestConfig,
    ) -> Self {
        Self {
            id,
            algorithm,
            champion_version,
            challenger_version,
            config,
            status: ShadowTestStatus::Queued,
            started_at: None,
            ended_at: None,
            champion_decisions: Vec::new(),
            challenger_decisions: Vec::new(),
            sessions_recorded: 0,
            intermediate_results: HashMap::new(),
            cancel: CancelHandle::new(),
        }
    }

    /// Number of non-HOLD champion decisions recorded so far.
    pub fn trades_recorded(&self) -> usize {
        self.champion_decisions
            .iter()
            .filter(|d| d.action != TradeAction::Hold)
            .count()
    }

    /// Live progress: max of trade-count ratio and session-count ratio, capped at 1.0.
    pub fn progress(&self) -> f64 {
        let trade_ratio = if self.config.min_trades > 0 {
            self.trades_recorded() as f64 / self.config.min_trades as f64
        } else {
            1.0
        };
        let session_ratio = if self.config.min_sessions > 0 {
            self.sessions_recorded as f64 / self.config.min_sessions as f64
        } else {
            1.0
        };
        trade_ratio.max(session_ratio).min(1.0)
    }
}

/// Recommended operator action from a completed promotion test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendedAction {
    Promote,
    Reject,
}

impl std::fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecommendedAction::Promote => write!(f, "PROMOTE"),
            RecommendedAction::Reject => write!(f, "REJECT"),
        }
    }
}

/// Final artifact of a completed shadow test. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionTestReport {
    pub test_id: String,
    pub algorithm: String,
    pub champion_version: String,
    pub challenger_version: String,
    pub champion_metrics: ModelRiskMetrics,
    pub challenger_metrics: ModelRiskMetrics,
    pub significance: SignificanceResult,
    pub alignment: AlignmentScores,
    pub constraints: ConstraintReport,
    pub passed_all_gates: bool,
    pub recommended_action: RecommendedAction,
    pub failure_reasons: Vec<String>,
    /// Unix timestamp in milliseconds
    pub generated_at: u64,
}

/// Point-in-time view of a shadow test returned by status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestStatusSnapshot {
    pub test_id: String,
    pub status: ShadowTestStatus,
    pub progress: f64,
    pub champion_decisions: usize,
    pub challenger_decisions: usize,
    pub sessions_recorded: usize,
    pub intermediate_results: HashMap<String, f64>,
}

/// Which model is currently authorized to control live decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimaryModel {
    Champion,
    Challenger,
}

impl std::fmt::Display for PrimaryModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimaryModel::Champion => write!(f, "champion"),
            PrimaryModel::Challenger => write!(f, "challenger"),
        }
    }
}

/// Rolling routing statistics exposed by the decision router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStatistics {
    pub total_decisions: u64,
    pub agreement_count: u64,
    pub disagreement_count: u64,
    /// All-time agreement fraction; the advisory promotion check uses the
    /// rolling comparison window instead
    pub agreement_rate: f64,
    pub current_primary: PrimaryModel,
    /// Unix timestamp in milliseconds of the most recent routed decision
    pub last_decision_time: Option<u64>,
}
