//! Rollout module - safe champion/challenger model rollout control plane
//!
//! This module contains the live DecisionRouter, the offline shadow-test
//! pipeline (replay, metrics, significance, alignment, constraints,
//! promotion gate), the ShadowTestRegistry lifecycle, and the SQLite
//! audit ledger.

pub mod types;
pub mod metrics;
pub mod significance;
pub mod alignment;
pub mod constraints;
pub mod model;
pub mod data_sources;
pub mod replay;
pub mod gate;
pub mod registry;
pub mod router;
pub mod ledger;

// Re-export main types
pub use types::{
    CancelHandle, PrimaryModel, PromotionTestReport, RecommendedAction,
    RouterStatistics, ShadowDecision, ShadowTest, ShadowTestConfig,
    ShadowTestStatus, TestStatusSnapshot,
};

// Re-export key components
pub use alignment::{AlignmentChecker, AlignmentScores};
pub use constraints::{ConstraintBudgets, ConstraintReport, ConstraintValidator};
pub use data_sources::{HistoricalDataSource, HttpHistoricalSource, SyntheticDataSource};
pub use gate::{GateThresholds, PromotionGate};
pub use ledger::{RolloutLedger, SqliteRolloutLedger};
pub use metrics::ModelRiskMetrics;
pub use model::{
    DecisionModel, InferenceEngine, InferenceModel, MemoryModelRegistry, ModelRegistry,
};
pub use registry::ShadowTestRegistry;
pub use replay::{ReplayConfig, ReplayEngine};
pub use router::{DecisionRouter, PromotionReadiness, DEFAULT_ADVISORY_INTERVAL};
pub use significance::SignificanceResult;
