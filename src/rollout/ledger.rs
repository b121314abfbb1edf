//! SQLite audit ledger for promotion reports and primary-model transitions.
//!
//! Every completed shadow test and every manual promote/rollback leaves a
//! durable row here, so rollout decisions stay auditable after the fact.

use crate::rollout::types::{PrimaryModel, PromotionTestReport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use tracing::{debug, info};

const DB_FILE: &str = "./rollout.db";

/// Persistent audit store for the rollout control plane.
#[async_trait]
pub trait RolloutLedger: Send + Sync {
    async fn insert_report(&self, report: &PromotionTestReport) -> Result<i64>;
    async fn record_transition(
        &self,
        algorithm: &str,
        new_primary: PrimaryModel,
        reason: &str,
    ) -> Result<()>;
    async fn get_report(&self, test_id: &str) -> Result<Option<PromotionTestReport>>;
    async fn report_count(&self) -> Result<i64>;
    async fn health_check(&self) -> Result<()>;
}

#[derive(FromRow)]
struct ReportRow {
    report: String, // JSON
}

/// SQLite implementation of the rollout ledger.
pub struct SqliteRolloutLedger {
    pool: Pool<Sqlite>,
}

impl SqliteRolloutLedger {
    /// Open (or create) the on-disk ledger database.
    pub async fn new() -> Result<Self> {
        Self::connect(&format!("sqlite:{}?mode=rwc", DB_FILE)).await
    }

    /// Open an in-memory ledger. Used by tests and the demo binary.
    pub async fn new_in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .context("Failed to connect to SQLite database")?;

        Self::create_schema(&pool).await?;
        info!("Rollout ledger initialized at {}", url);
        Ok(Self { pool })
    }

    async fn create_schema(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS promotion_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                test_id TEXT NOT NULL UNIQUE,
                algorithm TEXT NOT NULL,
                champion_version TEXT NOT NULL,
                challenger_version TEXT NOT NULL,
                passed_all_gates BOOLEAN NOT NULL,
                recommended_action TEXT NOT NULL,
                generated_at INTEGER NOT NULL,
                report TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create promotion_reports table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS model_transitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                algorithm TEXT NOT NULL,
                new_primary TEXT NOT NULL,
                reason TEXT NOT NULL,
                transition_timestamp INTEGER NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create model_transitions table")?;

        Ok(())
    }
}

#[async_trait]
impl RolloutLedger for SqliteRolloutLedger {
    async fn insert_report(&self, report: &PromotionTestReport) -> Result<i64> {
        debug!("Persisting promotion report for test {}", report.test_id);
        let report_json =
            serde_json::to_string(report).context("Failed to serialize promotion report")?;

        let id = sqlx::query(
            r#"
            INSERT INTO promotion_reports (
                test_id, algorithm, champion_version, challenger_version,
                passed_all_gates, recommended_action, generated_at, report
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?);
            "#,
        )
        .bind(&report.test_id)
        .bind(&report.algorithm)
        .bind(&report.champion_version)
        .bind(&report.challenger_version)
        .bind(report.passed_all_gates)
        .bind(report.recommended_action.to_string())
        .bind(report.generated_at as i64)
        .bind(report_json)
        .execute(&self.pool)
        .await
        .context("Failed to insert promotion report")?
        .last_insert_rowid();

        Ok(id)
    }

    async fn record_transition(
        &self,
        algorithm: &str,
        new_primary: PrimaryModel,
        reason: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO model_transitions (algorithm, new_primary, reason, transition_timestamp)
            VALUES (?, ?, ?, ?);
            "#,
        )
        .bind(algorithm)
        .bind(new_primary.to_string())
        .bind(reason)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to record model transition")?;

        info!("Recorded primary transition for {}: {}", algorithm, new_primary);
        Ok(())
    }

    async fn get_report(&self, test_id: &str) -> Result<Option<PromotionTestReport>> {
        let row: Option<ReportRow> =
            sqlx::query_as("SELECT report FROM promotion_reports WHERE test_id = ?;")
                .bind(test_id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to fetch promotion report")?;

        match row {
            Some(row) => {
                let report = serde_json::from_str(&row.report)
                    .context("Failed to deserialize stored promotion report")?;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    async fn report_count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM promotion_reports;")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count promotion reports")?;
        Ok(count.0)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1;")
            .execute(&self.pool)
            .await
            .context("Ledger health check failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollout::types::RecommendedAction;

    fn sample_report(test_id: &str) -> PromotionTestReport {
        PromotionTestReport {
            test_id: test_id.to_string(),
            algorithm: "momentum".to_string(),
            champion_version: "v1".to_string(),
            challenger_version: "v2".to_string(),
            champion_metrics: Default::default(),
            challenger_metrics: Default::default(),
            significance: Default::default(),
            alignment: Default::default(),
            constraints: Default::default(),
            passed_all_gates: false,
            recommended_action: RecommendedAction::Reject,
            failure_reasons: vec!["significance gate failed: p=1.0000 over 0 paired samples".to_string()],
            generated_at: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_report_round_trip() {
        let ledger = SqliteRolloutLedger::new_in_memory().await.unwrap();
        let id = ledger.insert_report(&sample_report("t-1")).await.unwrap();
        assert!(id > 0);

        let loaded = ledger.get_report("t-1").await.unwrap().unwrap();
        assert_eq!(loaded.test_id, "t-1");
        assert_eq!(loaded.recommended_action, RecommendedAction::Reject);
        assert_eq!(loaded.failure_reasons.len(), 1);

        assert!(ledger.get_report("missing").await.unwrap().is_none());
        assert_eq!(ledger.report_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_test_id_is_rejected() {
        let ledger = SqliteRolloutLedger::new_in_memory().await.unwrap();
        ledger.insert_report(&sample_report("t-1")).await.unwrap();
        assert!(ledger.insert_report(&sample_report("t-1")).await.is_err());
    }

    #[tokio::test]
    async fn test_transitions_and_health() {
        let ledger = SqliteRolloutLedger::new_in_memory().await.unwrap();
        ledger
            .record_transition("momentum", PrimaryModel::Challenger, "manual promotion")
            .await
            .unwrap();
        ledger
            .record_transition("momentum", PrimaryModel::Champion, "manual rollback")
            .await
            .unwrap();
        ledger.health_check().await.unwrap();
    }
}
