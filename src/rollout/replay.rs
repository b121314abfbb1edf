//! Historical replay engine: feeds a time-ordered bar stream to the
//! champion and challenger in lockstep and records their shadow decisions.
//!
//! The simulated position/balance/P&L state is driven by champion
//! decisions only; the challenger is evaluated on the same price series
//! without touching the simulated account.

use crate::rollout::data_sources::{HistoricalDataSource, SyntheticDataSource};
use crate::rollout::model::{fallback_decision, DecisionModel};
use crate::rollout::types::{ShadowDecision, ShadowTest};
use crate::types::{Decision, TradeAction, TradingContext};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Replay tuning knobs.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Bars fetched per data-source call; also the maximum lockstep skew
    /// between the two decision lists
    pub batch_size: usize,
    /// Decision-count stride approximating one session when calendar-day
    /// boundaries are unavailable
    pub session_stride: usize,
    /// Starting balance of the simulated account
    pub initial_balance: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            session_stride: 100,
            initial_balance: 100_000.0,
        }
    }
}

struct SimulatedAccount {
    position: f64,
    entry_price: f64,
    balance: f64,
    daily_pnl: f64,
}

impl SimulatedAccount {
    fn new(balance: f64) -> Self {
        Self {
            position: 0.0,
            entry_price: 0.0,
            balance,
            daily_pnl: 0.0,
        }
    }

    /// Apply a champion decision at the given price.
    fn apply(&mut self, decision: &Decision, price: f64) {
        match decision.action {
            TradeAction::Buy => {
                if self.position < 0.0 {
                    self.realize(price);
                }
                if self.position == 0.0 {
                    self.position = decision.size;
                    self.entry_price = price;
                }
            }
            TradeAction::Sell => {
                if self.position > 0.0 {
                    self.realize(price);
                }
                if self.position == 0.0 {
                    self.position = -decision.size;
                    self.entry_price = price;
                }
            }
            TradeAction::Hold => {}
        }
    }

    fn realize(&mut self, price: f64) {
        let pnl = (price - self.entry_price) * self.position;
        self.balance += pnl;
        self.daily_pnl += pnl;
        self.position = 0.0;
        self.entry_price = 0.0;
    }
}

/// Drives both models through historical (or synthetic) market data.
pub struct ReplayEngine {
    primary_source: Option<Arc<dyn HistoricalDataSource>>,
    synthetic_seed: u64,
    config: ReplayConfig,
}

impl ReplayEngine {
    pub fn new(
        primary_source: Option<Arc<dyn HistoricalDataSource>>,
        synthetic_seed: u64,
        config: ReplayConfig,
    ) -> Self {
        Self {
            primary_source,
            synthetic_seed,
            config,
        }
    }

    /// Replay until the configured trade and session minimums are both
    /// reached, the data source is exhausted, or the test is cancelled.
    /// Mutates the shadow test in place; status queries observe progress
    /// between steps.
    pub async fn replay(
        &self,
        test: &Arc<RwLock<ShadowTest>>,
        champion: &dyn DecisionModel,
        challenger: &dyn DecisionModel,
    ) -> Result<()> {
        let (config, cancel, test_id) = {
            let t = test.read().await;
            (t.config.clone(), t.cancel.clone(), t.id.clone())
        };

        let synthetic = SyntheticDataSource::new(self.synthetic_seed);
        let mut use_synthetic = self.primary_source.is_none();
        if use_synthetic {
            info!("Test {}: no historical source configured, using seeded synthetic data", test_id);
        }

        let mut account = SimulatedAccount::new(self.config.initial_balance);
        let mut cursor_ts = 0u64;
        let mut decisions_seen = 0usize;
        let mut trades_seen = 0usize;

        'replay: loop {
            if cancel.is_cancelled() {
                info!("Test {}: cancellation observed, stopping replay", test_id);
                break;
            }

            let batch = if use_synthetic {
                synthetic
                    .fetch(&config.symbol, cursor_ts, self.config.batch_size)
                    .await?
            } else {
                // primary_source is Some here by construction
                let source = match &self.primary_source {
                    Some(source) => source,
                    None => break,
                };
                match source
                    .fetch(&config.symbol, cursor_ts, self.config.batch_size)
                    .await
                {
                    Ok(bars) if bars.is_empty() && decisions_seen == 0 => {
                        warn!(
                            "Test {}: historical source has no data for {}, falling back to synthetic",
                            test_id, config.symbol
                        );
                        use_synthetic = true;
                        continue;
                    }
                    Ok(bars) => bars,
                    Err(e) => {
                        warn!(
                            "Test {}: historical source failed ({:#}), falling back to synthetic",
                            test_id, e
                        );
                        use_synthetic = true;
                        continue;
                    }
                }
            };

            if batch.is_empty() {
                info!("Test {}: data source exhausted after {} decisions", test_id, decisions_seen);
                break;
            }

            for bar in &batch {
                if cancel.is_cancelled() {
                    info!("Test {}: cancellation observed at step boundary", test_id);
                    break 'replay;
                }

                let safe_open = if bar.open.abs() > f64::EPSILON { bar.open } else { 1.0 };
                let context = TradingContext {
                    symbol: bar.symbol.clone(),
                    timestamp: bar.timestamp,
                    price: bar.close,
                    open: bar.open,
                    high: bar.high,
                    low: bar.low,
                    close: bar.close,
                    volume: bar.volume,
                    volatility: (bar.high - bar.low) / safe_open,
                    position: account.position,
                    account_balance: account.balance,
                    daily_pnl: account.daily_pnl,
                    metadata: HashMap::new(),
                };

                let champion_call = async {
                    let started = Instant::now();
                    let result = champion.decide(&context).await;
                    (result, started.elapsed().as_secs_f64() * 1_000.0)
                };
                let challenger_call = async {
                    let started = Instant::now();
                    let result = challenger.decide(&context).await;
                    (result, started.elapsed().as_secs_f64() * 1_000.0)
                };
                let ((champion_result, champion_ms), (challenger_result, challenger_ms)) =
                    tokio::join!(champion_call, challenger_call);

                let champion_decision = champion_result.unwrap_or_else(|e| {
                    warn!("Test {}: champion inference failed ({:#}), using fallback", test_id, e);
                    fallback_decision(&context, champion.version_id())
                });
                let challenger_decision = challenger_result.unwrap_or_else(|e| {
                    warn!("Test {}: challenger inference failed ({:#}), using fallback", test_id, e);
                    fallback_decision(&context, challenger.version_id())
                });

                if champion_decision.action != TradeAction::Hold {
                    trades_seen += 1;
                }
                decisions_seen += 1;

                {
                    let mut t = test.write().await;
                    t.champion_decisions.push(to_shadow(
                        &champion_decision,
                        bar.timestamp,
                        champion_ms,
                        bar.close,
                    ));
                    t.challenger_decisions.push(to_shadow(
                        &challenger_decision,
                        bar.timestamp,
                        challenger_ms,
                        bar.close,
                    ));
                    if decisions_seen % self.config.session_stride == 0 {
                        t.sessions_recorded += 1;
                    }
                    t.intermediate_results
                        .insert("decisions".to_string(), decisions_seen as f64);
                    t.intermediate_results
                        .insert("trades".to_string(), trades_seen as f64);
                    t.intermediate_results
                        .insert("last_price".to_string(), bar.close);
                    t.intermediate_results
                        .insert("sim_balance".to_string(), account.balance);
                }

                account.apply(&champion_decision, bar.close);
                cursor_ts = bar.timestamp + 1;

                let sessions_seen = decisions_seen / self.config.session_stride;
                if trades_seen >= config.min_trades && sessions_seen >= config.min_sessions {
                    debug!(
                        "Test {}: minimums reached ({} trades, {} sessions) after {} decisions",
                        test_id, trades_seen, sessions_seen, decisions_seen
                    );
                    break 'replay;
                }
            }
        }

        Ok(())
    }
}

fn to_shadow(decision: &Decision, timestamp: u64, latency_ms: f64, price: f64) -> ShadowDecision {
    ShadowDecision {
        action: decision.action,
        size: decision.size,
        confidence: decision.confidence,
        timestamp,
        inference_latency_ms: latency_ms,
        price,
    }
}
