//! Historical market data sources for the replay engine.
//!
//! The replay engine prefers a real source (HTTP quote archive) and falls
//! back to a deterministic, seeded synthetic generator behind the same
//! trait so shadow tests stay reproducible.

use crate::types::QuoteSnapshot;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::Client;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use tracing::debug;

/// An ordered, possibly unbounded sequence of quote snapshots for a symbol.
/// `fetch` returns at most `limit` bars at or after `start_ts`, in timestamp
/// order; an empty batch means the source is exhausted.
#[async_trait]
pub trait HistoricalDataSource: Send + Sync {
    async fn fetch(
        &self,
        symbol: &str,
        start_ts: u64,
        limit: usize,
    ) -> Result<Vec<QuoteSnapshot>>;
}

/// HTTP-backed quote archive with exponential-backoff retries.
pub struct HttpHistoricalSource {
    client: Client,
    base_url: String,
    retry_attempts: usize,
}

impl HttpHistoricalSource {
    pub fn new(client: Client, base_url: String, retry_attempts: usize) -> Self {
        Self {
            client,
            base_url,
            retry_attempts,
        }
    }

    async fn request(&self, url: &str) -> Result<Vec<QuoteSnapshot>> {
        let bars = self
            .client
            .get(url)
            .send()
            .await
            .context("historical data request failed")?
            .error_for_status()
            .context("historical data service returned an error status")?
            .json::<Vec<QuoteSnapshot>>()
            .await
            .context("failed to decode historical bars")?;
        Ok(bars)
    }
}

#[async_trait]
impl HistoricalDataSource for HttpHistoricalSource {
    async fn fetch(
        &self,
        symbol: &str,
        start_ts: u64,
        limit: usize,
    ) -> Result<Vec<QuoteSnapshot>> {
        let url = format!(
            "{}/bars?symbol={}&start={}&limit={}",
            self.base_url, symbol, start_ts, limit
        );
        let retry_strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(5))
            .take(self.retry_attempts);

        let bars = Retry::spawn(retry_strategy, || self.request(&url)).await?;
        debug!("Fetched {} historical bars for {}", bars.len(), symbol);
        Ok(bars)
    }
}

const SYNTHETIC_BAR_INTERVAL_MS: u64 = 60_000;
const SYNTHETIC_BASE_PRICE: f64 = 100.0;

/// Cap on generated bars so a synthetic replay always exhausts eventually.
const SYNTHETIC_MAX_BARS: usize = 20_000;

struct SyntheticState {
    rng: StdRng,
    last_price: f64,
    next_ts: u64,
    emitted: usize,
}

/// Deterministic seeded random-walk generator. Two sources built with the
/// same seed produce byte-identical series, so replay-based tests are
/// reproducible.
pub struct SyntheticDataSource {
    state: Mutex<SyntheticState>,
}

impl SyntheticDataSource {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Mutex::new(SyntheticState {
                rng: StdRng::seed_from_u64(seed),
                last_price: SYNTHETIC_BASE_PRICE,
                next_ts: 1_700_000_000_000,
                emitted: 0,
            }),
        }
    }
}

#[async_trait]
impl HistoricalDataSource for SyntheticDataSource {
    async fn fetch(
        &self,
        symbol: &str,
        _start_ts: u64,
        limit: usize,
    ) -> Result<Vec<QuoteSnapshot>> {
        let mut state = self.state.lock().await;
        let remaining = SYNTHETIC_MAX_BARS.saturating_sub(state.emitted);
        let count = limit.min(remaining);
        let mut bars = Vec::with_capacity(count);

        for _ in 0..count {
            let open = state.last_price;
            let change: f64 = state.rng.gen_range(-0.01..0.01);
            let close = (open * (1.0 + change)).max(0.01);
            let high = open.max(close) * (1.0 + state.rng.gen_range(0.0..0.002));
            let low = open.min(close) * (1.0 - state.rng.gen_range(0.0..0.002));
            let volume = state.rng.gen_range(50_000.0..150_000.0);
            let timestamp = state.next_ts;

            bars.push(QuoteSnapshot {
                symbol: symbol.to_string(),
                timestamp,
                open,
                high,
                low,
                close,
                volume,
            });

            state.last_price = close;
            state.next_ts += SYNTHETIC_BAR_INTERVAL_MS;
            state.emitted += 1;
        }

        Ok(bars)
    }
}
