//! Market-data access.
//!
//! The evaluator is the only consumer: it needs the price path an asset
//! took after a prediction was made, or failing that a current
//! snapshot. Feeds report *absence* of data as `Ok(None)` / an empty
//! history — only transport and protocol failures are errors, so the
//! evaluator can distinguish "skip this one" from "the feed is down".

pub mod rest;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::types::QuorumError;

pub use rest::RestFeed;

/// One observed price at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// A source of asset prices.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Human-readable feed name for logs.
    fn name(&self) -> &str;

    /// Latest price for a symbol. `Ok(None)` when the provider does
    /// not know the symbol.
    async fn current_price(&self, symbol: &str) -> Result<Option<f64>>;

    /// Price points between `from` and `to`, oldest first. Empty when
    /// the provider has no data for the window.
    async fn price_history(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>>;
}

// ---------------------------------------------------------------------------
// Throttle
// ---------------------------------------------------------------------------

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket request throttle for outbound feed calls.
///
/// Tokens refill continuously at `requests_per_sec` up to `burst`.
/// `acquire` waits for a token but never longer than the configured
/// timeout; exhaustion surfaces as a retryable `RateLimited` error
/// rather than an unbounded stall of the evaluation pass.
pub struct Throttle {
    state: Mutex<BucketState>,
    refill_per_sec: f64,
    burst: f64,
    acquire_timeout: Duration,
}

impl Throttle {
    pub fn new(requests_per_sec: f64, burst: u32, acquire_timeout: Duration) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            refill_per_sec: requests_per_sec.max(f64::MIN_POSITIVE),
            burst,
            acquire_timeout,
        }
    }

    /// Take one token, sleeping until one refills if necessary.
    pub async fn acquire(&self) -> Result<(), QuorumError> {
        let started = Instant::now();
        loop {
            let need_secs = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.burst);
                state.last_refill = Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                (1.0 - state.tokens) / self.refill_per_sec
            };

            let waited = started.elapsed();
            if waited.as_secs_f64() + need_secs > self.acquire_timeout.as_secs_f64() {
                return Err(QuorumError::RateLimited {
                    waited_ms: waited.as_millis() as u64,
                });
            }
            tokio::time::sleep(Duration::from_secs_f64(need_secs)).await;
        }
    }
}
