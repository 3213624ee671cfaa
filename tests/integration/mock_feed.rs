//! Mock price feed for integration testing.
//!
//! Provides a deterministic `PriceFeed` implementation with scripted
//! per-symbol price paths — all in-memory with no external
//! dependencies.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use quorum::marketdata::{PriceFeed, PricePoint};

/// A mock price feed for deterministic testing.
///
/// Each symbol has a scripted sequence of prices; history requests
/// spread them over the requested window, spot requests return the
/// last one. Fully controllable from test code.
pub struct MockFeed {
    paths: Mutex<HashMap<String, Vec<f64>>>,
    /// If set, all operations will return this error.
    force_error: Mutex<Option<String>>,
}

impl MockFeed {
    pub fn new() -> Self {
        Self {
            paths: Mutex::new(HashMap::new()),
            force_error: Mutex::new(None),
        }
    }

    /// Script the price path for a symbol.
    pub fn set_path(&self, symbol: &str, prices: &[f64]) {
        self.paths
            .lock()
            .unwrap()
            .insert(symbol.to_string(), prices.to_vec());
    }

    /// Force all subsequent operations to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }
}

#[async_trait]
impl PriceFeed for MockFeed {
    fn name(&self) -> &str {
        "mock"
    }

    async fn current_price(&self, symbol: &str) -> Result<Option<f64>> {
        if let Some(err) = self.force_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{}", err));
        }
        Ok(self
            .paths
            .lock()
            .unwrap()
            .get(symbol)
            .and_then(|p| p.last().copied()))
    }

    async fn price_history(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>> {
        if let Some(err) = self.force_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{}", err));
        }
        let paths = self.paths.lock().unwrap();
        let Some(prices) = paths.get(symbol) else {
            return Ok(Vec::new());
        };
        Ok(prices
            .iter()
            .enumerate()
            .map(|(i, &price)| PricePoint {
                timestamp: from + Duration::minutes(i as i64 + 1),
                price,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_mock_scripted_path() {
    let feed = MockFeed::new();
    feed.set_path("BTC-USD", &[100.0, 101.0, 102.0]);

    let spot = feed.current_price("BTC-USD").await.unwrap();
    assert_eq!(spot, Some(102.0));

    let from = Utc::now() - Duration::hours(1);
    let history = feed
        .price_history("BTC-USD", from, Utc::now())
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].price, 100.0);
    assert!(history[0].timestamp > from);
    assert!(history[0].timestamp < history[2].timestamp);
}

#[tokio::test]
async fn test_mock_unknown_symbol_is_absent_not_error() {
    let feed = MockFeed::new();
    assert_eq!(feed.current_price("DOGE-USD").await.unwrap(), None);
    assert!(feed
        .price_history("DOGE-USD", Utc::now() - Duration::hours(1), Utc::now())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_mock_forced_error() {
    let feed = MockFeed::new();
    feed.set_path("BTC-USD", &[100.0]);
    feed.set_error("simulated provider outage");

    assert!(feed.current_price("BTC-USD").await.is_err());
    assert!(feed
        .price_history("BTC-USD", Utc::now() - Duration::hours(1), Utc::now())
        .await
        .is_err());

    feed.clear_error();
    assert!(feed.current_price("BTC-USD").await.is_ok());
}
