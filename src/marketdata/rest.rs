//! REST price feed.
//!
//! Generic spot/candle provider client. Endpoints:
//!   GET {base}/v1/price/{symbol}              → latest spot
//!   GET {base}/v1/candles/{symbol}?start=&end= → close-price candles
//! Auth: optional `X-Api-Key` header.
//!
//! Unknown symbols come back 404 and are reported as `Ok(None)` /
//! empty history, per the `PriceFeed` contract.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use tokio::time::Duration;
use tracing::{debug, warn};

use super::{PriceFeed, PricePoint, Throttle};
use crate::config::{AppConfig, MarketDataConfig};

const FEED_NAME: &str = "rest";
const HTTP_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// API response types (provider JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpotResponse {
    price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandlesResponse {
    #[serde(default)]
    candles: Vec<Candle>,
}

/// One candle; we only use the close.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candle {
    /// Candle timestamp (ms since epoch).
    time: i64,
    close: f64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// REST-backed price feed with a shared request throttle.
pub struct RestFeed {
    http: Client,
    base_url: String,
    api_key: Option<Secret<String>>,
    throttle: Throttle,
}

impl RestFeed {
    pub fn new(cfg: &MarketDataConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent("QUORUM/0.1.0 (consensus-engine)")
            .build()
            .context("Failed to build HTTP client for price feed")?;

        let api_key = match cfg.api_key_env.as_deref() {
            Some(env) => Some(Secret::new(AppConfig::resolve_env(env)?)),
            None => None,
        };

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            throttle: Throttle::new(
                cfg.requests_per_sec,
                cfg.burst,
                Duration::from_millis(cfg.acquire_timeout_ms),
            ),
        })
    }

    // -- Internal helpers ------------------------------------------------

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.throttle.acquire().await?;
        let mut req = self.http.get(url);
        if let Some(key) = &self.api_key {
            req = req.header("X-Api-Key", key.expose_secret().as_str());
        }
        req.send().await.context("Price feed request failed")
    }

    fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
    }

    /// Candles → chronological price points, dropping non-finite closes
    /// the provider occasionally emits for illiquid windows.
    fn to_points(mut candles: Vec<Candle>) -> Vec<PricePoint> {
        candles.sort_by_key(|c| c.time);
        candles
            .into_iter()
            .filter(|c| c.close.is_finite() && c.close > 0.0)
            .map(|c| PricePoint {
                timestamp: Self::ms_to_datetime(c.time),
                price: c.close,
            })
            .collect()
    }
}

#[async_trait]
impl PriceFeed for RestFeed {
    fn name(&self) -> &str {
        FEED_NAME
    }

    async fn current_price(&self, symbol: &str) -> Result<Option<f64>> {
        let url = format!(
            "{}/v1/price/{}",
            self.base_url,
            urlencoding::encode(symbol),
        );
        debug!(url = %url, "Fetching spot price");

        let resp = self.get(&url).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            warn!(symbol = %symbol, "Provider does not know symbol");
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Price feed error {status}: {body}");
        }

        let spot: SpotResponse = resp
            .json()
            .await
            .context("Failed to parse spot price response")?;
        if !spot.price.is_finite() || spot.price <= 0.0 {
            anyhow::bail!("Provider returned invalid spot price: {}", spot.price);
        }
        Ok(Some(spot.price))
    }

    async fn price_history(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>> {
        let url = format!(
            "{}/v1/candles/{}?start={}&end={}",
            self.base_url,
            urlencoding::encode(symbol),
            from.timestamp_millis(),
            to.timestamp_millis(),
        );
        debug!(url = %url, "Fetching candles");

        let resp = self.get(&url).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Price feed error {status}: {body}");
        }

        let parsed: CandlesResponse = resp
            .json()
            .await
            .context("Failed to parse candles response")?;
        Ok(Self::to_points(parsed.candles))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_spot_response_parsing() {
        let spot: SpotResponse =
            serde_json::from_str(r#"{"symbol":"BTC-USD","price":64250.5}"#).unwrap();
        assert_eq!(spot.price, 64250.5);
    }

    #[test]
    fn test_candles_parsing_and_ordering() {
        let json = r#"{"candles":[
            {"time": 1700000120000, "close": 101.0},
            {"time": 1700000000000, "close": 100.0},
            {"time": 1700000060000, "close": 99.5}
        ]}"#;
        let parsed: CandlesResponse = serde_json::from_str(json).unwrap();
        let points = RestFeed::to_points(parsed.candles);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].price, 100.0);
        assert_eq!(points[2].price, 101.0);
        assert!(points[0].timestamp < points[1].timestamp);
    }

    #[test]
    fn test_to_points_drops_invalid_closes() {
        let candles = vec![
            Candle { time: 1, close: f64::NAN },
            Candle { time: 2, close: -5.0 },
            Candle { time: 3, close: 42.0 },
        ];
        let points = RestFeed::to_points(candles);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].price, 42.0);
    }

    #[test]
    fn test_candles_missing_field_defaults_empty() {
        let parsed: CandlesResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.candles.is_empty());
    }

    #[test]
    fn test_ms_to_datetime() {
        let dt = RestFeed::ms_to_datetime(1_700_000_000_000);
        assert_eq!(dt.year(), 2023);
    }
}
