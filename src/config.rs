//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys, database URLs) are referenced by env-var name in
//! the config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub consensus: ConsensusSection,
    pub evaluator: EvaluatorSection,
    pub learner: LearnerSection,
    pub lifecycle: LifecycleSection,
    pub market_data: MarketDataConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    pub name: String,
    /// Seconds between evaluator passes.
    pub evaluate_interval_secs: u64,
    /// Seconds between training passes.
    pub train_interval_secs: u64,
    /// Seconds between lifecycle sweeps.
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsensusSection {
    /// Bots whose agreement triggers the contrarian boost.
    #[serde(default)]
    pub contrarian_bots: Vec<String>,
    /// Bots whose agreement triggers the advanced-model boost.
    #[serde(default)]
    pub advanced_bots: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvaluatorSection {
    /// Minimum age (hours) before a pending prediction is evaluated.
    pub horizon_hours: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LearnerSection {
    #[serde(default = "default_alpha")]
    pub learning_rate: f64,
    #[serde(default = "default_gamma")]
    pub discount: f64,
    /// Reward→weight sensitivity for the bridge function.
    #[serde(default = "default_sensitivity")]
    pub weight_sensitivity: f64,
    #[serde(default = "default_min_weight")]
    pub min_weight: f64,
    #[serde(default = "default_max_weight")]
    pub max_weight: f64,
}

fn default_alpha() -> f64 {
    0.1
}
fn default_gamma() -> f64 {
    0.95
}
fn default_sensitivity() -> f64 {
    0.1
}
fn default_min_weight() -> f64 {
    0.3
}
fn default_max_weight() -> f64 {
    2.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleSection {
    #[serde(default = "default_disable_min")]
    pub disable_min_predictions: u64,
    #[serde(default = "default_disable_threshold")]
    pub disable_threshold: f64,
    #[serde(default = "default_streak")]
    pub poor_performance_streak: u32,
    #[serde(default = "default_cooldown_days")]
    pub cooldown_days: i64,
    #[serde(default = "default_enable_min")]
    pub enable_min_predictions: u64,
    #[serde(default = "default_enable_threshold")]
    pub enable_threshold: f64,
}

fn default_disable_min() -> u64 {
    20
}
fn default_disable_threshold() -> f64 {
    0.35
}
fn default_streak() -> u32 {
    3
}
fn default_cooldown_days() -> i64 {
    7
}
fn default_enable_min() -> u64 {
    10
}
fn default_enable_threshold() -> f64 {
    0.60
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketDataConfig {
    pub base_url: String,
    /// Env var holding the provider API key (optional provider).
    pub api_key_env: Option<String>,
    /// Token-bucket refill rate (requests per second).
    pub requests_per_sec: f64,
    /// Token-bucket burst capacity.
    pub burst: u32,
    /// Bounded wait before a rate-limited call gives up (ms).
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. "sqlite://quorum.db". May be overridden by the
    /// env var named in `url_env`.
    pub url: String,
    #[serde(default)]
    pub url_env: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Effective database URL (env override wins).
    pub fn database_url(&self) -> String {
        if let Some(env) = self.database.url_env.as_deref() {
            if let Ok(url) = std::env::var(env) {
                return url;
            }
        }
        self.database.url.clone()
    }
}
