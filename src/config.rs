//! Layered configuration: a YAML file, then environment-variable
//! overrides for secrets, then CLI flag overrides (applied by the
//! binary), validated once at startup (§6).

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileError(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("missing required environment variable: {0}")]
    EnvVarMissing(String),
    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

fn default_mode() -> String {
    "simulated".to_string()
}
fn default_pool_size() -> usize {
    4
}
fn default_message_buffer() -> usize {
    1024
}
fn default_ping_interval_secs() -> u64 {
    10
}
fn default_reconnect_initial_ms() -> u64 {
    250
}
fn default_reconnect_max_ms() -> u64 {
    30_000
}
fn default_reconnect_multiplier() -> f64 {
    2.0
}
fn default_reconnect_jitter_pct() -> f64 {
    0.2
}
fn default_check_interval_secs() -> u64 {
    5
}
fn default_trade_multiplier() -> f64 {
    3.0
}
fn default_min_absolute() -> f64 {
    50.0
}
fn default_hysteresis_ratio() -> f64 {
    1.5
}
fn default_aggression_ticks() -> u32 {
    0
}
fn default_fill_timeout_secs() -> u64 {
    60
}
fn default_fill_retry_initial_ms() -> u64 {
    200
}
fn default_fill_retry_max_ms() -> u64 {
    5_000
}
fn default_fill_retry_multiplier() -> f64 {
    2.0
}
fn default_taker_fee() -> f64 {
    0.0
}
fn default_fee_buffer() -> f64 {
    0.0
}
fn default_max_position_size() -> f64 {
    1000.0
}
fn default_signature_type() -> u8 {
    1
}
fn default_probe_addr() -> String {
    "0.0.0.0:9100".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_chain_id() -> u64 {
    137
}

/// Reconnect backoff parameters (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_reconnect_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_reconnect_jitter_pct")]
    pub jitter_pct: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_reconnect_initial_ms(),
            max_ms: default_reconnect_max_ms(),
            multiplier: default_reconnect_multiplier(),
            jitter_pct: default_reconnect_jitter_pct(),
        }
    }
}

/// Fill-tracker retry parameters (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillRetryConfig {
    #[serde(default = "default_fill_timeout_secs")]
    pub overall_timeout_secs: u64,
    #[serde(default = "default_fill_retry_initial_ms")]
    pub retry_initial_ms: u64,
    #[serde(default = "default_fill_retry_max_ms")]
    pub retry_max_ms: u64,
    #[serde(default = "default_fill_retry_multiplier")]
    pub retry_multiplier: f64,
}

impl Default for FillRetryConfig {
    fn default() -> Self {
        Self {
            overall_timeout_secs: default_fill_timeout_secs(),
            retry_initial_ms: default_fill_retry_initial_ms(),
            retry_max_ms: default_fill_retry_max_ms(),
            retry_multiplier: default_fill_retry_multiplier(),
        }
    }
}

/// Circuit breaker thresholds (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_trade_multiplier")]
    pub trade_multiplier: f64,
    #[serde(default = "default_min_absolute")]
    pub min_absolute: f64,
    #[serde(default = "default_hysteresis_ratio")]
    pub hysteresis_ratio: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            trade_multiplier: default_trade_multiplier(),
            min_absolute: default_min_absolute(),
            hysteresis_ratio: default_hysteresis_ratio(),
        }
    }
}

/// Polymarket-shaped exchange connectivity and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub ws_url: String,
    pub clob_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_signature_type")]
    pub signature_type: u8,
    #[serde(default)]
    pub proxy_address: Option<String>,
    #[serde(skip)]
    pub private_key: String,
    #[serde(skip)]
    pub wallet_address: String,
    #[serde(skip)]
    pub api_key: String,
    #[serde(skip)]
    pub api_secret: String,
    #[serde(skip)]
    pub api_passphrase: String,
}

/// Top-level engine configuration (§6 CLI/configuration surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_message_buffer")]
    pub message_buffer: usize,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub fill: FillRetryConfig,
    #[serde(default = "default_aggression_ticks")]
    pub aggression_ticks: u32,
    #[serde(default = "default_taker_fee")]
    pub taker_fee: f64,
    #[serde(default = "default_fee_buffer")]
    pub fee_buffer: f64,
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,
    #[serde(default = "default_probe_addr")]
    pub probe_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub exchange: ExchangeConfig,
}

impl EngineConfig {
    /// Loads a YAML config file, layers `.env`-sourced secrets on top,
    /// and validates the result.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: EngineConfig = serde_yaml::from_str(&contents)?;

        dotenv::dotenv().ok();
        config.exchange.private_key = std::env::var("PRIVATE_KEY")
            .map_err(|_| ConfigError::EnvVarMissing("PRIVATE_KEY".into()))?;
        config.exchange.wallet_address = std::env::var("WALLET_ADDRESS")
            .map_err(|_| ConfigError::EnvVarMissing("WALLET_ADDRESS".into()))?;
        config.exchange.api_key = std::env::var("API_KEY").unwrap_or_default();
        config.exchange.api_secret = std::env::var("API_SECRET").unwrap_or_default();
        config.exchange.api_passphrase = std::env::var("API_PASSPHRASE").unwrap_or_default();
        if let Ok(proxy) = std::env::var("PROXY_WALLET") {
            config.exchange.proxy_address = Some(proxy);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode != "simulated" && self.mode != "live" {
            return Err(ConfigError::ValidationError(format!(
                "mode must be 'simulated' or 'live', got '{}'",
                self.mode
            )));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::ValidationError("pool_size must be > 0".into()));
        }
        if self.breaker.hysteresis_ratio < 1.0 {
            return Err(ConfigError::ValidationError(
                "hysteresis_ratio must be >= 1.0".into(),
            ));
        }
        if self.breaker.trade_multiplier <= 0.0 {
            return Err(ConfigError::ValidationError(
                "trade_multiplier must be > 0".into(),
            ));
        }
        if self.taker_fee < 0.0 || self.taker_fee >= 1.0 {
            return Err(ConfigError::ValidationError(
                "taker_fee must be in [0, 1)".into(),
            ));
        }
        if self.mode == "live" {
            let key = self.exchange.private_key.trim_start_matches("0x");
            if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ConfigError::ValidationError(
                    "private key must be 0x + 64 hex chars".into(),
                ));
            }
            let addr = self.exchange.wallet_address.trim_start_matches("0x");
            if addr.len() != 40 || !addr.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ConfigError::ValidationError(
                    "wallet address must be 0x + 40 hex chars".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn log(&self) {
        tracing::info!(
            mode = %self.mode,
            pool_size = self.pool_size,
            ws_url = %self.exchange.ws_url,
            aggression_ticks = self.aggression_ticks,
            "engine configuration loaded"
        );
    }
}
