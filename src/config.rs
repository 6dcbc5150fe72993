//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the exchange API key pair) are referenced by env-var name in
//! the config and resolved at runtime via `std::env::var`. Setting
//! `BINANCE_TESTNET` switches the client to the testnet base URL.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub exchange: ExchangeConfig,
    pub risk: RiskConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    pub name: String,
    /// Quote/stablecoin asset everything is priced and borrowed in.
    pub quote_asset: String,
    /// Maximum number of buy → borrow rungs per cascade run.
    pub max_cascade_levels: u32,
    /// Minimum capital (quote units) required to open another level.
    pub capital_floor: Decimal,
    /// Fraction of available capital committed per level.
    pub position_fraction: Decimal,
    /// Fraction of each borrowed amount fed into the next level.
    pub borrow_utilization: Decimal,
    /// Discount applied to `ltv_max` when sizing the loan.
    pub ltv_safety_factor: Decimal,
    /// Pause between cascade levels (rate-limit courtesy).
    pub level_pause_secs: u64,
    /// Monitor wake-up interval.
    pub monitor_interval_secs: u64,
    /// Longer sleep after a monitoring error.
    pub error_backoff_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub testnet_base_url: String,
    pub api_key_env: String,
    pub api_secret_env: String,
    pub recv_window_ms: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    /// LTV at which a position triggers emergency liquidation.
    pub emergency_ltv: Decimal,
    /// LTV at which a position is logged as a warning.
    pub warn_ltv: Decimal,
    /// Margin level below which loans are partially repaid.
    pub min_margin_level: Decimal,
    /// Margin level below which everything is liquidated.
    pub critical_margin_level: Decimal,
    /// Fraction of a loan repaid when reducing a risky position.
    pub reduce_fraction: Decimal,
    /// How many of the riskiest positions to reduce per pass.
    pub reduce_top_n: usize,
    /// Hard cap on operator-supplied starting capital.
    pub max_start_capital: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub state_file: String,
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
}

impl ExchangeConfig {
    /// Base URL to use, honouring the `BINANCE_TESTNET` env toggle.
    pub fn effective_base_url(&self) -> String {
        if std::env::var("BINANCE_TESTNET").map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            == Ok(true)
        {
            self.testnet_base_url.clone()
        } else {
            self.base_url.clone()
        }
    }
}
