//! Shared types for the CASCADE bot.
//!
//! These types form the data model used across all modules: the static
//! per-asset parameters, the leveraged positions making up the cascade,
//! and the portfolio-level bookkeeping shared between the trading task
//! and the HTTP control plane.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Asset profile
// ---------------------------------------------------------------------------

/// Static per-asset parameters driving cascade sizing and ranking.
///
/// These are configured constants, not values derived from live exchange
/// data. `ltv_max` caps how much stablecoin is borrowed against the asset;
/// `yield_rate` and `volatility_factor` feed the ranking score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetProfile {
    /// Base asset symbol, e.g. "BTC".
    pub symbol: String,
    /// Maximum loan-to-value ratio we will borrow at (0.0–1.0).
    pub ltv_max: Decimal,
    /// Assumed annualized yield on the collateral.
    pub yield_rate: Decimal,
    /// Assumed annualized borrow cost against this collateral.
    pub loan_rate: Decimal,
    /// Volatility scalar used to discount the yield in ranking.
    pub volatility_factor: Decimal,
    /// Liquidity tier (1 = most liquid).
    pub liquidity_tier: u8,
}

impl AssetProfile {
    /// Trading pair against the given quote asset, e.g. "BTCUSDT".
    pub fn pair(&self, quote: &str) -> String {
        format!("{}{quote}", self.symbol)
    }
}

impl fmt::Display for AssetProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (ltv_max={} yield={} loan_rate={} vol={} tier={})",
            self.symbol,
            self.ltv_max,
            self.yield_rate,
            self.loan_rate,
            self.volatility_factor,
            self.liquidity_tier,
        )
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// One leveraged rung of the cascade: bought collateral plus the stablecoin
/// loan taken against it.
///
/// Created when a cascade level executes, re-marked by the position monitor
/// as prices move, and cleared when the operator stops the bot or an
/// emergency liquidation fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Base asset symbol, e.g. "BTC".
    pub asset: String,
    /// Trading pair the collateral was bought on, e.g. "BTCUSDT".
    pub symbol: String,
    /// Cascade level that opened this position (1-based).
    pub level: u32,
    /// Collateral quantity in base-asset units.
    pub collateral_qty: Decimal,
    /// Collateral value in quote units at entry.
    pub collateral_value: Decimal,
    /// Entry price in quote units.
    pub entry_price: Decimal,
    /// Outstanding loan amount in `loan_asset` units.
    pub loan_amount: Decimal,
    /// Borrowed asset, e.g. "USDT".
    pub loan_asset: String,
    /// Loan-to-value ratio as of the last mark.
    pub current_ltv: Decimal,
    /// Exchange order id of the entry buy, if the exchange returned one.
    pub order_id: Option<String>,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Re-mark the position at a fresh price and recompute its LTV.
    ///
    /// Returns the new LTV. A non-positive price leaves the previous mark
    /// untouched (a zero-value denominator would make the ratio meaningless).
    pub fn mark_to_price(&mut self, price: Decimal) -> Decimal {
        if price > Decimal::ZERO && self.collateral_qty > Decimal::ZERO {
            let value = self.collateral_qty * price;
            self.current_ltv = self.loan_amount / value;
        }
        self.current_ltv
    }

    /// Current collateral value at the given price.
    pub fn value_at(&self, price: Decimal) -> Decimal {
        self.collateral_qty * price
    }

    /// Whether this position's LTV has breached the given threshold.
    pub fn is_breached(&self, emergency_ltv: Decimal) -> bool {
        self.current_ltv > emergency_ltv
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "L{} {} collateral={} (${}) loan={} {} ltv={}",
            self.level,
            self.asset,
            self.collateral_qty,
            self.collateral_value,
            self.loan_amount,
            self.loan_asset,
            self.current_ltv,
        )
    }
}

// ---------------------------------------------------------------------------
// Bot status & capital ledger
// ---------------------------------------------------------------------------

/// Lifecycle status of the trading task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotStatus {
    Idle,
    Running,
    Stopping,
    Stopped,
    EmergencyStopped,
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotStatus::Idle => write!(f, "IDLE"),
            BotStatus::Running => write!(f, "🟢 RUNNING"),
            BotStatus::Stopping => write!(f, "🟡 STOPPING"),
            BotStatus::Stopped => write!(f, "STOPPED"),
            BotStatus::EmergencyStopped => write!(f, "🔴 EMERGENCY STOP"),
        }
    }
}

impl BotStatus {
    /// Whether a new cascade may be started from this status.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            BotStatus::Idle | BotStatus::Stopped | BotStatus::EmergencyStopped
        )
    }

    /// Whether the trading task is live (running or winding down).
    pub fn is_active(&self) -> bool {
        matches!(self, BotStatus::Running | BotStatus::Stopping)
    }
}

/// Portfolio-level capital bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CapitalLedger {
    /// Operator-supplied starting capital in quote units.
    pub total_capital: Decimal,
    /// Sum of all outstanding loans in quote units.
    pub leveraged_capital: Decimal,
    /// Margin level reported by the exchange on the last health check.
    pub margin_level: Option<Decimal>,
    pub started_at: Option<DateTime<Utc>>,
}

impl CapitalLedger {
    /// Leverage ratio (borrowed / own capital).
    ///
    /// Defined as 0 whenever `total_capital` is 0 so that an idle or
    /// freshly-reset portfolio never divides by zero.
    pub fn leverage_ratio(&self) -> Decimal {
        if self.total_capital.is_zero() {
            Decimal::ZERO
        } else {
            self.leveraged_capital / self.total_capital
        }
    }

    /// Reset all counters (after a stop or liquidation).
    pub fn clear(&mut self) {
        self.total_capital = Decimal::ZERO;
        self.leveraged_capital = Decimal::ZERO;
        self.started_at = None;
    }
}

// ---------------------------------------------------------------------------
// Cascade report
// ---------------------------------------------------------------------------

/// Why a cascade run stopped opening further levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    /// All configured levels were opened.
    MaxLevels,
    /// Remaining capital fell below the configured floor.
    CapitalFloor,
    /// Ran out of distinct configured assets.
    AssetsExhausted,
    /// An exchange call failed at the given level.
    LevelFailed { level: u32, reason: String },
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::MaxLevels => write!(f, "max levels reached"),
            HaltReason::CapitalFloor => write!(f, "capital below floor"),
            HaltReason::AssetsExhausted => write!(f, "assets exhausted"),
            HaltReason::LevelFailed { level, reason } => {
                write!(f, "level {level} failed: {reason}")
            }
        }
    }
}

/// Summary of one cascade execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeReport {
    pub levels_completed: u32,
    pub total_borrowed: Decimal,
    /// Capital remaining after the final level (would have seeded the next).
    pub final_capital: Decimal,
    pub halt_reason: HaltReason,
}

impl fmt::Display for CascadeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cascade: levels={} borrowed={} residual={} ({})",
            self.levels_completed, self.total_borrowed, self.final_capital, self.halt_reason,
        )
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Domain errors surfaced through the control plane.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("Exchange credentials missing: {0}")]
    CredentialsMissing(String),

    #[error("Invalid starting capital: {0}")]
    InvalidCapital(String),

    #[error("Insufficient {asset} balance: need {needed}, have {available}")]
    InsufficientBalance {
        asset: String,
        needed: Decimal,
        available: Decimal,
    },

    #[error("Bot is already running")]
    AlreadyRunning,

    #[error("Exchange error: {0}")]
    Exchange(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_position() -> Position {
        Position {
            asset: "BTC".to_string(),
            symbol: "BTCUSDT".to_string(),
            level: 1,
            collateral_qty: dec!(0.01),
            collateral_value: dec!(800),
            entry_price: dec!(80000),
            loan_amount: dec!(400),
            loan_asset: "USDT".to_string(),
            current_ltv: dec!(0.5),
            order_id: Some("12345".to_string()),
            opened_at: Utc::now(),
        }
    }

    // -- AssetProfile tests --

    #[test]
    fn test_asset_profile_pair() {
        let profile = AssetProfile {
            symbol: "ETH".to_string(),
            ltv_max: dec!(0.45),
            yield_rate: dec!(0.035),
            loan_rate: dec!(0.022),
            volatility_factor: dec!(0.28),
            liquidity_tier: 1,
        };
        assert_eq!(profile.pair("USDT"), "ETHUSDT");
        assert_eq!(profile.pair("USDC"), "ETHUSDC");
    }

    // -- Position tests --

    #[test]
    fn test_position_mark_to_price_drop() {
        let mut pos = sample_position();
        // Price halves: collateral value 0.01 * 40000 = 400, ltv = 400/400 = 1
        let ltv = pos.mark_to_price(dec!(40000));
        assert_eq!(ltv, dec!(1));
        assert_eq!(pos.current_ltv, dec!(1));
    }

    #[test]
    fn test_position_mark_to_price_rise() {
        let mut pos = sample_position();
        // 0.01 * 160000 = 1600, ltv = 400/1600 = 0.25
        let ltv = pos.mark_to_price(dec!(160000));
        assert_eq!(ltv, dec!(0.25));
    }

    #[test]
    fn test_position_mark_ignores_nonpositive_price() {
        let mut pos = sample_position();
        let before = pos.current_ltv;
        assert_eq!(pos.mark_to_price(Decimal::ZERO), before);
        assert_eq!(pos.mark_to_price(dec!(-1)), before);
    }

    #[test]
    fn test_position_is_breached() {
        let mut pos = sample_position();
        assert!(!pos.is_breached(dec!(0.75)));
        pos.mark_to_price(dec!(40000)); // ltv → 1.0
        assert!(pos.is_breached(dec!(0.75)));
    }

    #[test]
    fn test_position_value_at() {
        let pos = sample_position();
        assert_eq!(pos.value_at(dec!(90000)), dec!(900));
    }

    #[test]
    fn test_position_serialization_roundtrip() {
        let pos = sample_position();
        let json = serde_json::to_string(&pos).unwrap();
        let parsed: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.asset, "BTC");
        assert_eq!(parsed.level, 1);
        assert_eq!(parsed.order_id.as_deref(), Some("12345"));
    }

    #[test]
    fn test_position_display() {
        let pos = sample_position();
        let display = format!("{pos}");
        assert!(display.contains("BTC"));
        assert!(display.contains("USDT"));
    }

    // -- BotStatus tests --

    #[test]
    fn test_bot_status_can_start() {
        assert!(BotStatus::Idle.can_start());
        assert!(BotStatus::Stopped.can_start());
        assert!(BotStatus::EmergencyStopped.can_start());
        assert!(!BotStatus::Running.can_start());
        assert!(!BotStatus::Stopping.can_start());
    }

    #[test]
    fn test_bot_status_is_active() {
        assert!(BotStatus::Running.is_active());
        assert!(BotStatus::Stopping.is_active());
        assert!(!BotStatus::Idle.is_active());
        assert!(!BotStatus::Stopped.is_active());
    }

    #[test]
    fn test_bot_status_display() {
        assert_eq!(format!("{}", BotStatus::Idle), "IDLE");
        assert!(format!("{}", BotStatus::Running).contains("RUNNING"));
        assert!(format!("{}", BotStatus::EmergencyStopped).contains("EMERGENCY"));
    }

    #[test]
    fn test_bot_status_serialization_roundtrip() {
        for status in [
            BotStatus::Idle,
            BotStatus::Running,
            BotStatus::Stopping,
            BotStatus::Stopped,
            BotStatus::EmergencyStopped,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let parsed: BotStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(status, parsed);
        }
    }

    // -- CapitalLedger tests --

    #[test]
    fn test_leverage_ratio_zero_capital() {
        let ledger = CapitalLedger::default();
        assert_eq!(ledger.leverage_ratio(), Decimal::ZERO);
    }

    #[test]
    fn test_leverage_ratio() {
        let ledger = CapitalLedger {
            total_capital: dec!(1000),
            leveraged_capital: dec!(1800),
            margin_level: None,
            started_at: None,
        };
        assert_eq!(ledger.leverage_ratio(), dec!(1.8));
    }

    #[test]
    fn test_ledger_clear() {
        let mut ledger = CapitalLedger {
            total_capital: dec!(1000),
            leveraged_capital: dec!(500),
            margin_level: Some(dec!(2.5)),
            started_at: Some(Utc::now()),
        };
        ledger.clear();
        assert!(ledger.total_capital.is_zero());
        assert!(ledger.leveraged_capital.is_zero());
        assert!(ledger.started_at.is_none());
        assert_eq!(ledger.leverage_ratio(), Decimal::ZERO);
    }

    // -- CascadeReport tests --

    #[test]
    fn test_cascade_report_display() {
        let report = CascadeReport {
            levels_completed: 3,
            total_borrowed: dec!(1200),
            final_capital: dec!(80),
            halt_reason: HaltReason::CapitalFloor,
        };
        let display = format!("{report}");
        assert!(display.contains("levels=3"));
        assert!(display.contains("floor"));
    }

    #[test]
    fn test_halt_reason_level_failed_display() {
        let reason = HaltReason::LevelFailed {
            level: 2,
            reason: "borrow rejected".to_string(),
        };
        assert_eq!(format!("{reason}"), "level 2 failed: borrow rejected");
    }

    #[test]
    fn test_cascade_report_serialization_roundtrip() {
        let report = CascadeReport {
            levels_completed: 2,
            total_borrowed: dec!(640),
            final_capital: dec!(288),
            halt_reason: HaltReason::MaxLevels,
        };
        let json = serde_json::to_string(&report).unwrap();
        let parsed: CascadeReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.levels_completed, 2);
        assert_eq!(parsed.halt_reason, HaltReason::MaxLevels);
    }

    // -- BotError tests --

    #[test]
    fn test_bot_error_display() {
        let e = BotError::InsufficientBalance {
            asset: "USDT".to_string(),
            needed: dec!(1000),
            available: dec!(250),
        };
        let msg = format!("{e}");
        assert!(msg.contains("USDT"));
        assert!(msg.contains("1000"));
        assert!(msg.contains("250"));

        let e = BotError::AlreadyRunning;
        assert_eq!(format!("{e}"), "Bot is already running");
    }
}
