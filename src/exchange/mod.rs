//! Exchange integration.
//!
//! Defines the `MarginExchange` trait abstracting the margin-trading
//! surface the bot needs (pricing, account state, orders, loans) and the
//! Binance implementation behind it. The trait exists so the cascade
//! executor and position monitor can be exercised against an in-memory
//! exchange in tests.

pub mod binance;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(test)]
use mockall::automock;

// ---------------------------------------------------------------------------
// Order types
// ---------------------------------------------------------------------------

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Margin order side effect, controlling how the order interacts with the
/// margin loan book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideEffect {
    /// Plain margin trade, no automatic borrow or repay.
    NoSideEffect,
    /// Borrow automatically if the balance is insufficient.
    MarginBuy,
    /// Apply proceeds to outstanding loans.
    AutoRepay,
}

impl SideEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideEffect::NoSideEffect => "NO_SIDE_EFFECT",
            SideEffect::MarginBuy => "MARGIN_BUY",
            SideEffect::AutoRepay => "AUTO_REPAY",
        }
    }
}

/// Receipt for an executed margin order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    /// Exchange-assigned order id, if one was returned.
    pub order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    /// Base-asset quantity actually filled.
    pub executed_qty: Decimal,
    /// Quote-asset value of the fill.
    pub quote_qty: Decimal,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for OrderReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} qty={} quote={} status={} [{}]",
            self.side,
            self.symbol,
            self.executed_qty,
            self.quote_qty,
            self.status,
            self.order_id.as_deref().unwrap_or("-"),
        )
    }
}

/// Receipt for a margin borrow or repay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanReceipt {
    pub tran_id: u64,
    pub asset: String,
    pub amount: Decimal,
}

// ---------------------------------------------------------------------------
// Account state
// ---------------------------------------------------------------------------

/// Per-asset balances within the margin account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
    pub borrowed: Decimal,
    pub net_asset: Decimal,
}

impl AssetBalance {
    /// Whether any of the balance fields is non-zero.
    pub fn is_nonzero(&self) -> bool {
        !self.free.is_zero() || !self.locked.is_zero() || !self.borrowed.is_zero()
    }
}

/// Snapshot of the margin account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Exchange-reported margin level (collateral / debt health metric).
    pub margin_level: Decimal,
    pub total_asset_of_btc: Decimal,
    pub total_net_asset_of_btc: Decimal,
    pub assets: Vec<AssetBalance>,
}

impl AccountSnapshot {
    /// Free balance of the given asset, 0 if absent.
    pub fn free_balance(&self, asset: &str) -> Decimal {
        self.assets
            .iter()
            .find(|a| a.asset == asset)
            .map(|a| a.free)
            .unwrap_or(Decimal::ZERO)
    }

    /// Balances with at least one non-zero field.
    pub fn nonzero_assets(&self) -> Vec<&AssetBalance> {
        self.assets.iter().filter(|a| a.is_nonzero()).collect()
    }
}

// ---------------------------------------------------------------------------
// MarginExchange trait
// ---------------------------------------------------------------------------

/// Abstraction over a margin-trading exchange.
///
/// Implementors provide pricing, account inspection, market orders, and
/// the borrow/repay loan surface the cascade builds on.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MarginExchange: Send + Sync {
    /// Connectivity check against the public API.
    async fn ping(&self) -> Result<()>;

    /// Latest traded price for a pair symbol, e.g. "BTCUSDT".
    async fn symbol_price(&self, symbol: &str) -> Result<Decimal>;

    /// Current margin account snapshot.
    async fn account(&self) -> Result<AccountSnapshot>;

    /// Place a market order on the margin account.
    async fn market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        side_effect: SideEffect,
    ) -> Result<OrderReceipt>;

    /// Borrow `amount` of `asset` against margin collateral.
    async fn borrow(&self, asset: &str, amount: Decimal) -> Result<LoanReceipt>;

    /// Repay `amount` of an outstanding `asset` loan.
    async fn repay(&self, asset: &str, amount: Decimal) -> Result<LoanReceipt>;

    /// Exchange name for logging.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
