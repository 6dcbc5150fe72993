//! Mock exchange for integration testing.
//!
//! Provides a deterministic `MarginExchange` implementation backed by
//! in-memory books: prices, balances, and loans are fully controllable
//! from test code, with no network dependencies.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use cascade::exchange::{
    AccountSnapshot, AssetBalance, LoanReceipt, MarginExchange, OrderReceipt, OrderSide,
    SideEffect,
};

/// A mock margin exchange for deterministic testing.
///
/// Market orders fill instantly and in full at the posted price. Borrows
/// credit the free balance and the loan book; repays do the reverse.
pub struct MockExchange {
    name: String,
    quote_asset: String,
    prices: Arc<Mutex<HashMap<String, Decimal>>>,
    balances: Arc<Mutex<HashMap<String, Decimal>>>,
    loans: Arc<Mutex<HashMap<String, Decimal>>>,
    orders: Arc<Mutex<Vec<OrderReceipt>>>,
    margin_level: Arc<Mutex<Decimal>>,
    /// If set, all operations will return this error.
    force_error: Arc<Mutex<Option<String>>>,
    tran_seq: Arc<Mutex<u64>>,
}

impl MockExchange {
    /// Create a mock exchange holding `quote_balance` of the quote asset.
    pub fn new(quote_asset: &str, quote_balance: Decimal) -> Self {
        let mut balances = HashMap::new();
        balances.insert(quote_asset.to_string(), quote_balance);
        Self {
            name: "mock-binance".to_string(),
            quote_asset: quote_asset.to_string(),
            prices: Arc::new(Mutex::new(HashMap::new())),
            balances: Arc::new(Mutex::new(balances)),
            loans: Arc::new(Mutex::new(HashMap::new())),
            orders: Arc::new(Mutex::new(Vec::new())),
            margin_level: Arc::new(Mutex::new(Decimal::from(3))),
            force_error: Arc::new(Mutex::new(None)),
            tran_seq: Arc::new(Mutex::new(0)),
        }
    }

    /// Post or move the price for a pair symbol, e.g. "BTCUSDT".
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    pub fn set_margin_level(&self, level: Decimal) {
        *self.margin_level.lock().unwrap() = level;
    }

    /// Force all subsequent operations to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// All orders recorded so far.
    pub fn orders(&self) -> Vec<OrderReceipt> {
        self.orders.lock().unwrap().clone()
    }

    /// Outstanding loan balance for an asset.
    pub fn outstanding_loan(&self, asset: &str) -> Decimal {
        self.loans
            .lock()
            .unwrap()
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn check_error(&self) -> Result<()> {
        if let Some(err) = self.force_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{}", err));
        }
        Ok(())
    }

    fn next_tran_id(&self) -> u64 {
        let mut seq = self.tran_seq.lock().unwrap();
        *seq += 1;
        *seq
    }

    /// Split "BTCUSDT" into the base asset, assuming the configured quote.
    fn base_asset(&self, symbol: &str) -> Result<String> {
        symbol
            .strip_suffix(&self.quote_asset)
            .filter(|base| !base.is_empty())
            .map(|base| base.to_string())
            .ok_or_else(|| anyhow!("Unknown symbol: {symbol}"))
    }
}

#[async_trait]
impl MarginExchange for MockExchange {
    async fn ping(&self) -> Result<()> {
        self.check_error()
    }

    async fn symbol_price(&self, symbol: &str) -> Result<Decimal> {
        self.check_error()?;
        self.prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow!("No price for symbol: {symbol}"))
    }

    async fn account(&self) -> Result<AccountSnapshot> {
        self.check_error()?;
        let balances = self.balances.lock().unwrap();
        let loans = self.loans.lock().unwrap();

        let mut assets: Vec<String> = balances.keys().chain(loans.keys()).cloned().collect();
        assets.sort();
        assets.dedup();

        let assets = assets
            .into_iter()
            .map(|asset| {
                let free = balances.get(&asset).copied().unwrap_or(Decimal::ZERO);
                let borrowed = loans.get(&asset).copied().unwrap_or(Decimal::ZERO);
                AssetBalance {
                    asset,
                    free,
                    locked: Decimal::ZERO,
                    borrowed,
                    net_asset: free - borrowed,
                }
            })
            .collect();

        Ok(AccountSnapshot {
            margin_level: *self.margin_level.lock().unwrap(),
            total_asset_of_btc: Decimal::ZERO,
            total_net_asset_of_btc: Decimal::ZERO,
            assets,
        })
    }

    async fn market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        _side_effect: SideEffect,
    ) -> Result<OrderReceipt> {
        self.check_error()?;
        let price = self.symbol_price(symbol).await?;
        let base = self.base_asset(symbol)?;
        let quote_qty = quantity * price;

        {
            let mut balances = self.balances.lock().unwrap();
            let quote_balance = balances
                .entry(self.quote_asset.clone())
                .or_insert(Decimal::ZERO);
            match side {
                OrderSide::Buy => {
                    if *quote_balance < quote_qty {
                        return Err(anyhow!(
                            "Insufficient {}: need {quote_qty}, have {quote_balance}",
                            self.quote_asset
                        ));
                    }
                    *quote_balance -= quote_qty;
                    *balances.entry(base.clone()).or_insert(Decimal::ZERO) += quantity;
                }
                OrderSide::Sell => {
                    *quote_balance += quote_qty;
                    let base_balance = balances.entry(base.clone()).or_insert(Decimal::ZERO);
                    *base_balance -= quantity;
                }
            }
        }

        let receipt = OrderReceipt {
            order_id: Some(format!("MOCK-{}", Uuid::new_v4())),
            symbol: symbol.to_string(),
            side,
            executed_qty: quantity,
            quote_qty,
            status: "FILLED".to_string(),
            timestamp: Utc::now(),
        };
        self.orders.lock().unwrap().push(receipt.clone());
        Ok(receipt)
    }

    async fn borrow(&self, asset: &str, amount: Decimal) -> Result<LoanReceipt> {
        self.check_error()?;
        *self
            .balances
            .lock()
            .unwrap()
            .entry(asset.to_string())
            .or_insert(Decimal::ZERO) += amount;
        *self
            .loans
            .lock()
            .unwrap()
            .entry(asset.to_string())
            .or_insert(Decimal::ZERO) += amount;

        Ok(LoanReceipt {
            tran_id: self.next_tran_id(),
            asset: asset.to_string(),
            amount,
        })
    }

    async fn repay(&self, asset: &str, amount: Decimal) -> Result<LoanReceipt> {
        self.check_error()?;
        {
            let mut loans = self.loans.lock().unwrap();
            let outstanding = loans.entry(asset.to_string()).or_insert(Decimal::ZERO);
            if *outstanding < amount {
                return Err(anyhow!(
                    "Repay exceeds outstanding loan: {amount} > {outstanding}"
                ));
            }
            *outstanding -= amount;
        }
        *self
            .balances
            .lock()
            .unwrap()
            .entry(asset.to_string())
            .or_insert(Decimal::ZERO) -= amount;

        Ok(LoanReceipt {
            tran_id: self.next_tran_id(),
            asset: asset.to_string(),
            amount,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_mock_buy_moves_balances() {
        let exchange = MockExchange::new("USDT", dec!(1000));
        exchange.set_price("BTCUSDT", dec!(100));

        exchange
            .market_order("BTCUSDT", OrderSide::Buy, dec!(2), SideEffect::MarginBuy)
            .await
            .unwrap();

        let account = exchange.account().await.unwrap();
        assert_eq!(account.free_balance("USDT"), dec!(800));
        assert_eq!(account.free_balance("BTC"), dec!(2));
    }

    #[tokio::test]
    async fn test_mock_buy_insufficient_balance() {
        let exchange = MockExchange::new("USDT", dec!(50));
        exchange.set_price("BTCUSDT", dec!(100));

        let result = exchange
            .market_order("BTCUSDT", OrderSide::Buy, dec!(2), SideEffect::MarginBuy)
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Insufficient"));
    }

    #[tokio::test]
    async fn test_mock_borrow_and_repay_track_loans() {
        let exchange = MockExchange::new("USDT", dec!(0));
        exchange.borrow("USDT", dec!(400)).await.unwrap();
        assert_eq!(exchange.outstanding_loan("USDT"), dec!(400));
        assert_eq!(exchange.account().await.unwrap().free_balance("USDT"), dec!(400));

        exchange.repay("USDT", dec!(150)).await.unwrap();
        assert_eq!(exchange.outstanding_loan("USDT"), dec!(250));

        // Repaying more than is outstanding is rejected.
        assert!(exchange.repay("USDT", dec!(9999)).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_forced_error() {
        let exchange = MockExchange::new("USDT", dec!(1000));
        exchange.set_price("BTCUSDT", dec!(100));
        exchange.set_error("simulated outage");

        assert!(exchange.ping().await.is_err());
        assert!(exchange.symbol_price("BTCUSDT").await.is_err());
        assert!(exchange.account().await.is_err());

        exchange.clear_error();
        assert!(exchange.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_unknown_symbol() {
        let exchange = MockExchange::new("USDT", dec!(1000));
        assert!(exchange.symbol_price("DOGEUSDT").await.is_err());
        assert!(exchange
            .market_order("DOGEBTC", OrderSide::Buy, dec!(1), SideEffect::NoSideEffect)
            .await
            .is_err());
    }
}
