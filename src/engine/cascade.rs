//! Cascade executor.
//!
//! Deploys capital level by level: buy collateral, borrow stablecoin
//! against it, and feed the borrowed funds into the next level. Each level
//! uses the next-ranked asset so the largest tranches sit on the safest
//! collateral. The loop halts at the configured level cap, when remaining
//! capital drops below the floor, when assets run out, or when an exchange
//! call fails.

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::exchange::{MarginExchange, OrderSide, SideEffect};
use crate::strategy::ranking::RankedAsset;
use crate::types::{CascadeReport, HaltReason, Position};

use super::{CascadeSettings, PortfolioState};

/// Base-asset quantities are submitted with at most this many decimals.
const QTY_PRECISION: u32 = 6;

pub struct CascadeExecutor<'a> {
    exchange: &'a dyn MarginExchange,
    settings: &'a CascadeSettings,
}

impl<'a> CascadeExecutor<'a> {
    pub fn new(exchange: &'a dyn MarginExchange, settings: &'a CascadeSettings) -> Self {
        Self { exchange, settings }
    }

    /// Run the cascade, mutating the shared state as levels open.
    ///
    /// A failed level halts the cascade but never tears down the levels
    /// already opened; those are handed to the monitor as usual.
    pub async fn run(
        &self,
        starting_capital: Decimal,
        ranked: &[RankedAsset],
        state: &PortfolioState,
    ) -> CascadeReport {
        let mut capital = starting_capital;
        let mut total_borrowed = Decimal::ZERO;
        let mut level: u32 = 0;

        let halt_reason = loop {
            if level >= self.settings.max_levels {
                break HaltReason::MaxLevels;
            }
            if capital < self.settings.capital_floor {
                info!(
                    %capital,
                    floor = %self.settings.capital_floor,
                    "Remaining capital below floor, halting cascade"
                );
                break HaltReason::CapitalFloor;
            }
            // One distinct asset per level, best-ranked first.
            let Some(asset) = ranked.get(level as usize) else {
                break HaltReason::AssetsExhausted;
            };

            level += 1;
            match self.execute_level(level, capital, asset).await {
                Ok(position) => {
                    let loan = position.loan_amount;
                    info!(%position, "Cascade level opened");

                    state.positions.write().await.push(position);
                    {
                        let mut ledger = state.ledger.write().await;
                        ledger.leveraged_capital += loan;
                    }
                    state.touch().await;

                    total_borrowed += loan;
                    capital = loan * self.settings.borrow_utilization;

                    if level < self.settings.max_levels && !self.settings.level_pause.is_zero() {
                        tokio::time::sleep(self.settings.level_pause).await;
                    }
                }
                Err(reason) => {
                    warn!(level, %reason, "Cascade level failed, halting");
                    break HaltReason::LevelFailed { level, reason };
                }
            }
        };

        CascadeReport {
            levels_completed: state.positions.read().await.len() as u32,
            total_borrowed,
            final_capital: capital,
            halt_reason,
        }
    }

    /// Execute one level: buy collateral, then borrow against it.
    ///
    /// If the borrow fails after the buy filled, the collateral is sold
    /// back on a best-effort basis so the level leaves no half-open state.
    async fn execute_level(
        &self,
        level: u32,
        capital: Decimal,
        asset: &RankedAsset,
    ) -> Result<Position, String> {
        let profile = &asset.profile;
        let symbol = profile.pair(&self.settings.quote_asset);

        let price = self
            .exchange
            .symbol_price(&symbol)
            .await
            .map_err(|e| format!("price lookup for {symbol}: {e}"))?;
        if price <= Decimal::ZERO {
            return Err(format!("non-positive price for {symbol}: {price}"));
        }

        let collateral_quote = capital * self.settings.position_fraction;
        let quantity = (collateral_quote / price).round_dp(QTY_PRECISION);
        if quantity <= Decimal::ZERO {
            return Err(format!(
                "level {level} quantity rounds to zero ({collateral_quote} {} at {price})",
                self.settings.quote_asset
            ));
        }

        info!(
            level,
            asset = %profile.symbol,
            %price,
            %quantity,
            score = %asset.score,
            "Buying collateral"
        );
        let buy = self
            .exchange
            .market_order(&symbol, OrderSide::Buy, quantity, SideEffect::MarginBuy)
            .await
            .map_err(|e| format!("buy {symbol}: {e}"))?;

        let filled_qty = if buy.executed_qty > Decimal::ZERO {
            buy.executed_qty
        } else {
            quantity
        };
        let collateral_value = if buy.quote_qty > Decimal::ZERO {
            buy.quote_qty
        } else {
            filled_qty * price
        };

        let loan_amount =
            collateral_value * profile.ltv_max * self.settings.ltv_safety_factor;

        info!(
            level,
            asset = %profile.symbol,
            %loan_amount,
            loan_asset = %self.settings.quote_asset,
            "Borrowing against collateral"
        );
        if let Err(e) = self
            .exchange
            .borrow(&self.settings.quote_asset, loan_amount)
            .await
        {
            // Unwind the buy so the failed level holds no collateral.
            warn!(level, error = %e, "Borrow failed, selling collateral back");
            if let Err(sell_err) = self
                .exchange
                .market_order(&symbol, OrderSide::Sell, filled_qty, SideEffect::AutoRepay)
                .await
            {
                warn!(level, error = %sell_err, "Sell-back also failed, manual cleanup needed");
            }
            return Err(format!("borrow {} {}: {e}", loan_amount, self.settings.quote_asset));
        }

        Ok(Position {
            asset: profile.symbol.clone(),
            symbol,
            level,
            collateral_qty: filled_qty,
            collateral_value,
            entry_price: price,
            loan_amount,
            loan_asset: self.settings.quote_asset.clone(),
            current_ltv: loan_amount / collateral_value,
            order_id: buy.order_id,
            opened_at: chrono::Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
