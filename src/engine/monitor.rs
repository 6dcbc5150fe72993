//! Position monitor.
//!
//! Periodically re-marks every open position at fresh prices, folds the
//! exchange-reported margin level into the ledger, and applies the risk
//! policy: log warnings, partially repay loans when margin runs low, and
//! liquidate the whole cascade when a position breaches the emergency LTV
//! or the margin level turns critical. A graceful stop also unwinds every
//! position before the loop exits.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::exchange::{MarginExchange, OrderSide, SideEffect};
use crate::storage;
use crate::strategy::risk::{MarginHealth, RiskPolicy};

use super::PortfolioState;

/// Polling cadence, derived from `[bot]` config.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub error_backoff: Duration,
}

/// Why the monitor loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Operator-requested stop; positions were unwound in order.
    Stopped,
    /// Emergency liquidation fired.
    Emergency,
}

/// What one monitoring pass concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassVerdict {
    Nominal,
    Emergency,
}

/// Monitor loop. Runs until stopped or an emergency liquidation fires.
pub async fn run(
    exchange: &dyn MarginExchange,
    policy: &RiskPolicy,
    state: &PortfolioState,
    settings: &MonitorSettings,
    state_file: &str,
    mut stop_rx: watch::Receiver<bool>,
) -> MonitorOutcome {
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(interval_secs = settings.interval.as_secs(), "Position monitor started");

    loop {
        tokio::select! {
            biased;

            changed = stop_rx.changed() => {
                // A dropped sender means the controller is gone; unwind too.
                if changed.is_err() || *stop_rx.borrow() {
                    info!("Stop signal received, unwinding all positions");
                    liquidate_all(exchange, state).await;
                    persist(state, state_file).await;
                    return MonitorOutcome::Stopped;
                }
            }

            _ = ticker.tick() => {
                match monitor_pass(exchange, policy, state).await {
                    Ok(PassVerdict::Emergency) => {
                        error!("Emergency threshold breached, liquidating cascade");
                        liquidate_all(exchange, state).await;
                        persist(state, state_file).await;
                        return MonitorOutcome::Emergency;
                    }
                    Ok(PassVerdict::Nominal) => {
                        persist(state, state_file).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "Monitor pass failed, backing off");
                        // The backoff must not delay a stop request.
                        tokio::select! {
                            biased;

                            changed = stop_rx.changed() => {
                                if changed.is_err() || *stop_rx.borrow() {
                                    info!("Stop signal received, unwinding all positions");
                                    liquidate_all(exchange, state).await;
                                    persist(state, state_file).await;
                                    return MonitorOutcome::Stopped;
                                }
                            }

                            _ = tokio::time::sleep(settings.error_backoff) => {}
                        }
                    }
                }
            }
        }
    }
}

/// One monitoring pass: refresh marks, assess risk, reduce if needed.
async fn monitor_pass(
    exchange: &dyn MarginExchange,
    policy: &RiskPolicy,
    state: &PortfolioState,
) -> Result<PassVerdict> {
    let account = exchange
        .account()
        .await
        .context("margin account query failed")?;
    state.ledger.write().await.margin_level = Some(account.margin_level);

    // Work on a copy so no lock is held across exchange calls.
    let mut positions = state.positions.read().await.clone();
    if positions.is_empty() {
        return Ok(PassVerdict::Nominal);
    }

    let prices = fetch_prices(exchange, &positions).await;
    for position in positions.iter_mut() {
        if let Some(price) = prices.get(&position.symbol) {
            let ltv = position.mark_to_price(*price);
            position.collateral_value = position.value_at(*price);
            info!(
                asset = %position.asset,
                level = position.level,
                %price,
                ltv = %ltv.round_dp(4),
                "Position marked"
            );
        } else {
            warn!(symbol = %position.symbol, "No fresh price, keeping previous mark");
        }
    }

    let health = policy.assess_margin(account.margin_level);
    let breached: Vec<String> = policy
        .breached(&positions)
        .iter()
        .map(|p| p.asset.clone())
        .collect();

    if health == MarginHealth::Critical || !breached.is_empty() {
        error!(
            margin_level = %account.margin_level,
            breached = ?breached,
            "Risk limits exceeded"
        );
        *state.positions.write().await = positions;
        return Ok(PassVerdict::Emergency);
    }

    if health == MarginHealth::Low {
        warn!(margin_level = %account.margin_level, "Margin level low, reducing exposure");
        reduce_exposure(exchange, policy, state, &mut positions).await;
    }

    for position in policy.warnings(&positions) {
        warn!(
            asset = %position.asset,
            ltv = %position.current_ltv.round_dp(4),
            "Position LTV in warning band"
        );
    }

    *state.positions.write().await = positions;
    state.touch().await;
    Ok(PassVerdict::Nominal)
}

/// Fetch fresh prices for all position symbols concurrently.
async fn fetch_prices(
    exchange: &dyn MarginExchange,
    positions: &[crate::types::Position],
) -> HashMap<String, Decimal> {
    let mut symbols: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
    symbols.dedup();

    let lookups = symbols.iter().map(|s| exchange.symbol_price(s));
    let results = futures::future::join_all(lookups).await;

    let mut prices = HashMap::new();
    for (symbol, result) in symbols.into_iter().zip(results) {
        match result {
            Ok(price) if price > Decimal::ZERO => {
                prices.insert(symbol, price);
            }
            Ok(price) => warn!(%symbol, %price, "Ignoring non-positive price"),
            Err(e) => warn!(%symbol, error = %e, "Price refresh failed"),
        }
    }
    prices
}

/// Partially repay the riskiest loans to lift the margin level.
async fn reduce_exposure(
    exchange: &dyn MarginExchange,
    policy: &RiskPolicy,
    state: &PortfolioState,
    positions: &mut [crate::types::Position],
) {
    for idx in policy.reduction_candidates(positions) {
        let position = &mut positions[idx];
        let amount = policy.repay_amount(position.loan_amount);
        if amount <= Decimal::ZERO {
            continue;
        }

        match exchange.repay(&position.loan_asset, amount).await {
            Ok(receipt) => {
                position.loan_amount -= amount;
                if position.collateral_value > Decimal::ZERO {
                    position.current_ltv = position.loan_amount / position.collateral_value;
                }
                state.ledger.write().await.leveraged_capital -= amount;
                info!(
                    asset = %position.asset,
                    repaid = %amount,
                    remaining_loan = %position.loan_amount,
                    tran_id = receipt.tran_id,
                    "Loan partially repaid"
                );
            }
            Err(e) => {
                warn!(asset = %position.asset, error = %e, "Partial repay failed");
            }
        }
    }
}

/// Unwind every position: repay its loan, then sell the collateral with
/// AUTO_REPAY to clear anything outstanding. Failures are logged and the
/// unwind continues; a stuck order must not strand the remaining positions.
pub async fn liquidate_all(exchange: &dyn MarginExchange, state: &PortfolioState) {
    let positions = state.positions.read().await.clone();
    if positions.is_empty() {
        return;
    }
    warn!(count = positions.len(), "Liquidating all positions");

    for position in &positions {
        if position.loan_amount > Decimal::ZERO {
            if let Err(e) = exchange
                .repay(&position.loan_asset, position.loan_amount)
                .await
            {
                warn!(asset = %position.asset, error = %e, "Repay during liquidation failed");
            }
        }

        match exchange
            .market_order(
                &position.symbol,
                OrderSide::Sell,
                position.collateral_qty,
                SideEffect::AutoRepay,
            )
            .await
        {
            Ok(receipt) => info!(%receipt, "Collateral sold"),
            Err(e) => {
                error!(asset = %position.asset, error = %e, "Sell during liquidation failed")
            }
        }
    }

    state.positions.write().await.clear();
    state.ledger.write().await.clear();
    state.touch().await;
    info!("Liquidation complete");
}

/// Best-effort snapshot write.
async fn persist(state: &PortfolioState, state_file: &str) {
    let snapshot = state.to_snapshot().await;
    if let Err(e) = storage::save_snapshot(&snapshot, state_file) {
        error!(error = %e, "Failed to save snapshot");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
