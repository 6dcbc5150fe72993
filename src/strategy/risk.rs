//! Risk policy.
//!
//! Pure decision logic over position LTVs and the exchange-reported margin
//! level: when to warn, when to partially repay loans, and when to pull the
//! emergency cord. The monitor loop applies these decisions; nothing in
//! here talks to the exchange.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::RiskConfig;
use crate::types::{BotError, Position};

/// Margin account health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarginHealth {
    Healthy,
    /// Approaching margin call — reduce exposure.
    Low,
    /// Liquidate everything now.
    Critical,
}

/// Thresholds and knobs governing defensive actions.
#[derive(Debug, Clone)]
pub struct RiskPolicy {
    pub emergency_ltv: Decimal,
    pub warn_ltv: Decimal,
    pub min_margin_level: Decimal,
    pub critical_margin_level: Decimal,
    pub reduce_fraction: Decimal,
    pub reduce_top_n: usize,
    pub max_start_capital: Decimal,
}

impl RiskPolicy {
    pub fn from_config(cfg: &RiskConfig) -> Self {
        Self {
            emergency_ltv: cfg.emergency_ltv,
            warn_ltv: cfg.warn_ltv,
            min_margin_level: cfg.min_margin_level,
            critical_margin_level: cfg.critical_margin_level,
            reduce_fraction: cfg.reduce_fraction,
            reduce_top_n: cfg.reduce_top_n,
            max_start_capital: cfg.max_start_capital,
        }
    }

    /// Classify the exchange-reported margin level.
    pub fn assess_margin(&self, margin_level: Decimal) -> MarginHealth {
        if margin_level < self.critical_margin_level {
            MarginHealth::Critical
        } else if margin_level < self.min_margin_level {
            MarginHealth::Low
        } else {
            MarginHealth::Healthy
        }
    }

    /// Positions whose LTV breaches the emergency threshold.
    pub fn breached<'a>(&self, positions: &'a [Position]) -> Vec<&'a Position> {
        positions
            .iter()
            .filter(|p| p.is_breached(self.emergency_ltv))
            .collect()
    }

    /// Positions in the warning band (above warn, at or below emergency).
    pub fn warnings<'a>(&self, positions: &'a [Position]) -> Vec<&'a Position> {
        positions
            .iter()
            .filter(|p| p.current_ltv > self.warn_ltv && !p.is_breached(self.emergency_ltv))
            .collect()
    }

    /// Indices of the `reduce_top_n` riskiest positions (highest LTV first),
    /// the ones to partially repay when margin runs low.
    pub fn reduction_candidates(&self, positions: &[Position]) -> Vec<usize> {
        let mut indexed: Vec<(usize, Decimal)> = positions
            .iter()
            .enumerate()
            .map(|(i, p)| (i, p.current_ltv))
            .collect();
        indexed.sort_by(|a, b| b.1.cmp(&a.1));
        indexed
            .into_iter()
            .take(self.reduce_top_n)
            .map(|(i, _)| i)
            .collect()
    }

    /// How much of a loan to repay when reducing a position.
    pub fn repay_amount(&self, loan_amount: Decimal) -> Decimal {
        loan_amount * self.reduce_fraction
    }

    /// Validate operator-supplied starting capital against the policy cap.
    pub fn validate_capital(&self, capital: Decimal) -> Result<(), BotError> {
        if capital <= Decimal::ZERO {
            return Err(BotError::InvalidCapital(format!(
                "capital must be positive, got {capital}"
            )));
        }
        if capital > self.max_start_capital {
            return Err(BotError::InvalidCapital(format!(
                "capital {capital} exceeds the configured cap of {}",
                self.max_start_capital
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
