//! Asset catalog and ranking.
//!
//! The catalog is a static table of conservative per-asset parameters; only
//! the most liquid assets are included for live trading. Ranking orders
//! assets by a volatility-discounted yield score so that safer collateral
//! is used at the earliest (largest) cascade levels.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::types::AssetProfile;

/// An asset paired with its computed ranking score.
#[derive(Debug, Clone, Serialize)]
pub struct RankedAsset {
    pub profile: AssetProfile,
    pub score: Decimal,
}

/// Volatility-discounted yield: `yield_rate / (1 + volatility_factor)`.
///
/// Lower volatility is preferred for live trading, so the same yield on a
/// calmer asset scores higher.
pub fn safety_score(profile: &AssetProfile) -> Decimal {
    profile.yield_rate / (Decimal::ONE + profile.volatility_factor)
}

/// Rank assets by descending safety score, tie-broken by symbol so the
/// ordering is deterministic.
pub fn rank(profiles: &[AssetProfile]) -> Vec<RankedAsset> {
    let mut ranked: Vec<RankedAsset> = profiles
        .iter()
        .map(|p| RankedAsset {
            score: safety_score(p),
            profile: p.clone(),
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.profile.symbol.cmp(&b.profile.symbol))
    });

    ranked
}

/// Conservative asset catalog for live trading.
///
/// Only tier-1 liquidity assets; the LTV caps are deliberately well below
/// what the exchange would allow.
pub fn default_catalog() -> Vec<AssetProfile> {
    vec![
        AssetProfile {
            symbol: "BTC".to_string(),
            ltv_max: dec!(0.50),
            yield_rate: dec!(0.03),
            loan_rate: dec!(0.02),
            volatility_factor: dec!(0.25),
            liquidity_tier: 1,
        },
        AssetProfile {
            symbol: "ETH".to_string(),
            ltv_max: dec!(0.45),
            yield_rate: dec!(0.035),
            loan_rate: dec!(0.022),
            volatility_factor: dec!(0.28),
            liquidity_tier: 1,
        },
        AssetProfile {
            symbol: "BNB".to_string(),
            ltv_max: dec!(0.40),
            yield_rate: dec!(0.04),
            loan_rate: dec!(0.025),
            volatility_factor: dec!(0.30),
            liquidity_tier: 1,
        },
        AssetProfile {
            symbol: "USDC".to_string(),
            ltv_max: dec!(0.85),
            yield_rate: dec!(0.02),
            loan_rate: dec!(0.015),
            volatility_factor: dec!(0.02),
            liquidity_tier: 1,
        },
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_score_discounts_volatility() {
        let catalog = default_catalog();
        let btc = catalog.iter().find(|p| p.symbol == "BTC").unwrap();
        // 0.03 / 1.25 = 0.024
        assert_eq!(safety_score(btc), dec!(0.024));
    }

    #[test]
    fn test_rank_is_descending() {
        let ranked = rank(&default_catalog());
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_rank_default_catalog_order() {
        // BNB: 0.04/1.30 ≈ 0.0308, ETH: 0.035/1.28 ≈ 0.0273,
        // BTC: 0.03/1.25 = 0.024, USDC: 0.02/1.02 ≈ 0.0196
        let ranked = rank(&default_catalog());
        let symbols: Vec<&str> = ranked.iter().map(|r| r.profile.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BNB", "ETH", "BTC", "USDC"]);
    }

    #[test]
    fn test_rank_deterministic_tie_break() {
        let mut catalog = default_catalog();
        // Force two identical scores; symbol order must decide.
        for p in catalog.iter_mut() {
            p.yield_rate = dec!(0.03);
            p.volatility_factor = dec!(0.25);
        }
        let ranked = rank(&catalog);
        let symbols: Vec<&str> = ranked.iter().map(|r| r.profile.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BNB", "BTC", "ETH", "USDC"]);
    }

    #[test]
    fn test_rank_empty() {
        assert!(rank(&[]).is_empty());
    }

    #[test]
    fn test_default_catalog_is_conservative() {
        for profile in default_catalog() {
            assert!(profile.ltv_max <= dec!(0.85));
            assert!(profile.volatility_factor >= Decimal::ZERO);
            assert_eq!(profile.liquidity_tier, 1);
        }
    }
}
