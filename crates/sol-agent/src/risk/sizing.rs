//! Position sizing.
//!
//! Pure given its inputs: no I/O, deterministic, unit-testable in
//! isolation. The stateful allocation multiplier is owned by the risk
//! manager and passed in.

use rust_decimal::Decimal;

use agent_common::RiskLevel;

use crate::config::TradingConfig;

/// Base sizing fraction for a risk level.
pub fn base_position_pct(risk_level: RiskLevel, trading: &TradingConfig) -> Decimal {
    match risk_level {
        RiskLevel::High => trading.high_risk_position_pct,
        RiskLevel::Medium => trading.medium_risk_position_pct,
        RiskLevel::Low => trading.low_risk_position_pct,
    }
}

/// Size a position for one opportunity.
///
/// Base percentage by risk level (high 5%, medium 10%, low 20% by default),
/// capped at the absolute ceiling (10% of balance by default), scaled by
/// the per-strategy allocation multiplier, and clamped so the result never
/// exceeds the opportunity's originally requested amount.
pub fn position_size(
    requested_amount: Decimal,
    risk_level: RiskLevel,
    balance: Decimal,
    allocation_multiplier: Decimal,
    trading: &TradingConfig,
) -> Decimal {
    if balance <= Decimal::ZERO || requested_amount <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let pct = base_position_pct(risk_level, trading).min(trading.max_position_pct);
    let sized = balance * pct * allocation_multiplier;
    sized.min(requested_amount).max(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trading() -> TradingConfig {
        TradingConfig::default()
    }

    #[test]
    fn test_medium_risk_clamped_to_requested_amount() {
        // balance 10, medium 10% -> 1.0, requested 1.0 -> 1.0
        let size = position_size(dec!(1.0), RiskLevel::Medium, dec!(10), dec!(1.0), &trading());
        assert_eq!(size, dec!(1.0));
    }

    #[test]
    fn test_medium_risk_small_balance() {
        // balance 0.5, medium 10% -> 0.05
        let size = position_size(dec!(1.0), RiskLevel::Medium, dec!(0.5), dec!(1.0), &trading());
        assert_eq!(size, dec!(0.05));
    }

    #[test]
    fn test_low_risk_capped_at_absolute_ceiling() {
        // low base 20% but absolute ceiling 10% wins
        let size = position_size(dec!(100), RiskLevel::Low, dec!(10), dec!(1.0), &trading());
        assert_eq!(size, dec!(1.0));
    }

    #[test]
    fn test_high_risk_uses_smaller_base() {
        let size = position_size(dec!(100), RiskLevel::High, dec!(10), dec!(1.0), &trading());
        assert_eq!(size, dec!(0.50));
    }

    #[test]
    fn test_multiplier_scales_down() {
        let size = position_size(dec!(100), RiskLevel::Medium, dec!(10), dec!(0.5), &trading());
        assert_eq!(size, dec!(0.50));
    }

    #[test]
    fn test_upper_bound_property() {
        // For every risk level: size <= min(ceiling, base) * balance * mult
        // and size <= requested.
        let balance = dec!(7.3);
        let requested = dec!(0.4);
        let mult = dec!(0.8);
        for level in [RiskLevel::High, RiskLevel::Medium, RiskLevel::Low] {
            let size = position_size(requested, level, balance, mult, &trading());
            let bound = base_position_pct(level, &trading())
                .min(trading().max_position_pct)
                * balance
                * mult;
            assert!(size <= bound);
            assert!(size <= requested);
            assert!(size >= Decimal::ZERO);
        }
    }

    #[test]
    fn test_degenerate_inputs() {
        let t = trading();
        assert_eq!(position_size(dec!(1), RiskLevel::Low, dec!(0), dec!(1), &t), dec!(0));
        assert_eq!(position_size(dec!(0), RiskLevel::Low, dec!(10), dec!(1), &t), dec!(0));
        assert_eq!(position_size(dec!(1), RiskLevel::Low, dec!(-5), dec!(1), &t), dec!(0));
    }
}
