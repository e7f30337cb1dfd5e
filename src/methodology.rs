//! # Calculation Methodologies
//!
//! Each methodology fixes two things: the Nisab basis (gold or silver weight) and
//! whether near-term liabilities are deducted from wealth before the threshold
//! comparison. The rate never varies between methodologies.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::nisab::NisabBasis;

/// Zakat rate on monetary wealth (2.5%).
pub const ZAKAT_RATE: Decimal = dec!(0.025);

/// Named rule set used to compute a record's figures.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default,
    Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "snake_case")]
pub enum Methodology {
    /// AAOIFI standard.
    #[default]
    Standard,
    Hanafi,
    Shafii,
    Maliki,
    Hanbali,
}

impl Methodology {
    pub fn strategy(&self) -> Box<dyn MethodologyStrategy> {
        match self {
            Methodology::Standard => Box::new(StandardStrategy),
            Methodology::Hanafi => Box::new(HanafiStrategy),
            Methodology::Shafii => Box::new(ShafiiStrategy),
            Methodology::Maliki => Box::new(MalikiStrategy),
            Methodology::Hanbali => Box::new(HanbaliStrategy),
        }
    }

    pub fn rules(&self) -> MethodologyRules {
        self.strategy().get_rules()
    }

    pub fn nisab_basis(&self) -> NisabBasis {
        self.rules().nisab_basis
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodologyRules {
    pub nisab_basis: NisabBasis,
    pub deducts_liabilities: bool,
}

impl Default for MethodologyRules {
    fn default() -> Self {
        Self {
            nisab_basis: NisabBasis::Gold,
            deducts_liabilities: true,
        }
    }
}

pub trait MethodologyStrategy {
    fn get_rules(&self) -> MethodologyRules;
}

pub struct StandardStrategy;
impl MethodologyStrategy for StandardStrategy {
    fn get_rules(&self) -> MethodologyRules {
        MethodologyRules::default()
    }
}

pub struct HanafiStrategy;
impl MethodologyStrategy for HanafiStrategy {
    fn get_rules(&self) -> MethodologyRules {
        MethodologyRules {
            nisab_basis: NisabBasis::Silver, // lower threshold, more beneficial to recipients
            deducts_liabilities: true,
        }
    }
}

pub struct ShafiiStrategy;
impl MethodologyStrategy for ShafiiStrategy {
    fn get_rules(&self) -> MethodologyRules {
        MethodologyRules {
            nisab_basis: NisabBasis::Gold,
            deducts_liabilities: false, // debts do not reduce the zakatable base
        }
    }
}

pub struct MalikiStrategy;
impl MethodologyStrategy for MalikiStrategy {
    fn get_rules(&self) -> MethodologyRules {
        MethodologyRules {
            nisab_basis: NisabBasis::Gold,
            deducts_liabilities: true,
        }
    }
}

pub struct HanbaliStrategy;
impl MethodologyStrategy for HanbaliStrategy {
    fn get_rules(&self) -> MethodologyRules {
        MethodologyRules {
            nisab_basis: NisabBasis::Silver,
            deducts_liabilities: true,
        }
    }
}

/// Raw figures handed to [`calculate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodologyInput {
    pub wealth: Decimal,
    pub liabilities: Decimal,
    pub methodology: Methodology,
    pub nisab_threshold: Decimal,
}

/// Outcome of applying a methodology to raw figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MethodologyResult {
    /// Liabilities the methodology recognizes (zero when it does not deduct).
    pub deductible_liabilities: Decimal,
    pub zakatable_wealth: Decimal,
    pub amount_due: Decimal,
    pub nisab_basis: NisabBasis,
    pub nisab_threshold: Decimal,
    pub is_above_nisab: bool,
}

/// Computes zakatable wealth and the amount due.
///
/// Total and deterministic: negative inputs are clamped to zero rather than
/// rejected, and zakatable wealth is floored at zero.
pub fn calculate(input: &MethodologyInput) -> MethodologyResult {
    let rules = input.methodology.rules();
    let wealth = input.wealth.max(Decimal::ZERO);
    let threshold = input.nisab_threshold.max(Decimal::ZERO);

    let deductible_liabilities = if rules.deducts_liabilities {
        input.liabilities.max(Decimal::ZERO)
    } else {
        Decimal::ZERO
    };

    let zakatable_wealth = (wealth - deductible_liabilities).max(Decimal::ZERO);
    let is_above_nisab = zakatable_wealth >= threshold && zakatable_wealth > Decimal::ZERO;
    let amount_due = if is_above_nisab {
        zakatable_wealth * ZAKAT_RATE
    } else {
        Decimal::ZERO
    };

    MethodologyResult {
        deductible_liabilities,
        zakatable_wealth,
        amount_due,
        nisab_basis: rules.nisab_basis,
        nisab_threshold: threshold,
        is_above_nisab,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn input(wealth: Decimal, liabilities: Decimal, methodology: Methodology) -> MethodologyInput {
        MethodologyInput {
            wealth,
            liabilities,
            methodology,
            nisab_threshold: dec!(5000),
        }
    }

    #[test]
    fn test_standard_due() {
        let res = calculate(&input(dec!(12000), dec!(2000), Methodology::Standard));
        assert_eq!(res.zakatable_wealth, dec!(10000));
        assert_eq!(res.amount_due, dec!(250));
        assert!(res.is_above_nisab);
    }

    #[test]
    fn test_below_threshold_is_zero() {
        let res = calculate(&input(dec!(6000), dec!(2000), Methodology::Maliki));
        assert_eq!(res.zakatable_wealth, dec!(4000));
        assert_eq!(res.amount_due, Decimal::ZERO);
        assert!(!res.is_above_nisab);
    }

    #[test]
    fn test_exactly_at_threshold_is_payable() {
        let res = calculate(&input(dec!(5000), Decimal::ZERO, Methodology::Standard));
        assert_eq!(res.amount_due, dec!(125));
    }

    #[test]
    fn test_shafii_ignores_liabilities() {
        let res = calculate(&input(dec!(6000), dec!(2000), Methodology::Shafii));
        assert_eq!(res.deductible_liabilities, Decimal::ZERO);
        assert_eq!(res.zakatable_wealth, dec!(6000));
        assert_eq!(res.amount_due, dec!(150));
    }

    #[test]
    fn test_liabilities_exceeding_wealth_floor_at_zero() {
        let res = calculate(&input(dec!(1000), dec!(3000), Methodology::Hanafi));
        assert_eq!(res.zakatable_wealth, Decimal::ZERO);
        assert_eq!(res.amount_due, Decimal::ZERO);
    }

    #[test]
    fn test_rate_identical_across_methodologies() {
        for m in Methodology::iter() {
            let res = calculate(&input(dec!(20000), Decimal::ZERO, m));
            assert_eq!(res.amount_due, dec!(500), "methodology {m}");
        }
    }

    #[test]
    fn test_zakatable_invariant_over_grid() {
        let values = [dec!(0), dec!(1), dec!(4999.99), dec!(5000), dec!(7500), dec!(100000)];
        for m in Methodology::iter() {
            for w in values {
                for l in values {
                    let res = calculate(&input(w, l, m));
                    assert_eq!(res.zakatable_wealth, (w - res.deductible_liabilities).max(Decimal::ZERO));
                    if res.zakatable_wealth >= dec!(5000) {
                        assert_eq!(res.amount_due, res.zakatable_wealth * ZAKAT_RATE);
                    } else {
                        assert_eq!(res.amount_due, Decimal::ZERO);
                    }
                }
            }
        }
    }

    #[test]
    fn test_bases() {
        assert_eq!(Methodology::Hanafi.nisab_basis(), NisabBasis::Silver);
        assert_eq!(Methodology::Standard.nisab_basis(), NisabBasis::Gold);
    }
}
