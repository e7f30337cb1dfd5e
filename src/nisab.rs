//! # Nisab Threshold
//!
//! The Nisab is denominated in a weight of gold or silver. Converting it into a
//! currency threshold is a single multiplication by the current unit price.
//!
//! - Gold: 85 grams (20 Mithqal)
//! - Silver: 595 grams (200 Dirham)

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Weight of gold, in grams, defining the gold Nisab.
pub const GOLD_NISAB_GRAMS: Decimal = dec!(85);
/// Weight of silver, in grams, defining the silver Nisab.
pub const SILVER_NISAB_GRAMS: Decimal = dec!(595);

/// A precious metal whose market price the oracle tracks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    Serialize, Deserialize, Display, EnumString, AsRefStr, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "snake_case")]
pub enum Metal {
    Gold,
    Silver,
}

/// The metal a Nisab threshold is measured against. Locked for a record at Hawl start.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default,
    Serialize, Deserialize, Display, EnumString, AsRefStr, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "snake_case")]
pub enum NisabBasis {
    #[default]
    Gold,
    Silver,
}

impl NisabBasis {
    pub fn metal(&self) -> Metal {
        match self {
            NisabBasis::Gold => Metal::Gold,
            NisabBasis::Silver => Metal::Silver,
        }
    }

    /// Grams of metal making up the Nisab for this basis.
    pub fn weight_grams(&self) -> Decimal {
        match self {
            NisabBasis::Gold => GOLD_NISAB_GRAMS,
            NisabBasis::Silver => SILVER_NISAB_GRAMS,
        }
    }
}

/// Converts a per-gram metal price into the currency Nisab threshold for `basis`,
/// rounded to the minor currency unit.
pub fn threshold(basis: NisabBasis, price_per_gram: Decimal) -> Decimal {
    (basis.weight_grams() * price_per_gram).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gold_threshold() {
        // 85g * 65/g = 5525
        assert_eq!(threshold(NisabBasis::Gold, dec!(65)), dec!(5525));
    }

    #[test]
    fn test_silver_threshold() {
        // 595g * 0.85/g = 505.75
        assert_eq!(threshold(NisabBasis::Silver, dec!(0.85)), dec!(505.75));
    }

    #[test]
    fn test_threshold_rounded_to_cents() {
        let price = dec!(5000) / GOLD_NISAB_GRAMS;
        assert_eq!(threshold(NisabBasis::Gold, price), dec!(5000));
    }

    #[test]
    fn test_basis_metal_mapping() {
        assert_eq!(NisabBasis::Gold.metal(), Metal::Gold);
        assert_eq!(NisabBasis::Silver.metal(), Metal::Silver);
        assert_eq!("silver".parse::<NisabBasis>().unwrap(), NisabBasis::Silver);
    }
}
