use rust_decimal::Decimal;
use std::str::FromStr;
use crate::types::NisabError;

/// Conversion of caller-supplied amounts into `Decimal`.
///
/// Lets integers, floats and strings be passed where a money value is expected
/// without wrapping them in `dec!()` first.
pub trait IntoMoney {
    fn into_money(self) -> Result<Decimal, NisabError>;
}

impl IntoMoney for Decimal {
    fn into_money(self) -> Result<Decimal, NisabError> {
        Ok(self)
    }
}

macro_rules! impl_into_money_int {
    ($($t:ty),*) => {
        $(
            impl IntoMoney for $t {
                fn into_money(self) -> Result<Decimal, NisabError> {
                    Ok(Decimal::from(self))
                }
            }
        )*
    };
}

impl_into_money_int!(i32, u32, i64, u64, isize, usize);

macro_rules! impl_into_money_float {
    ($($t:ty),*) => {
        $(
            impl IntoMoney for $t {
                fn into_money(self) -> Result<Decimal, NisabError> {
                    Decimal::from_f64_retain(self as f64)
                        .ok_or_else(|| NisabError::invalid_input("amount", format!("invalid float value: {}", self)))
                }
            }
        )*
    };
}

impl_into_money_float!(f32, f64);

impl IntoMoney for &str {
    fn into_money(self) -> Result<Decimal, NisabError> {
        Decimal::from_str(self).map_err(|e| NisabError::invalid_input("amount", format!("invalid decimal string: {}", e)))
    }
}

impl IntoMoney for String {
    fn into_money(self) -> Result<Decimal, NisabError> {
        self.as_str().into_money()
    }
}
