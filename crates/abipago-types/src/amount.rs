//! Human-readable payment amounts and their raw token-unit scaling.
//!
//! Invoice URIs and merchant profiles carry decimal display amounts
//! (`"3.50"`); the chain wants raw units scaled by the token's decimals
//! (`3_500_000` for 6-decimal USDC). This module converts both ways.

use alloy_primitives::U256;
use regex::Regex;
use rust_decimal::Decimal;
use std::fmt;
use std::fmt::Display;
use std::ops::Mul;
use std::str::FromStr;

/// A price-like numeric value in human-readable currency format.
/// Accepts strings like "$0.01", "1,000", "€20", or raw numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct MoneyAmount(pub Decimal);

impl MoneyAmount {
    /// Number of digits after the decimal point in the original input.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// Absolute mantissa of the decimal value as an unsigned integer.
    ///
    /// For example, the mantissa of `12.34` is `1234`. Used when scaling
    /// values to match token decimal places.
    pub fn mantissa(&self) -> u128 {
        self.0.mantissa().unsigned_abs()
    }

    /// Scales this amount into raw token units for a token with the given
    /// number of decimals.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyAmountParseError::WrongPrecision`] if the amount has
    /// more fractional digits than the token supports.
    pub fn to_token_units(&self, decimals: u8) -> Result<U256, MoneyAmountParseError> {
        let scale = self.scale();
        let token_scale = decimals as u32;
        if scale > token_scale {
            return Err(MoneyAmountParseError::WrongPrecision {
                money: scale,
                token: token_scale,
            });
        }
        let multiplier = U256::from(10).pow(U256::from(token_scale - scale));
        Ok(U256::from(self.mantissa()).mul(multiplier))
    }
}

/// Formats raw token units as a decimal display string, trimming trailing
/// fractional zeros (`3_500_000` with 6 decimals becomes `"3.5"`).
pub fn format_units(amount: U256, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let divisor = U256::from(10).pow(U256::from(decimals as u64));
    let whole = amount / divisor;
    let frac = amount % divisor;
    if frac.is_zero() {
        return whole.to_string();
    }
    let frac = format!("{:0>width$}", frac, width = decimals as usize);
    let frac = frac.trim_end_matches('0');
    format!("{whole}.{frac}")
}

#[derive(Debug, thiserror::Error)]
pub enum MoneyAmountParseError {
    #[error("Invalid number format")]
    InvalidFormat,
    #[error(
        "Amount must be between {} and {}",
        money_amount::MIN_STR,
        money_amount::MAX_STR
    )]
    OutOfRange,
    #[error("Negative value is not allowed")]
    Negative,
    #[error("Too big of a precision: {money} vs {token} on token")]
    WrongPrecision { money: u32, token: u32 },
}

mod money_amount {
    use super::*;
    use once_cell::sync::Lazy;

    pub const MIN_STR: &str = "0.000000001";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: Lazy<Decimal> =
        Lazy::new(|| Decimal::from_str(MIN_STR).expect("valid decimal"));
    pub static MAX: Lazy<Decimal> =
        Lazy::new(|| Decimal::from_str(MAX_STR).expect("valid decimal"));
    pub static NON_NUMERIC: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[^\d\.\-]+").expect("valid regex"));
}

impl MoneyAmount {
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        // Remove anything that isn't digit, dot, minus
        let cleaned = money_amount::NON_NUMERIC.replace_all(input, "").to_string();

        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;

        if parsed.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }

        if parsed < *money_amount::MIN || parsed > *money_amount::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }

        Ok(MoneyAmount(parsed))
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MoneyAmount::from_str(value)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
