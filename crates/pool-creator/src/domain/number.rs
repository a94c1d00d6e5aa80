//! Exact conversions between human readable decimal numbers and the fixed
//! point integers contracts expect.

use {
    crate::domain::eth,
    alloy::primitives::I256,
    bigdecimal::BigDecimal,
    num::{BigInt, Zero as _},
    std::str::FromStr,
};

#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
pub enum ParseNumberError {
    #[error("{0:?} is not a decimal number")]
    Malformed(String),
    #[error("{0:?} is negative")]
    Negative(String),
    #[error("{value:?} has more than {max} fractional digits")]
    TooPrecise { value: String, max: u32 },
    #[error("{0:?} does not fit in 256 bits")]
    Overflow(String),
}

/// Parses a non-negative decimal string.
pub fn parse_decimal(value: &str) -> Result<BigDecimal, ParseNumberError> {
    let parsed = BigDecimal::from_str(value.trim())
        .map_err(|_| ParseNumberError::Malformed(value.to_owned()))?;
    if parsed < BigDecimal::zero() {
        return Err(ParseNumberError::Negative(value.to_owned()));
    }
    Ok(parsed)
}

/// Converts a human amount like `"1.5"` into raw token units by scaling it
/// with `10^decimals`. Fails instead of rounding when the amount carries more
/// precision than the token supports.
pub fn parse_units(value: &str, decimals: u8) -> Result<eth::U256, ParseNumberError> {
    let parsed = parse_decimal(value)?;
    scale_exact(&parsed, u32::from(decimals)).ok_or_else(|| ParseNumberError::TooPrecise {
        value: value.to_owned(),
        max: u32::from(decimals),
    })
    .and_then(|scaled| to_u256(&scaled, value))
}

/// Converts a percentage (`"0.3"` meaning 0.3%) into an 18-decimal fixed
/// point fraction (`3e15`).
pub fn percent_to_fixed(percent: &BigDecimal) -> Result<eth::U256, ParseNumberError> {
    let raw = percent.to_string();
    let scaled = scale_exact(percent, 16).ok_or(ParseNumberError::TooPrecise {
        value: raw.clone(),
        max: 16,
    })?;
    to_u256(&scaled, &raw)
}

/// Converts a decimal into an unsigned 18-decimal fixed point value,
/// rounding half up past the 18th digit.
pub fn to_fixed_18(value: &BigDecimal) -> Result<eth::U256, ParseNumberError> {
    let scaled = scale_rounded(value, 18);
    to_u256(&scaled, &value.to_string())
}

/// Converts a decimal into a signed fixed point value with `decimals`
/// fractional digits, rounding half up past the last digit.
pub fn to_signed_fixed(value: &BigDecimal, decimals: u32) -> Result<I256, ParseNumberError> {
    let scaled = scale_rounded(value, decimals);
    I256::from_dec_str(&scaled.to_string())
        .map_err(|_| ParseNumberError::Overflow(value.to_string()))
}

/// Formats raw token units back into a human amount.
pub fn format_units(raw: eth::U256, decimals: u8) -> String {
    let int = BigInt::from_str(&raw.to_string()).unwrap_or_default();
    BigDecimal::new(int, i64::from(decimals))
        .normalized()
        .to_string()
}

fn scale_exact(value: &BigDecimal, decimals: u32) -> Option<BigInt> {
    let scaled = value * exp10(decimals);
    let (int, exponent) = scaled.normalized().into_bigint_and_exponent();
    if exponent > 0 {
        return None;
    }
    Some(int * BigInt::from(10).pow(exponent.unsigned_abs() as u32))
}

fn scale_rounded(value: &BigDecimal, decimals: u32) -> BigInt {
    let scaled = (value * exp10(decimals)).round(0);
    let (int, exponent) = scaled.into_bigint_and_exponent();
    if exponent >= 0 {
        int / BigInt::from(10).pow(exponent as u32)
    } else {
        int * BigInt::from(10).pow(exponent.unsigned_abs() as u32)
    }
}

fn exp10(decimals: u32) -> BigDecimal {
    BigDecimal::new(BigInt::from(1), -i64::from(decimals))
}

fn to_u256(value: &BigInt, original: &str) -> Result<eth::U256, ParseNumberError> {
    eth::U256::from_str_radix(&value.to_string(), 10)
        .map_err(|_| ParseNumberError::Overflow(original.to_owned()))
}
