//! Parsing of typed numeric input.

use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("'{0}' is not a number")]
    NotANumber(String),

    #[error("Enter a number greater than zero")]
    NotPositive,

    #[error("Use at most {max} decimal places")]
    TooManyDecimals { max: u32 },
}

/// Parse a strictly positive decimal with at most `max_decimals` significant
/// decimal places. Trailing zeros do not count.
pub fn parse_positive_decimal(raw: &str, max_decimals: u32) -> Result<Decimal, InputError> {
    let trimmed = raw.trim();
    let value =
        Decimal::from_str(trimmed).map_err(|_| InputError::NotANumber(trimmed.to_string()))?;

    if value <= Decimal::ZERO {
        return Err(InputError::NotPositive);
    }

    let value = value.normalize();
    if value.scale() > max_decimals {
        return Err(InputError::TooManyDecimals { max: max_decimals });
    }

    Ok(value)
}
