//! Pure checks of an order against exchange-imposed constraints.
//!
//! Every failure names the rule it violated and the field the user should
//! re-enter, so the dialogue can ask for that field only.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{format_decimal, AssetPair, OrderField, OrderRequest, OrderType};

use super::ExchangeRules;

/// A violated order rule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Pair {0} is not enabled for trading")]
    UnknownPair(AssetPair),

    #[error("Volume must be greater than zero")]
    NonPositiveVolume,

    #[error("Volume {volume} is below the minimum of {minimum} for {pair}")]
    BelowMinimumVolume {
        pair: AssetPair,
        minimum: String,
        volume: String,
    },

    #[error("A limit order needs a price")]
    MissingPrice,

    #[error("Price must be greater than zero")]
    NonPositivePrice,

    #[error("A market order cannot carry a price")]
    PriceOnMarketOrder,
}

impl ValidationError {
    /// The field the user has to re-enter to fix this violation.
    pub fn field(&self) -> OrderField {
        match self {
            ValidationError::UnknownPair(_) => OrderField::Pair,
            ValidationError::NonPositiveVolume | ValidationError::BelowMinimumVolume { .. } => {
                OrderField::Volume
            }
            ValidationError::MissingPrice | ValidationError::NonPositivePrice => OrderField::Price,
            ValidationError::PriceOnMarketOrder => OrderField::Type,
        }
    }
}

/// Validate a complete order.
///
/// Accepts iff the pair is allow-listed, the volume is positive and at least
/// the pair's minimum, market orders carry no price and limit orders carry a
/// positive one. Rules are checked in field order so the first reported
/// violation is the earliest field the user needs to revisit.
pub fn validate(order: &OrderRequest, rules: &ExchangeRules) -> Result<(), ValidationError> {
    if !rules.is_allowed(&order.pair) {
        return Err(ValidationError::UnknownPair(order.pair.clone()));
    }
    validate_volume(&order.pair, order.volume, rules)?;
    validate_price(order.order_type, order.price)?;
    Ok(())
}

/// Check a volume for a pair, as soon as the user enters it.
pub fn validate_volume(
    pair: &AssetPair,
    volume: Decimal,
    rules: &ExchangeRules,
) -> Result<(), ValidationError> {
    if volume <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveVolume);
    }

    let minimum = rules.minimum_volume(pair);
    if volume < minimum {
        return Err(ValidationError::BelowMinimumVolume {
            pair: pair.clone(),
            minimum: format_decimal(minimum),
            volume: format_decimal(volume),
        });
    }

    Ok(())
}

/// Check the price against the order type.
pub fn validate_price(order_type: OrderType, price: Option<Decimal>) -> Result<(), ValidationError> {
    match (order_type, price) {
        (OrderType::Market, Some(_)) => Err(ValidationError::PriceOnMarketOrder),
        (OrderType::Market, None) => Ok(()),
        (OrderType::Limit, None) => Err(ValidationError::MissingPrice),
        (OrderType::Limit, Some(p)) if p <= Decimal::ZERO => Err(ValidationError::NonPositivePrice),
        (OrderType::Limit, Some(_)) => Ok(()),
    }
}
