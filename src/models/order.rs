//! Order models: drafts assembled by the trade dialogue, submitted orders and
//! orders tracked by the monitor.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::AssetPair;

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            _ => Err(()),
        }
    }
}

/// Kind of order sent to the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "limit" => Ok(OrderType::Limit),
            "market" => Ok(OrderType::Market),
            _ => Err(()),
        }
    }
}

/// The field of an order a user is asked to (re-)enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderField {
    Pair,
    Side,
    Type,
    Volume,
    Price,
}

/// An order being assembled field by field.
///
/// Mutable only while owned by a conversation; becomes an [`OrderRequest`]
/// once every required field is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftOrder {
    pub pair: Option<AssetPair>,
    pub side: Option<OrderSide>,
    pub order_type: Option<OrderType>,
    pub volume: Option<Decimal>,
    pub price: Option<Decimal>,
}

impl DraftOrder {
    /// Freeze the draft into a request, if complete.
    ///
    /// Market orders never carry a price, limit orders must have one.
    pub fn complete(&self) -> Option<OrderRequest> {
        let order_type = self.order_type?;
        let price = match order_type {
            OrderType::Limit => Some(self.price?),
            OrderType::Market => None,
        };

        Some(OrderRequest {
            pair: self.pair.clone()?,
            side: self.side?,
            order_type,
            volume: self.volume?,
            price,
        })
    }

    /// One-line summary of whatever has been collected so far.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(side) = self.side {
            parts.push(side.to_string());
        }
        if let Some(volume) = self.volume {
            parts.push(format_decimal(volume));
        }
        if let Some(pair) = &self.pair {
            parts.push(pair.to_string());
        }
        if let Some(order_type) = self.order_type {
            parts.push(order_type.to_string());
        }
        if let Some(price) = self.price {
            parts.push(format!("@ {}", format_decimal(price)));
        }
        parts.join(" ")
    }
}

/// A complete, immutable order specification ready for validation and submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub pair: AssetPair,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub volume: Decimal,
    pub price: Option<Decimal>,
}

impl fmt::Display for OrderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.side,
            format_decimal(self.volume),
            self.pair,
            self.order_type
        )?;
        if let Some(price) = self.price {
            write!(f, " @ {}", format_decimal(price))?;
        }
        Ok(())
    }
}

/// Exchange acknowledgement of a placed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedOrder {
    pub order_id: String,
    pub description: String,
    pub request: OrderRequest,
    pub submitted_at: DateTime<Utc>,
}

/// Last known status of an order on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Closed,
    Canceled,
}

impl OrderStatus {
    /// Map an exchange status string. `pending` counts as open, `expired`
    /// as canceled.
    pub fn from_exchange(status: &str) -> Self {
        match status.to_lowercase().as_str() {
            "closed" => OrderStatus::Closed,
            "canceled" | "cancelled" | "expired" => OrderStatus::Canceled,
            _ => OrderStatus::Open,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Open)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Open => write!(f, "open"),
            OrderStatus::Closed => write!(f, "closed"),
            OrderStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// An order the monitor has committed to watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedOrder {
    pub order_id: String,
    /// Pair as reported by the exchange (`XBTEUR`) or as submitted (`XBT/EUR`)
    pub pair: String,
    pub side: Option<OrderSide>,
    pub description: String,
    pub submitted_at: DateTime<Utc>,
    pub status: OrderStatus,
}

impl TrackedOrder {
    pub fn from_submission(order: &SubmittedOrder) -> Self {
        Self {
            order_id: order.order_id.clone(),
            pair: order.request.pair.to_string(),
            side: Some(order.request.side),
            description: order.description.clone(),
            submitted_at: order.submitted_at,
            status: OrderStatus::Open,
        }
    }

    /// Move to a terminal status. Returns false if the order already left `Open`;
    /// statuses never regress.
    pub fn transition(&mut self, status: OrderStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }
}

/// Render a decimal without trailing zeros (`0.00200000` -> `0.002`).
pub fn format_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Trim trailing zeros from every numeric token in a free-form string,
/// e.g. an exchange order description `buy 0.00200000 XBTEUR @ limit 20000.0`.
pub fn trim_zeros(text: &str) -> String {
    text.split(' ')
        .map(|token| match Decimal::from_str(token) {
            Ok(value) if token.chars().all(|c| c.is_ascii_digit() || c == '.') => {
                format_decimal(value)
            }
            _ => token.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pair() -> AssetPair {
        "XBT/EUR".parse().unwrap()
    }

    #[test]
    fn test_complete_limit_requires_price() {
        let mut draft = DraftOrder {
            pair: Some(pair()),
            side: Some(OrderSide::Buy),
            order_type: Some(OrderType::Limit),
            volume: Some(dec!(0.5)),
            price: None,
        };
        assert!(draft.complete().is_none());

        draft.price = Some(dec!(20000));
        let request = draft.complete().unwrap();
        assert_eq!(request.price, Some(dec!(20000)));
        assert_eq!(request.to_string(), "buy 0.5 XBT/EUR limit @ 20000");
    }

    #[test]
    fn test_complete_market_drops_price() {
        let draft = DraftOrder {
            pair: Some(pair()),
            side: Some(OrderSide::Sell),
            order_type: Some(OrderType::Market),
            volume: Some(dec!(1)),
            price: Some(dec!(3)),
        };
        assert_eq!(draft.complete().unwrap().price, None);
    }

    #[test]
    fn test_status_never_regresses() {
        let mut order = TrackedOrder {
            order_id: "O1".to_string(),
            pair: "XBTEUR".to_string(),
            side: Some(OrderSide::Buy),
            description: String::new(),
            submitted_at: Utc::now(),
            status: OrderStatus::Open,
        };

        assert!(!order.transition(OrderStatus::Open));
        assert!(order.transition(OrderStatus::Closed));
        assert!(!order.transition(OrderStatus::Canceled));
        assert_eq!(order.status, OrderStatus::Closed);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(OrderStatus::from_exchange("pending"), OrderStatus::Open);
        assert_eq!(OrderStatus::from_exchange("closed"), OrderStatus::Closed);
        assert_eq!(OrderStatus::from_exchange("expired"), OrderStatus::Canceled);
    }

    #[test]
    fn test_trim_zeros() {
        assert_eq!(
            trim_zeros("buy 0.00200000 XBTEUR @ limit 20000.0"),
            "buy 0.002 XBTEUR @ limit 20000"
        );
        assert_eq!(format_decimal(dec!(1.500)), "1.5");
    }
}
