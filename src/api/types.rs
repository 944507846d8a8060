//! Kraken REST response types.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;

/// Every Kraken response is wrapped in `{"error": [...], "result": ...}`.
#[derive(Debug, Clone, Deserialize)]
pub struct KrakenResponse<T> {
    #[serde(default)]
    pub error: Vec<String>,
    pub result: Option<T>,
}

/// Result of `AddOrder`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddOrderResult {
    pub descr: AddOrderDescr,
    #[serde(default)]
    pub txid: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddOrderDescr {
    pub order: String,
}

/// Order description as reported by `OpenOrders` and `QueryOrders`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderDescr {
    #[serde(default)]
    pub pair: String,
    /// Side (`buy` / `sell`)
    #[serde(rename = "type", default)]
    pub side: String,
    /// Human readable summary, e.g. `buy 0.00200000 XBTEUR @ limit 20000.0`
    #[serde(default)]
    pub order: String,
}

/// One order in an `OpenOrders` or `QueryOrders` result.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderInfo {
    pub status: String,
    #[serde(default)]
    pub opentm: Option<f64>,
    #[serde(default)]
    pub descr: OrderDescr,
    #[serde(default)]
    pub vol: Option<Decimal>,
    /// Volume executed so far
    #[serde(default)]
    pub vol_exec: Option<Decimal>,
}

/// Result of `OpenOrders`.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrdersResult {
    #[serde(default)]
    pub open: HashMap<String, OrderInfo>,
}

/// Result of `QueryOrders`: txid -> order.
pub type QueryOrdersResult = HashMap<String, OrderInfo>;

/// Result of `CancelOrder` / `CancelAll`.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelResult {
    pub count: u32,
}

/// Result of `Balance`: asset -> amount.
pub type BalanceResult = HashMap<String, Decimal>;

/// Result of `TradeBalance`; `tb` is the combined balance of all equity.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeBalanceResult {
    pub tb: Decimal,
}

/// Ticker entry; `c` is `[last trade price, lot volume]`.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerInfo {
    pub c: Vec<Decimal>,
}

/// Result of `Ticker`: exchange pair name -> ticker.
pub type TickerResult = HashMap<String, TickerInfo>;
