//! Exchange access with bounded retries.
//!
//! [`ExchangeClient`] wraps an [`ExchangeTransport`] and owns the rules every
//! call follows:
//! - each attempt carries a fresh nonce from the shared [`NonceGenerator`]
//! - each attempt is cut off after the configured call timeout
//! - transient failures are retried according to the [`RetryPolicy`]
//! - rejections are returned immediately, classified by [`RejectReason`]

mod error;
mod nonce;
mod retry;

pub use error::{Classification, ExchangeError, RejectReason, TransportError};
pub use nonce::NonceGenerator;
pub use retry::{BackoffStrategy, RetryPolicy};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{
    AddOrderResult, BalanceResult, CancelResult, OpenOrdersResult, OrderInfo, QueryOrdersResult,
    TickerResult, TradeBalanceResult,
};
use crate::models::{format_decimal, Asset, AssetPair, OrderRequest, OrderType, SubmittedOrder};

/// Most transaction ids `QueryOrders` accepts in one request.
pub const MAX_QUERY_ORDERS: usize = 50;

/// Exchange endpoints used by the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    AddOrder,
    OpenOrders,
    QueryOrders,
    CancelOrder,
    CancelAll,
    Balance,
    TradeBalance,
    Ticker,
}

impl Operation {
    pub fn path(&self) -> &'static str {
        match self {
            Operation::AddOrder => "/0/private/AddOrder",
            Operation::OpenOrders => "/0/private/OpenOrders",
            Operation::QueryOrders => "/0/private/QueryOrders",
            Operation::CancelOrder => "/0/private/CancelOrder",
            Operation::CancelAll => "/0/private/CancelAll",
            Operation::Balance => "/0/private/Balance",
            Operation::TradeBalance => "/0/private/TradeBalance",
            Operation::Ticker => "/0/public/Ticker",
        }
    }

    /// Private endpoints are signed and need a nonce.
    pub fn is_private(&self) -> bool {
        !matches!(self, Operation::Ticker)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::AddOrder => "AddOrder",
            Operation::OpenOrders => "OpenOrders",
            Operation::QueryOrders => "QueryOrders",
            Operation::CancelOrder => "CancelOrder",
            Operation::CancelAll => "CancelAll",
            Operation::Balance => "Balance",
            Operation::TradeBalance => "TradeBalance",
            Operation::Ticker => "Ticker",
        };
        f.write_str(name)
    }
}

/// One request/response exchange with the venue. Implementations do no
/// retrying and no classification.
#[async_trait]
pub trait ExchangeTransport: Send + Sync {
    /// Send a request. `nonce` is 0 for public endpoints.
    async fn send(
        &self,
        operation: Operation,
        params: &[(String, String)],
        nonce: u64,
    ) -> Result<Value, TransportError>;
}

/// Retrying, typed access to the exchange. Cheap to clone; clones share the
/// transport and the nonce counter.
#[derive(Clone)]
pub struct ExchangeClient {
    transport: Arc<dyn ExchangeTransport>,
    nonces: Arc<NonceGenerator>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl ExchangeClient {
    pub fn new(
        transport: Arc<dyn ExchangeTransport>,
        nonces: Arc<NonceGenerator>,
        policy: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            nonces,
            policy,
            call_timeout,
        }
    }

    /// Run one logical call, retrying transient failures.
    async fn call<T: DeserializeOwned>(
        &self,
        operation: Operation,
        params: Vec<(String, String)>,
    ) -> Result<T, ExchangeError> {
        let mut delays = self.policy.delays();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let nonce = if operation.is_private() {
                self.nonces.next()
            } else {
                0
            };

            let sent = tokio::time::timeout(
                self.call_timeout,
                self.transport.send(operation, &params, nonce),
            )
            .await;

            let failure = match sent {
                Ok(Ok(value)) => match serde_json::from_value::<T>(value) {
                    Ok(parsed) => {
                        debug!(operation = %operation, attempt = attempt, "Exchange call succeeded");
                        return Ok(parsed);
                    }
                    Err(e) => TransportError::Malformed(e.to_string()),
                },
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout,
            };

            match failure.classify() {
                Classification::Rejected(kind) => {
                    return Err(ExchangeError::Rejected {
                        operation,
                        kind,
                        reason: failure.to_string(),
                    });
                }
                Classification::Transient if attempt >= self.policy.max_attempts => {
                    return Err(ExchangeError::Transient {
                        operation,
                        attempts: attempt,
                        reason: failure.to_string(),
                    });
                }
                Classification::Transient => {
                    let delay = delays.next_backoff().unwrap_or(Duration::ZERO);
                    warn!(
                        operation = %operation,
                        attempt = attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "Transient exchange failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Place an order.
    ///
    /// `client_order_id` must be the same for every retry of one user intent so
    /// the exchange can recognise a duplicate placement.
    pub async fn add_order(
        &self,
        request: &OrderRequest,
        client_order_id: &str,
    ) -> Result<SubmittedOrder, ExchangeError> {
        let mut params = vec![
            ("pair".to_string(), request.pair.exchange_symbol()),
            ("type".to_string(), request.side.as_str().to_string()),
            ("ordertype".to_string(), request.order_type.as_str().to_string()),
            ("volume".to_string(), format_decimal(request.volume)),
        ];
        if request.order_type == OrderType::Limit {
            if let Some(price) = request.price {
                params.push(("price".to_string(), format_decimal(price)));
            }
        }
        params.push(("cl_ord_id".to_string(), client_order_id.to_string()));

        let result: AddOrderResult = self.call(Operation::AddOrder, params).await?;

        let order_id = result
            .txid
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Transient {
                operation: Operation::AddOrder,
                attempts: 1,
                reason: "order accepted without a transaction id".to_string(),
            })?;

        Ok(SubmittedOrder {
            order_id,
            description: result.descr.order,
            request: request.clone(),
            submitted_at: Utc::now(),
        })
    }

    /// All open orders on the account, by transaction id.
    pub async fn open_orders(&self) -> Result<HashMap<String, OrderInfo>, ExchangeError> {
        let result: OpenOrdersResult = self.call(Operation::OpenOrders, Vec::new()).await?;
        Ok(result.open)
    }

    /// Look up specific orders, open or not. At most [`MAX_QUERY_ORDERS`]
    /// ids per call.
    pub async fn query_orders(&self, order_ids: &[String]) -> Result<QueryOrdersResult, ExchangeError> {
        if order_ids.is_empty() {
            return Ok(QueryOrdersResult::new());
        }
        let params = vec![("txid".to_string(), order_ids.join(","))];
        self.call(Operation::QueryOrders, params).await
    }

    /// Cancel one order. Returns the number of orders canceled.
    pub async fn cancel_order(&self, order_id: &str) -> Result<u32, ExchangeError> {
        let params = vec![("txid".to_string(), order_id.to_string())];
        let result: CancelResult = self.call(Operation::CancelOrder, params).await?;
        Ok(result.count)
    }

    /// Cancel every open order. Returns the number of orders canceled.
    pub async fn cancel_all(&self) -> Result<u32, ExchangeError> {
        let result: CancelResult = self.call(Operation::CancelAll, Vec::new()).await?;
        Ok(result.count)
    }

    pub async fn balance(&self) -> Result<BalanceResult, ExchangeError> {
        self.call(Operation::Balance, Vec::new()).await
    }

    /// Combined balance of all equity, expressed in `asset`.
    pub async fn trade_balance(&self, asset: &Asset) -> Result<Decimal, ExchangeError> {
        let params = vec![("asset".to_string(), asset.to_string())];
        let result: TradeBalanceResult = self.call(Operation::TradeBalance, params).await?;
        Ok(result.tb)
    }

    /// Last traded price for a pair.
    pub async fn ticker(&self, pair: &AssetPair) -> Result<Decimal, ExchangeError> {
        let params = vec![("pair".to_string(), pair.exchange_symbol())];
        let result: TickerResult = self.call(Operation::Ticker, params).await?;

        result
            .iter()
            .find(|(name, _)| pair.matches_exchange_name(name))
            .or_else(|| result.iter().next())
            .and_then(|(_, info)| info.c.first().copied())
            .ok_or_else(|| ExchangeError::Rejected {
                operation: Operation::Ticker,
                kind: RejectReason::UnknownPair,
                reason: format!("no ticker for {}", pair),
            })
    }
}
