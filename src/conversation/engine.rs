//! The trade dialogue state machine.
//!
//! Steps: pair, side, type, volume, price (limit orders only), optional
//! confirmation, submission. Invalid input repeats the current step and keeps
//! everything entered so far. Every user has at most one live conversation;
//! inputs from one user are handled one at a time, including the exchange
//! call made on submission.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chat::{Reply, UserId};
use crate::exchange::{ExchangeClient, ExchangeError, RejectReason};
use crate::models::{
    format_decimal, trim_zeros, OrderRequest, OrderSide, OrderType, TrackedOrder,
};
use crate::monitor::OrderMonitor;
use crate::trading::{validator, ExchangeRules};

use super::input::parse_positive_decimal;
use super::state::{ConversationState, ConversationStep};

/// What `/trade` does while a trade is already in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    /// Discard the current trade and start over
    #[default]
    Restart,
    /// Keep the current trade and repeat its question
    Resume,
}

impl FromStr for RestartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "restart" => Ok(RestartPolicy::Restart),
            "resume" => Ok(RestartPolicy::Resume),
            other => Err(format!("unknown restart policy '{}' (use restart or resume)", other)),
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::Restart => write!(f, "restart"),
            RestartPolicy::Resume => write!(f, "resume"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub rules: ExchangeRules,
    /// Ask for confirmation before submitting
    pub confirm_before_submit: bool,
    /// Idle conversations older than this are dropped; zero disables expiry
    pub conversation_timeout: TimeDelta,
    pub restart_policy: RestartPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rules: ExchangeRules::default(),
            confirm_before_submit: true,
            conversation_timeout: TimeDelta::seconds(300),
            restart_policy: RestartPolicy::Restart,
        }
    }
}

/// A broken internal assumption. Ends the affected conversation only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    #[error("Conversation invariant violated: {0}")]
    Invariant(String),
}

/// Result of one step: keep the conversation or end it.
enum Advance {
    Continue(Reply),
    Finished(Reply),
}

type Slot = Arc<Mutex<Option<ConversationState>>>;

pub struct ConversationEngine {
    config: EngineConfig,
    exchange: ExchangeClient,
    monitor: Arc<OrderMonitor>,
    sessions: RwLock<HashMap<UserId, Slot>>,
}

impl ConversationEngine {
    pub fn new(config: EngineConfig, exchange: ExchangeClient, monitor: Arc<OrderMonitor>) -> Self {
        Self {
            config,
            exchange,
            monitor,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn rules(&self) -> &ExchangeRules {
        &self.config.rules
    }

    async fn slot(&self, user: UserId) -> Slot {
        if let Some(slot) = self.sessions.read().await.get(&user) {
            return slot.clone();
        }
        self.sessions.write().await.entry(user).or_default().clone()
    }

    /// Current step for a user.
    #[cfg(test)]
    pub async fn step(&self, user: UserId) -> ConversationStep {
        let slot = self.slot(user).await;
        let guard = slot.lock().await;
        guard
            .as_ref()
            .map(|s| s.step)
            .unwrap_or(ConversationStep::Idle)
    }

    /// Copy of the draft being assembled, if any.
    #[cfg(test)]
    pub async fn draft(&self, user: UserId) -> Option<crate::models::DraftOrder> {
        let slot = self.slot(user).await;
        let guard = slot.lock().await;
        guard.as_ref().map(|s| s.draft.clone())
    }

    /// Begin a trade (`/trade`).
    pub async fn start(&self, user: UserId, now: DateTime<Utc>) -> Reply {
        let slot = self.slot(user).await;
        let mut guard = slot.lock().await;

        let mut notice = None;
        if let Some(state) = guard.as_mut() {
            match self.config.restart_policy {
                RestartPolicy::Resume => {
                    state.last_activity = now;
                    info!(user = %user, step = %state.step, "Resuming trade in progress");
                    return self.prompt(state).prefixed("Continuing your current trade.");
                }
                RestartPolicy::Restart => {
                    info!(user = %user, step = %state.step, "Discarding trade in progress");
                    notice = Some("Previous trade discarded.");
                }
            }
        }

        let state = ConversationState::new(user, now);
        let reply = self.prompt(&state);
        *guard = Some(state);
        debug!(user = %user, "Trade started");

        match notice {
            Some(line) => reply.prefixed(line),
            None => reply,
        }
    }

    /// Abort the trade in progress (`/cancel`).
    pub async fn cancel(&self, user: UserId) -> Reply {
        let slot = self.slot(user).await;
        let mut guard = slot.lock().await;
        match guard.take() {
            Some(state) => {
                info!(user = %user, step = %state.step, "Trade canceled");
                Reply::text("Trade canceled.")
            }
            None => Reply::text("No trade in progress."),
        }
    }

    /// Feed one text input (typed or a picked choice) to the user's dialogue.
    pub async fn handle(&self, user: UserId, text: &str, now: DateTime<Utc>) -> Reply {
        let slot = self.slot(user).await;
        let mut guard = slot.lock().await;

        let Some(mut state) = guard.take() else {
            return Reply::text("No trade in progress. Use /trade to start one.");
        };
        state.last_activity = now;
        let step = state.step;

        match self.advance(&mut state, text).await {
            Ok(Advance::Continue(reply)) => {
                *guard = Some(state);
                reply
            }
            Ok(Advance::Finished(reply)) => reply,
            Err(e) => {
                error!(user = %user, step = %step, error = %e, "Resetting conversation");
                Reply::text("Something went wrong and the trade was reset. Use /trade to start again.")
            }
        }
    }

    /// Drop conversations idle for longer than the timeout. Conversations
    /// busy handling an input are left alone. Returns the affected users.
    pub async fn expire_idle(&self, now: DateTime<Utc>) -> Vec<UserId> {
        let timeout = self.config.conversation_timeout;
        if timeout <= TimeDelta::zero() {
            return Vec::new();
        }

        let slots: Vec<(UserId, Slot)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(user, slot)| (*user, slot.clone()))
            .collect();

        let mut expired = Vec::new();
        for (user, slot) in slots {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            let stale = guard
                .as_ref()
                .is_some_and(|s| now - s.last_activity > timeout);
            if stale {
                info!(user = %user, "Trade timed out");
                *guard = None;
                expired.push(user);
            }
        }
        expired
    }

    async fn advance(
        &self,
        state: &mut ConversationState,
        text: &str,
    ) -> Result<Advance, ConversationError> {
        let rules = &self.config.rules;
        let text = text.trim();

        match state.step {
            ConversationStep::Idle | ConversationStep::Submitting => Err(ConversationError::Invariant(
                format!("input received while {}", state.step),
            )),

            ConversationStep::ChoosingPair => match rules.find_pair(text) {
                Some(pair) => {
                    state.draft.pair = Some(pair.clone());
                    self.next(state).await
                }
                None => Ok(self.retry(state, format!("Unknown pair '{}'.", text))),
            },

            ConversationStep::ChoosingSide => match text.parse::<OrderSide>() {
                Ok(side) => {
                    state.draft.side = Some(side);
                    self.next(state).await
                }
                Err(()) => Ok(self.retry(state, "Choose buy or sell.")),
            },

            ConversationStep::ChoosingType => match text.parse::<OrderType>() {
                Ok(order_type) => {
                    state.draft.order_type = Some(order_type);
                    if order_type == OrderType::Market {
                        state.draft.price = None;
                    }
                    self.next(state).await
                }
                Err(()) => Ok(self.retry(state, "Choose limit or market.")),
            },

            ConversationStep::EnteringVolume => {
                let volume = match parse_positive_decimal(text, rules.volume_decimals) {
                    Ok(v) => v,
                    Err(e) => return Ok(self.retry(state, e)),
                };
                let pair = state.draft.pair.clone().ok_or_else(|| {
                    ConversationError::Invariant("volume entered before a pair".to_string())
                })?;
                if let Err(e) = validator::validate_volume(&pair, volume, rules) {
                    return Ok(self.retry(state, e));
                }
                state.draft.volume = Some(volume);
                self.next(state).await
            }

            ConversationStep::EnteringPrice => {
                let price = match parse_positive_decimal(text, rules.price_decimals) {
                    Ok(p) => p,
                    Err(e) => return Ok(self.retry(state, e)),
                };
                if let Err(e) = validator::validate_price(OrderType::Limit, Some(price)) {
                    return Ok(self.retry(state, e));
                }
                state.draft.price = Some(price);
                self.next(state).await
            }

            ConversationStep::Confirming => match text.to_lowercase().as_str() {
                "yes" | "y" | "confirm" => self.submit(state).await,
                "no" | "n" => {
                    info!(user = %state.user, "Order declined at confirmation");
                    Ok(Advance::Finished(Reply::text("Order discarded.")))
                }
                _ => Ok(self.retry(state, "Answer yes or no.")),
            },
        }
    }

    /// Ask for the first missing field, or move on once the draft is complete.
    async fn next(&self, state: &mut ConversationState) -> Result<Advance, ConversationError> {
        if let Some(field) = state.next_missing_field() {
            state.step = ConversationStep::for_field(field);
            return Ok(Advance::Continue(self.prompt(state)));
        }

        let request = self.checked_request(state)?;
        if let Err(e) = validator::validate(&request, &self.config.rules) {
            state.step = ConversationStep::for_field(e.field());
            return Ok(self.retry(state, e));
        }

        if self.config.confirm_before_submit {
            state.step = ConversationStep::Confirming;
            return Ok(Advance::Continue(self.prompt(state)));
        }

        self.submit(state).await
    }

    fn checked_request(&self, state: &ConversationState) -> Result<OrderRequest, ConversationError> {
        state.draft.complete().ok_or_else(|| {
            ConversationError::Invariant(format!("incomplete draft at {}", state.step))
        })
    }

    /// Place the order. One exchange call per entry into this step; retries
    /// inside the call share one client order id.
    async fn submit(&self, state: &mut ConversationState) -> Result<Advance, ConversationError> {
        let request = self.checked_request(state)?;
        if let Err(e) = validator::validate(&request, &self.config.rules) {
            state.step = ConversationStep::for_field(e.field());
            return Ok(self.retry(state, e));
        }

        state.step = ConversationStep::Submitting;
        let client_order_id = Uuid::new_v4().to_string();
        info!(
            user = %state.user,
            order = %request,
            client_order_id = %client_order_id,
            "Submitting order"
        );

        match self.exchange.add_order(&request, &client_order_id).await {
            Ok(submitted) => {
                self.monitor
                    .track(TrackedOrder::from_submission(&submitted))
                    .await;
                info!(user = %state.user, order_id = %submitted.order_id, "Order placed");
                Ok(Advance::Finished(Reply::text(format!(
                    "Order placed: {}\n{}",
                    submitted.order_id,
                    trim_zeros(&submitted.description)
                ))))
            }
            Err(ExchangeError::Rejected { kind, reason, .. }) => {
                warn!(user = %state.user, reason = %reason, "Order rejected");
                state.step = step_for_rejection(kind, &request);
                Ok(self.retry(state, format!("Order rejected: {}", reason)))
            }
            Err(e @ ExchangeError::Transient { .. }) => {
                warn!(user = %state.user, error = %e, "Order outcome unknown");
                Ok(Advance::Finished(Reply::text(format!(
                    "Could not confirm the order: {}\nIt may still have been placed, check /orders.",
                    e
                ))))
            }
        }
    }

    /// Repeat the current question after a problem.
    fn retry(&self, state: &ConversationState, problem: impl fmt::Display) -> Advance {
        Advance::Continue(self.prompt(state).prefixed(problem))
    }

    /// The question for the current step.
    fn prompt(&self, state: &ConversationState) -> Reply {
        let rules = &self.config.rules;
        let draft = &state.draft;

        match state.step {
            ConversationStep::ChoosingPair => Reply::with_choices(
                "Choose a pair:",
                rules.pairs.iter().map(ToString::to_string),
            ),
            ConversationStep::ChoosingSide => {
                let pair = draft.pair.as_ref().map(ToString::to_string).unwrap_or_default();
                Reply::with_choices(format!("Buy or sell {}?", pair), ["buy", "sell"])
            }
            ConversationStep::ChoosingType => {
                Reply::with_choices("Order type?", ["limit", "market"])
            }
            ConversationStep::EnteringVolume => match &draft.pair {
                Some(pair) => {
                    let minimum = rules.minimum_volume(pair);
                    if minimum.is_zero() {
                        Reply::text(format!("Enter volume in {}:", pair.base))
                    } else {
                        Reply::text(format!(
                            "Enter volume in {} (minimum {}):",
                            pair.base,
                            format_decimal(minimum)
                        ))
                    }
                }
                None => Reply::text("Enter volume:"),
            },
            ConversationStep::EnteringPrice => match &draft.pair {
                Some(pair) => Reply::text(format!("Enter limit price in {}:", pair.quote)),
                None => Reply::text("Enter limit price:"),
            },
            ConversationStep::Confirming => Reply::with_choices(
                format!("Place order: {}?", draft.summary()),
                ["yes", "no"],
            ),
            ConversationStep::Submitting => Reply::text("Submitting order..."),
            ConversationStep::Idle => Reply::text("No trade in progress."),
        }
    }
}

/// The step to return to after the exchange refused an order.
fn step_for_rejection(kind: RejectReason, request: &OrderRequest) -> ConversationStep {
    match kind {
        RejectReason::UnknownPair => ConversationStep::ChoosingPair,
        RejectReason::InvalidPrice if request.order_type == OrderType::Limit => {
            ConversationStep::EnteringPrice
        }
        _ => ConversationStep::EnteringVolume,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::exchange::{NonceGenerator, Operation, RetryPolicy, TransportError};
    use crate::models::DraftOrder;
    use crate::monitor::{tracked_from_info, CycleOutcome};
    use crate::testutil::{add_order_ok, open_order_json, RecordingChat, ScriptedTransport};
    use rust_decimal_macros::dec;

    const USER: UserId = UserId(1);

    struct Harness {
        engine: ConversationEngine,
        monitor: Arc<OrderMonitor>,
        transport: Arc<ScriptedTransport>,
    }

    fn harness(config: EngineConfig) -> Harness {
        let transport = Arc::new(ScriptedTransport::new());
        let exchange = ExchangeClient::new(
            transport.clone(),
            Arc::new(NonceGenerator::new()),
            RetryPolicy::immediate(3),
            Duration::from_millis(200),
        );
        let monitor = Arc::new(OrderMonitor::new(
            exchange.clone(),
            Arc::new(RecordingChat::new()),
            USER,
            false,
        ));
        let engine = ConversationEngine::new(config, exchange, monitor.clone());
        Harness {
            engine,
            monitor,
            transport,
        }
    }

    fn no_confirm() -> EngineConfig {
        EngineConfig {
            confirm_before_submit: false,
            ..EngineConfig::default()
        }
    }

    fn rejected(code: &str) -> TransportError {
        TransportError::Exchange(vec![code.to_string()])
    }

    impl Harness {
        async fn say(&self, text: &str) -> Reply {
            self.engine.handle(USER, text, Utc::now()).await
        }

        /// Walk a limit order up to the volume question.
        async fn to_volume(&self) {
            self.engine.start(USER, Utc::now()).await;
            self.say("XBT/EUR").await;
            self.say("buy").await;
            self.say("limit").await;
            assert_eq!(self.engine.step(USER).await, ConversationStep::EnteringVolume);
        }
    }

    #[tokio::test]
    async fn test_limit_order_with_confirmation() {
        let h = harness(EngineConfig::default());
        h.transport.push_ok(Operation::AddOrder, add_order_ok("OABC-1"));

        let reply = h.engine.start(USER, Utc::now()).await;
        assert_eq!(reply.choices, vec!["XBT/EUR", "ETH/EUR", "XMR/EUR"]);

        h.say("xbt/eur").await;
        h.say("buy").await;
        let reply = h.say("limit").await;
        assert_eq!(reply.text, "Enter volume in XBT (minimum 0.002):");
        let reply = h.say("0.5").await;
        assert_eq!(reply.text, "Enter limit price in EUR:");

        let reply = h.say("20000").await;
        assert_eq!(h.engine.step(USER).await, ConversationStep::Confirming);
        assert_eq!(reply.text, "Place order: buy 0.5 XBT/EUR limit @ 20000?");

        let reply = h.say("yes").await;
        assert_eq!(reply.text, "Order placed: OABC-1\nbuy 0.5 XBTEUR @ limit 20000");
        assert_eq!(h.engine.step(USER).await, ConversationStep::Idle);
        assert!(h.monitor.snapshot().await.contains_key("OABC-1"));

        let calls = h.transport.calls(Operation::AddOrder);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].param("pair"), Some("XBTEUR"));
        assert_eq!(calls[0].param("volume"), Some("0.5"));
        assert_eq!(calls[0].param("price"), Some("20000"));
    }

    #[tokio::test]
    async fn test_below_minimum_volume_stays_in_volume_step() {
        let h = harness(EngineConfig::default());
        h.to_volume().await;
        let before = h.engine.draft(USER).await;

        let reply = h.say("0.001").await;
        assert!(reply
            .text
            .starts_with("Volume 0.001 is below the minimum of 0.002 for XBT/EUR"));
        assert_eq!(h.engine.step(USER).await, ConversationStep::EnteringVolume);
        assert_eq!(h.engine.draft(USER).await, before);
    }

    #[tokio::test]
    async fn test_malformed_numbers_preserve_draft() {
        let h = harness(EngineConfig::default());
        h.to_volume().await;
        h.say("0.5").await;
        let before = h.engine.draft(USER).await;

        for input in ["abc", "-3", "0", "20000.123", ""] {
            h.say(input).await;
            assert_eq!(h.engine.step(USER).await, ConversationStep::EnteringPrice, "{}", input);
            assert_eq!(h.engine.draft(USER).await, before, "{}", input);
        }
    }

    #[tokio::test]
    async fn test_transient_failures_then_success_tracks_once() {
        let h = harness(no_confirm());
        h.transport.push_err(Operation::AddOrder, TransportError::Timeout);
        h.transport.push_err(Operation::AddOrder, rejected("EService:Unavailable"));
        h.transport.push_ok(Operation::AddOrder, add_order_ok("OABC-1"));

        h.to_volume().await;
        h.say("0.5").await;
        let reply = h.say("20000").await;

        assert!(reply.text.starts_with("Order placed: OABC-1"));
        assert_eq!(h.engine.step(USER).await, ConversationStep::Idle);
        assert_eq!(h.monitor.snapshot().await.len(), 1);

        let calls = h.transport.calls(Operation::AddOrder);
        assert_eq!(calls.len(), 3);
        let id = calls[0].param("cl_ord_id");
        assert!(id.is_some());
        assert!(calls.iter().all(|c| c.param("cl_ord_id") == id));
        assert!(calls.windows(2).all(|w| w[0].nonce < w[1].nonce));
    }

    #[tokio::test]
    async fn test_hung_submission_does_not_block_monitor() {
        let h = Arc::new(harness(no_confirm()));
        h.transport.push_hang(Operation::AddOrder);
        h.transport.push_ok(Operation::AddOrder, add_order_ok("OABC-1"));
        h.transport.push_ok(Operation::OpenOrders, serde_json::json!({ "open": {} }));

        h.to_volume().await;
        h.say("0.5").await;
        let submitting = {
            let h = h.clone();
            tokio::spawn(async move { h.say("20000").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!submitting.is_finished());

        // The monitor reads and inserts while AddOrder is still hanging
        let quick = Duration::from_millis(100);
        let cycle = tokio::time::timeout(quick, h.monitor.run_cycle()).await;
        assert!(matches!(cycle, Ok(Ok(CycleOutcome::Completed(_)))));

        let other = tracked_from_info("OTHER", &serde_json::from_value(open_order_json("x")).unwrap());
        assert!(tokio::time::timeout(quick, h.monitor.track(other)).await.is_ok());
        assert!(!submitting.is_finished());

        let reply = submitting.await.unwrap();
        assert!(reply.text.starts_with("Order placed: OABC-1"));

        let tracked = h.monitor.snapshot().await;
        assert!(tracked.contains_key("OTHER"));
        assert!(tracked.contains_key("OABC-1"));
    }

    #[tokio::test]
    async fn test_transient_exhaustion_ends_trade() {
        let h = harness(no_confirm());
        for _ in 0..3 {
            h.transport.push_err(Operation::AddOrder, rejected("EAPI:Rate limit exceeded"));
        }

        h.to_volume().await;
        h.say("0.5").await;
        let reply = h.say("20000").await;

        assert!(reply.text.contains("It may still have been placed, check /orders."));
        assert_eq!(h.engine.step(USER).await, ConversationStep::Idle);
        assert!(h.monitor.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_rejection_returns_to_volume() {
        let h = harness(no_confirm());
        h.transport.push_err(Operation::AddOrder, rejected("EOrder:Insufficient funds"));
        h.transport.push_ok(Operation::AddOrder, add_order_ok("OABC-2"));

        h.to_volume().await;
        h.say("0.5").await;
        let reply = h.say("20000").await;

        assert!(reply.text.starts_with("Order rejected: EOrder:Insufficient funds"));
        assert_eq!(h.engine.step(USER).await, ConversationStep::EnteringVolume);
        let draft = h.engine.draft(USER).await.unwrap();
        assert_eq!(draft.volume, Some(dec!(0.5)));
        assert_eq!(draft.price, Some(dec!(20000)));

        // Only the volume is asked again
        let reply = h.say("0.25").await;
        assert!(reply.text.starts_with("Order placed: OABC-2"));

        let calls = h.transport.calls(Operation::AddOrder);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].param("volume"), Some("0.25"));
        assert_ne!(calls[0].param("cl_ord_id"), calls[1].param("cl_ord_id"));
    }

    #[tokio::test]
    async fn test_rejections_route_to_relevant_field() {
        let h = harness(no_confirm());
        h.transport.push_err(Operation::AddOrder, rejected("EQuery:Unknown asset pair"));
        h.to_volume().await;
        h.say("0.5").await;
        h.say("20000").await;
        assert_eq!(h.engine.step(USER).await, ConversationStep::ChoosingPair);

        h.transport.push_err(Operation::AddOrder, rejected("EOrder:Invalid price"));
        h.say("XBT/EUR").await;
        assert_eq!(h.engine.step(USER).await, ConversationStep::EnteringPrice);
    }

    #[tokio::test]
    async fn test_market_order_skips_price() {
        let h = harness(EngineConfig::default());
        h.transport.push_ok(Operation::AddOrder, add_order_ok("OM-1"));

        h.engine.start(USER, Utc::now()).await;
        h.say("ETH/EUR").await;
        h.say("sell").await;
        h.say("market").await;
        let reply = h.say("1").await;
        assert_eq!(reply.text, "Place order: sell 1 ETH/EUR market?");
        h.say("y").await;

        let calls = h.transport.calls(Operation::AddOrder);
        assert_eq!(calls[0].param("ordertype"), Some("market"));
        assert_eq!(calls[0].param("price"), None);
    }

    #[tokio::test]
    async fn test_declined_confirmation_submits_nothing() {
        let h = harness(EngineConfig::default());
        h.to_volume().await;
        h.say("0.5").await;
        h.say("20000").await;

        let reply = h.say("maybe").await;
        assert!(reply.text.starts_with("Answer yes or no."));
        assert_eq!(h.engine.step(USER).await, ConversationStep::Confirming);

        h.say("no").await;
        assert_eq!(h.engine.step(USER).await, ConversationStep::Idle);
        assert!(h.transport.calls(Operation::AddOrder).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_inputs_repeat_step() {
        let h = harness(EngineConfig::default());
        h.engine.start(USER, Utc::now()).await;

        let reply = h.say("DOGE/EUR").await;
        assert!(reply.text.starts_with("Unknown pair 'DOGE/EUR'."));
        assert_eq!(h.engine.step(USER).await, ConversationStep::ChoosingPair);

        h.say("XBT/EUR").await;
        h.say("hold").await;
        assert_eq!(h.engine.step(USER).await, ConversationStep::ChoosingSide);
    }

    #[tokio::test]
    async fn test_cancel_from_any_step() {
        let h = harness(EngineConfig::default());
        h.to_volume().await;

        assert_eq!(h.engine.cancel(USER).await.text, "Trade canceled.");
        assert_eq!(h.engine.step(USER).await, ConversationStep::Idle);
        assert_eq!(h.engine.cancel(USER).await.text, "No trade in progress.");
        assert!(h.say("0.5").await.text.starts_with("No trade in progress."));
    }

    #[tokio::test]
    async fn test_restart_policy() {
        let h = harness(EngineConfig::default());
        h.to_volume().await;

        let reply = h.engine.start(USER, Utc::now()).await;
        assert!(reply.text.starts_with("Previous trade discarded."));
        assert_eq!(h.engine.step(USER).await, ConversationStep::ChoosingPair);
        assert_eq!(h.engine.draft(USER).await, Some(DraftOrder::default()));
    }

    #[tokio::test]
    async fn test_resume_policy() {
        let h = harness(EngineConfig {
            restart_policy: RestartPolicy::Resume,
            ..EngineConfig::default()
        });
        h.to_volume().await;
        let before = h.engine.draft(USER).await;

        let reply = h.engine.start(USER, Utc::now()).await;
        assert!(reply.text.starts_with("Continuing your current trade."));
        assert_eq!(h.engine.step(USER).await, ConversationStep::EnteringVolume);
        assert_eq!(h.engine.draft(USER).await, before);
    }

    #[tokio::test]
    async fn test_idle_conversations_expire() {
        let h = harness(EngineConfig::default());
        let t0 = Utc::now();
        h.engine.start(USER, t0).await;

        assert!(h.engine.expire_idle(t0 + TimeDelta::seconds(299)).await.is_empty());
        assert_eq!(
            h.engine.expire_idle(t0 + TimeDelta::seconds(301)).await,
            vec![USER]
        );
        assert_eq!(h.engine.step(USER).await, ConversationStep::Idle);
    }

    #[tokio::test]
    async fn test_invariant_violation_resets_user() {
        let h = harness(EngineConfig::default());
        let mut broken = ConversationState::new(USER, Utc::now());
        broken.step = ConversationStep::Submitting;
        *h.engine.slot(USER).await.lock().await = Some(broken);

        let reply = h.say("yes").await;
        assert!(reply.text.starts_with("Something went wrong"));
        assert_eq!(h.engine.step(USER).await, ConversationStep::Idle);
    }

    #[test]
    fn test_restart_policy_parsing() {
        assert_eq!("resume".parse::<RestartPolicy>(), Ok(RestartPolicy::Resume));
        assert_eq!(" Restart ".parse::<RestartPolicy>(), Ok(RestartPolicy::Restart));
        assert!("later".parse::<RestartPolicy>().is_err());
    }
}
