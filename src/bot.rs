//! Bot runner: wires the dialogue, the order monitor and the chat together.
//!
//! Handles:
//! - Gating every input to the configured user
//! - Routing commands and dialogue input
//! - Running the order monitor and the idle-conversation sweeper
//! - Graceful shutdown on Ctrl-C or end of input

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use futures::future::join_all;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::chat::{AccessGuard, ChatTransport, Command, Reply, UserId, UserInput, ACCESS_DENIED, HELP_TEXT};
use crate::conversation::ConversationEngine;
use crate::exchange::{ExchangeClient, ExchangeTransport, NonceGenerator};
use crate::models::{format_decimal, trim_zeros, Asset, AssetPair};
use crate::monitor::{CycleOutcome, OrderMonitor};
use crate::settings::BotSettings;

/// How often idle conversations are looked for, at most.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub struct Bot {
    settings: BotSettings,
    guard: AccessGuard,
    exchange: ExchangeClient,
    engine: Arc<ConversationEngine>,
    monitor: Arc<OrderMonitor>,
    chat: Arc<dyn ChatTransport>,
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    pub fn new(
        settings: BotSettings,
        user: UserId,
        transport: Arc<dyn ExchangeTransport>,
        chat: Arc<dyn ChatTransport>,
    ) -> Self {
        let exchange = ExchangeClient::new(
            transport,
            Arc::new(NonceGenerator::new()),
            settings.retry_policy(),
            settings.call_timeout(),
        );
        let monitor = Arc::new(OrderMonitor::new(
            exchange.clone(),
            chat.clone(),
            user,
            settings.notify_on_error,
        ));
        let engine = Arc::new(ConversationEngine::new(
            settings.engine_config(),
            exchange.clone(),
            monitor.clone(),
        ));

        Self {
            settings,
            guard: AccessGuard::new(user),
            exchange,
            engine,
            monitor,
            chat,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn user(&self) -> UserId {
        self.guard.allowed_user()
    }

    /// Answer one user action.
    pub async fn dispatch(&self, user: UserId, input: UserInput) -> Reply {
        if !self.guard.permits(user) {
            warn!(user = %user, "Rejected input from unknown user");
            return Reply::text(ACCESS_DENIED);
        }

        let now = Utc::now();
        match input {
            UserInput::Text(text) => self.engine.handle(user, &text, now).await,
            UserInput::Command(command) => match command {
                Command::Trade => self.engine.start(user, now).await,
                Command::Cancel => self.engine.cancel(user).await,
                Command::Orders => self.list_orders().await,
                Command::Close(txid) => self.close_order(&txid).await,
                Command::CloseAll => self.close_all().await,
                Command::Balance => self.balance().await,
                Command::AvailableBalance => self.available_balance().await,
                Command::Value(asset) => self.value(asset.as_deref()).await,
                Command::Price(pair) => self.price(&pair).await,
                Command::Sync => self.sync().await,
                Command::Help => Reply::text(HELP_TEXT),
                Command::Unknown(raw) => {
                    Reply::text(format!("Unknown command {}. Send /help for the list.", raw))
                }
            },
        }
    }

    /// Parse, answer and send the reply back.
    pub async fn on_message(&self, user: UserId, raw: &str) {
        let input = UserInput::parse(raw);
        debug!(user = %user, input = ?input, "Inbound message");

        let reply = self.dispatch(user, input).await;
        if let Err(e) = self.chat.send_message(user, &reply.text, &reply.choices).await {
            warn!(user = %user, error = %e, "Failed to send reply");
        }
    }

    async fn list_orders(&self) -> Reply {
        match self.exchange.open_orders().await {
            Ok(open) if open.is_empty() => Reply::text("No open orders."),
            Ok(open) => {
                let mut orders: Vec<_> = open.into_iter().collect();
                orders.sort_by(|a, b| {
                    a.1.opentm
                        .partial_cmp(&b.1.opentm)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(&b.0))
                });
                let lines: Vec<String> = orders
                    .iter()
                    .map(|(txid, info)| {
                        let mut line = format!("{}: {}", txid, trim_zeros(&info.descr.order));
                        if let (Some(vol), Some(done)) = (info.vol, info.vol_exec) {
                            if !done.is_zero() {
                                line.push_str(&format!(
                                    " (executed {} of {})",
                                    format_decimal(done),
                                    format_decimal(vol)
                                ));
                            }
                        }
                        line
                    })
                    .collect();
                Reply::text(lines.join("\n"))
            }
            Err(e) => Reply::text(format!("Could not list orders: {}", e)),
        }
    }

    async fn close_order(&self, txid: &str) -> Reply {
        match self.exchange.cancel_order(txid).await {
            Ok(_) => {
                info!(order_id = %txid, "Order canceled on request");
                Reply::text(format!("Order {} canceled.", txid))
            }
            Err(e) => Reply::text(format!("Could not cancel {}: {}", txid, e)),
        }
    }

    async fn close_all(&self) -> Reply {
        match self.exchange.cancel_all().await {
            Ok(count) => {
                info!(count = count, "All orders canceled on request");
                Reply::text(format!("{} order(s) canceled.", count))
            }
            Err(e) => Reply::text(format!("Could not cancel orders: {}", e)),
        }
    }

    async fn balance(&self) -> Reply {
        match self.exchange.balance().await {
            Ok(balance) => {
                let mut funds: Vec<_> = balance.into_iter().filter(|(_, v)| !v.is_zero()).collect();
                if funds.is_empty() {
                    return Reply::text("No funds.");
                }
                funds.sort_by(|a, b| a.0.cmp(&b.0));
                let lines: Vec<String> = funds
                    .iter()
                    .map(|(asset, amount)| format!("{}: {}", asset, format_decimal(*amount)))
                    .collect();
                Reply::text(lines.join("\n"))
            }
            Err(e) => Reply::text(format!("Could not read balance: {}", e)),
        }
    }

    async fn available_balance(&self) -> Reply {
        let quote = &self.settings.quote_currency;
        match self.exchange.trade_balance(quote).await {
            Ok(total) => Reply::text(format!("{}: {}", quote, format_decimal(total))),
            Err(e) => Reply::text(format!("Could not read trade balance: {}", e)),
        }
    }

    /// Value holdings at the last traded price against the quote currency.
    /// Quote currency funds count at face value.
    async fn value(&self, only: Option<&str>) -> Reply {
        let quote = self.settings.quote_currency.clone();
        let wanted = match only.map(Asset::new).transpose() {
            Ok(wanted) => wanted,
            Err(e) => return Reply::text(e.to_string()),
        };

        let balance = match self.exchange.balance().await {
            Ok(balance) => balance,
            Err(e) => return Reply::text(format!("Could not read balance: {}", e)),
        };

        let mut holdings: Vec<(Asset, Decimal)> = Vec::new();
        for (code, amount) in balance {
            if amount.is_zero() {
                continue;
            }
            match Asset::from_exchange_code(&code) {
                Ok(asset) => holdings.push((asset, amount)),
                Err(_) => debug!(asset = %code, "Skipping balance entry"),
            }
        }
        if let Some(wanted) = &wanted {
            holdings.retain(|(asset, _)| asset == wanted);
            if holdings.is_empty() {
                return Reply::text(format!("No {} in balance.", wanted));
            }
        }
        holdings.sort();

        let mut total = Decimal::ZERO;
        for (asset, amount) in holdings {
            if asset == quote {
                total = total.saturating_add(amount);
                continue;
            }
            let pair = AssetPair::new(asset, quote.clone());
            match self.exchange.ticker(&pair).await {
                Ok(price) => total = total.saturating_add(amount.saturating_mul(price)),
                Err(e) => return Reply::text(format!("Could not get price for {}: {}", pair, e)),
            }
        }

        let label = wanted.map_or_else(|| "Overall".to_string(), |asset| asset.to_string());
        Reply::text(format!("{}: {:.2} {}", label, total.round_dp(2), quote))
    }

    async fn price(&self, input: &str) -> Reply {
        let pair = match self.engine.rules().find_pair(input) {
            Some(pair) => pair.clone(),
            None => match input.parse::<AssetPair>() {
                Ok(pair) => pair,
                Err(e) => return Reply::text(e.to_string()),
            },
        };

        match self.exchange.ticker(&pair).await {
            Ok(price) => Reply::text(format!("{}: {}", pair, format_decimal(price))),
            Err(e) => Reply::text(format!("Could not get price for {}: {}", pair, e)),
        }
    }

    async fn sync(&self) -> Reply {
        match self.monitor.run_cycle().await {
            Ok(CycleOutcome::Completed(report)) => Reply::text(format!(
                "Orders checked: {} new, {} executed, {} canceled.",
                report.discovered, report.closed, report.canceled
            )),
            Ok(CycleOutcome::Skipped) => Reply::text("An order check is already running."),
            Err(e) => Reply::text(format!("Order check failed: {}", e)),
        }
    }

    fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        if self.settings.conversation_timeout_secs == 0 {
            return None;
        }

        let every = SWEEP_INTERVAL.min(Duration::from_secs(self.settings.conversation_timeout_secs));
        let engine = self.engine.clone();
        let chat = self.chat.clone();
        let shutdown = self.shutdown.clone();

        Some(tokio::spawn(async move {
            let mut ticker = interval(every);
            while !shutdown.load(Ordering::SeqCst) {
                ticker.tick().await;
                for user in engine.expire_idle(Utc::now()).await {
                    if let Err(e) = chat.send_message(user, "Trade timed out.", &[]).await {
                        warn!(user = %user, error = %e, "Failed to send timeout notice");
                    }
                }
            }
        }))
    }

    /// Main loop: reads one message per line from `input` for the configured
    /// user until end of input or Ctrl-C.
    pub async fn run<R>(&self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        info!(
            user = %self.user(),
            monitor_interval = self.settings.monitor_interval_secs,
            confirm = self.settings.confirm_before_submit,
            "Starting bot"
        );

        let mut tasks = Vec::new();
        if let Some(handle) = self
            .monitor
            .clone()
            .spawn(self.settings.monitor_interval(), self.shutdown.clone())
        {
            tasks.push(handle);
        }
        if let Some(handle) = self.spawn_sweeper() {
            tasks.push(handle);
        }

        let user = self.user();
        let mut lines = input.lines();
        while !self.shutdown.load(Ordering::SeqCst) {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => self.on_message(user, &line).await,
                    None => {
                        info!("Input closed");
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.stop(tasks).await;
        Ok(())
    }

    async fn stop(&self, tasks: Vec<JoinHandle<()>>) {
        info!("Shutting down");
        self.shutdown.store(true, Ordering::SeqCst);
        for task in &tasks {
            task.abort();
        }
        for result in join_all(tasks).await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    warn!(error = %e, "Background task failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Operation, TransportError};
    use crate::testutil::MemorySettings;
    use crate::testutil::{open_order_json, RecordingChat, ScriptedTransport};
    use serde_json::json;

    const OWNER: UserId = UserId(100);

    async fn bot() -> (Bot, Arc<ScriptedTransport>, Arc<RecordingChat>) {
        let store = MemorySettings::with_values([
            ("monitor_interval_secs", "0"),
            ("retry_max_attempts", "1"),
        ]);
        let settings = BotSettings::load(&store).await.unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let chat = Arc::new(RecordingChat::new());
        let bot = Bot::new(settings, OWNER, transport.clone(), chat.clone());
        (bot, transport, chat)
    }

    #[tokio::test]
    async fn test_other_users_are_denied() {
        let (bot, transport, _) = bot().await;

        for raw in ["/trade", "/orders", "XBT/EUR"] {
            let reply = bot.dispatch(UserId(5), UserInput::parse(raw)).await;
            assert_eq!(reply.text, ACCESS_DENIED);
        }
        assert!(transport.calls(Operation::OpenOrders).is_empty());
    }

    #[tokio::test]
    async fn test_orders_listing() {
        let (bot, transport, _) = bot().await;
        transport.push_ok(
            Operation::OpenOrders,
            json!({ "open": { "OA": open_order_json("buy 0.50000000 XBTEUR @ limit 20000.0") } }),
        );
        transport.push_ok(Operation::OpenOrders, json!({ "open": {} }));

        let reply = bot.dispatch(OWNER, UserInput::parse("/orders")).await;
        assert_eq!(reply.text, "OA: buy 0.5 XBTEUR @ limit 20000");

        let reply = bot.dispatch(OWNER, UserInput::parse("/orders")).await;
        assert_eq!(reply.text, "No open orders.");
    }

    #[tokio::test]
    async fn test_orders_listing_shows_partial_fills() {
        let (bot, transport, _) = bot().await;
        let mut partial = open_order_json("buy 0.50000000 XBTEUR @ limit 20000.0");
        partial["vol_exec"] = json!("0.20000000");
        transport.push_ok(Operation::OpenOrders, json!({ "open": { "OA": partial } }));

        let reply = bot.dispatch(OWNER, UserInput::parse("/orders")).await;
        assert_eq!(reply.text, "OA: buy 0.5 XBTEUR @ limit 20000 (executed 0.2 of 0.5)");
    }

    #[tokio::test]
    async fn test_balance_hides_empty_assets() {
        let (bot, transport, _) = bot().await;
        transport.push_ok(
            Operation::Balance,
            json!({ "ZEUR": "120.5000", "XXBT": "0.0100000000", "XETH": "0.0000" }),
        );

        let reply = bot.dispatch(OWNER, UserInput::parse("/balance")).await;
        assert_eq!(reply.text, "XXBT: 0.01\nZEUR: 120.5");
    }

    #[tokio::test]
    async fn test_available_balance() {
        let (bot, transport, _) = bot().await;
        transport.push_ok(
            Operation::TradeBalance,
            json!({ "eb": "1500.2500", "tb": "1234.5000" }),
        );

        let reply = bot.dispatch(OWNER, UserInput::parse("/balance available")).await;
        assert_eq!(reply.text, "EUR: 1234.5");
        assert_eq!(transport.calls(Operation::TradeBalance)[0].param("asset"), Some("EUR"));
        assert!(transport.calls(Operation::Balance).is_empty());
    }

    #[tokio::test]
    async fn test_value_of_holdings() {
        let (bot, transport, _) = bot().await;
        let balance = json!({
            "ZEUR": "100.5000",
            "XXBT": "0.0100000000",
            "XETH": "0.0000000000",
            "ETH2.S": "1.0000000000"
        });
        let ticker = json!({ "XXBTZEUR": { "c": ["27000.10000", "0.001"] } });
        for _ in 0..3 {
            transport.push_ok(Operation::Balance, balance.clone());
        }
        transport.push_ok(Operation::Ticker, ticker.clone());
        transport.push_ok(Operation::Ticker, ticker);

        let reply = bot.dispatch(OWNER, UserInput::parse("/value")).await;
        assert_eq!(reply.text, "Overall: 370.50 EUR");
        // Only XBT needs a price; EUR counts as is, empty and unknown entries are skipped
        let tickers = transport.calls(Operation::Ticker);
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].param("pair"), Some("XBTEUR"));

        let reply = bot.dispatch(OWNER, UserInput::parse("/value xbt")).await;
        assert_eq!(reply.text, "XBT: 270.00 EUR");

        let reply = bot.dispatch(OWNER, UserInput::parse("/value xmr")).await;
        assert_eq!(reply.text, "No XMR in balance.");
        assert_eq!(transport.calls(Operation::Ticker).len(), 2);
    }

    #[tokio::test]
    async fn test_close_and_close_all() {
        let (bot, transport, _) = bot().await;
        transport.push_ok(Operation::CancelOrder, json!({ "count": 1 }));
        transport.push_err(
            Operation::CancelOrder,
            TransportError::Exchange(vec!["EOrder:Unknown order".to_string()]),
        );
        transport.push_ok(Operation::CancelAll, json!({ "count": 3 }));

        let reply = bot.dispatch(OWNER, UserInput::parse("/close OA")).await;
        assert_eq!(reply.text, "Order OA canceled.");
        assert_eq!(transport.calls(Operation::CancelOrder)[0].param("txid"), Some("OA"));

        let reply = bot.dispatch(OWNER, UserInput::parse("/close OB")).await;
        assert!(reply.text.starts_with("Could not cancel OB"));
        assert!(reply.text.contains("EOrder:Unknown order"));

        let reply = bot.dispatch(OWNER, UserInput::parse("/close-all")).await;
        assert_eq!(reply.text, "3 order(s) canceled.");
    }

    #[tokio::test]
    async fn test_price() {
        let (bot, transport, _) = bot().await;
        transport.push_ok(
            Operation::Ticker,
            json!({ "XXBTZEUR": { "c": ["27000.10000", "0.001"] } }),
        );

        let reply = bot.dispatch(OWNER, UserInput::parse("/price xbt/eur")).await;
        assert_eq!(reply.text, "XBT/EUR: 27000.1");

        let reply = bot.dispatch(OWNER, UserInput::parse("/price nonsense")).await;
        assert!(reply.text.contains("expected BASE/QUOTE"));
    }

    #[tokio::test]
    async fn test_sync_reports_cycle() {
        let (bot, transport, _) = bot().await;
        transport.push_ok(
            Operation::OpenOrders,
            json!({ "open": { "OA": open_order_json("x") } }),
        );
        transport.push_err(Operation::OpenOrders, TransportError::Timeout);

        let reply = bot.dispatch(OWNER, UserInput::parse("/sync")).await;
        assert_eq!(reply.text, "Orders checked: 1 new, 0 executed, 0 canceled.");

        let reply = bot.dispatch(OWNER, UserInput::parse("/sync")).await;
        assert!(reply.text.starts_with("Order check failed"));
        assert_eq!(bot.monitor.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_run_reads_until_end_of_input() {
        let (bot, _, chat) = bot().await;
        let input: &[u8] = b"/help\n\n/trade\nXBT/EUR\n/bogus\n";

        bot.run(input).await.unwrap();

        let messages = chat.messages();
        assert_eq!(messages.len(), 4);
        assert!(messages.iter().all(|(user, _, _)| *user == OWNER));
        assert_eq!(messages[0].1, HELP_TEXT);
        assert_eq!(messages[1].2, vec!["XBT/EUR", "ETH/EUR", "XMR/EUR"]);
        assert_eq!(messages[2].2, vec!["buy", "sell"]);
        assert!(messages[3].1.starts_with("Unknown command /bogus"));
        assert!(bot.shutdown.load(Ordering::SeqCst));
    }
}
