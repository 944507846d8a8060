//! Chat collaborator: user identity, inbound actions and outbound messages.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

/// Reply sent to any user other than the configured one.
pub const ACCESS_DENIED: &str = "Access denied";

/// Identity of a chat user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(UserId)
    }
}

/// A message for the user, optionally with choices to pick from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    pub text: String,
    pub choices: Vec<String>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            choices: Vec::new(),
        }
    }

    pub fn with_choices<I, S>(text: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            text: text.into(),
            choices: choices.into_iter().map(Into::into).collect(),
        }
    }

    /// Put a line in front of the message, keeping the choices.
    pub fn prefixed(mut self, line: impl fmt::Display) -> Self {
        self.text = format!("{}\n{}", line, self.text);
        self
    }
}

/// Slash commands understood by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Trade,
    Cancel,
    Orders,
    Close(String),
    CloseAll,
    Balance,
    /// Combined balance of all equity in the quote currency
    AvailableBalance,
    /// Holdings valued in the quote currency, optionally one asset only
    Value(Option<String>),
    Price(String),
    Sync,
    Help,
    Unknown(String),
}

/// One inbound user action: a command or free text (typed or a picked choice).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    Command(Command),
    Text(String),
}

impl UserInput {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let Some(command) = raw.strip_prefix('/') else {
            return UserInput::Text(raw.to_string());
        };

        let mut words = command.split_whitespace();
        let name = words.next().unwrap_or_default().to_lowercase();
        let arg = words.next().map(str::to_string);

        let command = match (name.as_str(), arg) {
            ("trade", _) => Command::Trade,
            ("cancel", _) => Command::Cancel,
            ("orders", _) => Command::Orders,
            ("close", Some(arg)) if arg.eq_ignore_ascii_case("all") => Command::CloseAll,
            ("close", Some(txid)) => Command::Close(txid),
            ("close-all", _) => Command::CloseAll,
            ("balance", Some(arg)) if arg.eq_ignore_ascii_case("available") => {
                Command::AvailableBalance
            }
            ("balance", _) => Command::Balance,
            ("value", asset) => Command::Value(asset),
            ("price", Some(pair)) => Command::Price(pair),
            ("sync", _) => Command::Sync,
            ("help" | "start", _) => Command::Help,
            _ => Command::Unknown(raw.to_string()),
        };

        UserInput::Command(command)
    }
}

/// Command listing shown by `/help`.
pub const HELP_TEXT: &str = "\
/trade - place an order step by step
/cancel - abort the current trade
/orders - list open orders
/close <txid> - cancel one open order
/close-all - cancel every open order
/balance - show account balance
/balance available - combined balance in the quote currency
/value [asset] - holdings valued in the quote currency
/price <pair> - last traded price, e.g. /price XBT/EUR
/sync - check order status now
/help - this list";

/// Outbound side of the chat transport.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(&self, user: UserId, text: &str, choices: &[String]) -> Result<()>;
}

/// Writes messages to stdout.
pub struct ConsoleTransport {
    out: Mutex<Stdout>,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a message as plain text, choices on their own line.
pub fn render_plain(text: &str, choices: &[String]) -> String {
    if choices.is_empty() {
        format!("{}\n", text)
    } else {
        let buttons: Vec<String> = choices.iter().map(|c| format!("[{}]", c)).collect();
        format!("{}\n{}\n", text, buttons.join(" "))
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn send_message(&self, _user: UserId, text: &str, choices: &[String]) -> Result<()> {
        let rendered = render_plain(text, choices);
        let mut out = self.out.lock().await;
        out.write_all(rendered.as_bytes())
            .await
            .context("Failed to write to stdout")?;
        out.flush().await.context("Failed to flush stdout")?;
        Ok(())
    }
}

/// Lets exactly one configured user through.
#[derive(Debug, Clone, Copy)]
pub struct AccessGuard {
    allowed: UserId,
}

impl AccessGuard {
    pub fn new(allowed: UserId) -> Self {
        Self { allowed }
    }

    pub fn allowed_user(&self) -> UserId {
        self.allowed
    }

    pub fn permits(&self, user: UserId) -> bool {
        user == self.allowed
    }
}
