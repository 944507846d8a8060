//! Kraken Order Bot
//!
//! Places limit and market orders on Kraken through a guided chat dialogue
//! and reports when open orders get executed.

mod api;
mod bot;
mod chat;
mod conversation;
mod db;
mod exchange;
mod models;
mod monitor;
mod settings;
mod trading;

#[cfg(test)]
mod testutil;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::KrakenTransport;
use crate::bot::Bot;
use crate::chat::{Command, ConsoleTransport, UserId, UserInput};
use crate::db::{Database, StoredSetting};
use crate::settings::{check_setting, BotSettings, SettingsStore, DEFAULTS};

/// Kraken order bot CLI.
#[derive(Parser)]
#[command(name = "krakenbot")]
#[command(about = "Place and monitor Kraken orders through a guided dialogue", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./krakenbot.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// The only chat user allowed to talk to the bot
    #[arg(short, long, env = "KRAKENBOT_USER_ID", default_value = "0")]
    user_id: i64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot: reads messages from stdin, one per line
    Run,

    /// List open orders
    Orders,

    /// Cancel one open order
    Close {
        /// Transaction id of the order
        txid: String,
    },

    /// Cancel every open order
    CloseAll,

    /// Show account balance
    Balance {
        /// Combined balance of all equity in the quote currency
        #[arg(long)]
        available: bool,
    },

    /// Value holdings in the quote currency
    Value {
        /// Only this asset, e.g. XBT
        asset: Option<String>,
    },

    /// Show the last traded price of a pair
    Price {
        /// Pair, e.g. XBT/EUR
        pair: String,
    },

    /// Show effective settings
    Config,

    /// Change a setting
    Set {
        key: String,
        value: String,
    },

    /// Reset a setting to its default
    Unset {
        key: String,
    },
}

async fn build_bot(db: &Database, user: UserId) -> Result<Bot> {
    let settings = BotSettings::load(db).await.context("Invalid settings")?;
    let transport = KrakenTransport::from_env(settings.call_timeout())?;
    if !transport.is_authenticated() {
        info!("KRAKEN_API_KEY / KRAKEN_API_SECRET not set, only public endpoints will work");
    }

    Ok(Bot::new(
        settings,
        user,
        Arc::new(transport),
        Arc::new(ConsoleTransport::new()),
    ))
}

async fn one_shot(db: &Database, user: UserId, command: Command) -> Result<()> {
    let bot = build_bot(db, user).await?;
    let reply = bot.dispatch(bot.user(), UserInput::Command(command)).await;
    println!("{}", reply.text);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr, stdout carries the conversation
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let db = Database::new(&cli.database).await?;
    let user = UserId(cli.user_id);

    match cli.command {
        Commands::Run => {
            let bot = build_bot(&db, user).await?;
            bot.run(BufReader::new(tokio::io::stdin())).await?;
        }

        Commands::Orders => one_shot(&db, user, Command::Orders).await?,
        Commands::Close { txid } => one_shot(&db, user, Command::Close(txid)).await?,
        Commands::CloseAll => one_shot(&db, user, Command::CloseAll).await?,
        Commands::Balance { available: false } => one_shot(&db, user, Command::Balance).await?,
        Commands::Balance { available: true } => {
            one_shot(&db, user, Command::AvailableBalance).await?
        }
        Commands::Value { asset } => one_shot(&db, user, Command::Value(asset)).await?,
        Commands::Price { pair } => one_shot(&db, user, Command::Price(pair)).await?,

        Commands::Config => {
            let stored: BTreeMap<String, StoredSetting> = db
                .get_settings()
                .await?
                .into_iter()
                .map(|s| (s.key.clone(), s))
                .collect();

            println!("\n{:<28} {:<28} {}", "KEY", "VALUE", "SOURCE");
            println!("{}", "-".repeat(76));

            for (key, default) in DEFAULTS {
                match stored.get(*key) {
                    Some(s) => println!("{:<28} {:<28} stored {}", key, s.value, s.updated_at),
                    None => println!("{:<28} {:<28} default", key, default),
                }
            }
            for (key, s) in &stored {
                if !DEFAULTS.iter().any(|(k, _)| k == key) {
                    println!("{:<28} {:<28} stored {}", key, s.value, s.updated_at);
                }
            }
        }

        Commands::Set { key, value } => {
            check_setting(&key, &value)?;
            db.set(&key, &value).await?;
            println!("{} = {}", key, value);
        }

        Commands::Unset { key } => {
            if db.remove_setting(&key).await? {
                println!("{} reset to default", key);
            } else {
                println!("{} was not set", key);
            }
        }
    }

    Ok(())
}
