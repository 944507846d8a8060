//! Bot settings: key-value store collaborator and the typed view on top of it.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::TimeDelta;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

use crate::conversation::{EngineConfig, RestartPolicy};
use crate::exchange::{BackoffStrategy, RetryPolicy};
use crate::models::{parse_pair_list, Asset, AssetPair};
use crate::trading::ExchangeRules;

/// Small key-value settings storage.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    /// All stored entries, sorted by key.
    async fn entries(&self) -> Result<Vec<(String, String)>>;
}

/// Delay shape between exchange retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

impl FromStr for BackoffKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Ok(BackoffKind::Fixed),
            "exponential" => Ok(BackoffKind::Exponential),
            other => Err(format!("unknown backoff '{}' (use fixed or exponential)", other)),
        }
    }
}

pub const MIN_VOLUME_PREFIX: &str = "min_volume.";

/// One year; longer timeouts are clamped.
const MAX_CONVERSATION_TIMEOUT_SECS: u64 = 365 * 24 * 3600;

/// Every plain setting key with its default, as shown by `config`.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("pairs", "XBT/EUR,ETH/EUR,XMR/EUR"),
    ("min_volume.XBT", "0.002"),
    ("min_volume.ETH", "0.02"),
    ("min_volume.XMR", "0.1"),
    ("volume_decimals", "8"),
    ("price_decimals", "2"),
    ("retry_max_attempts", "3"),
    ("retry_backoff", "exponential"),
    ("retry_base_ms", "500"),
    ("retry_max_delay_ms", "8000"),
    ("call_timeout_secs", "15"),
    ("monitor_interval_secs", "30"),
    ("confirm_before_submit", "true"),
    ("conversation_timeout_secs", "300"),
    ("trade_restart_policy", "restart"),
    ("notify_on_error", "false"),
    ("quote_currency", "EUR"),
];

/// Typed bot settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BotSettings {
    pub pairs: Vec<AssetPair>,
    pub min_volume: HashMap<Asset, Decimal>,
    pub volume_decimals: u32,
    pub price_decimals: u32,
    pub retry_max_attempts: u32,
    pub retry_backoff: BackoffKind,
    pub retry_base_ms: u64,
    pub retry_max_delay_ms: u64,
    pub call_timeout_secs: u64,
    /// 0 disables the order monitor
    pub monitor_interval_secs: u64,
    pub confirm_before_submit: bool,
    pub conversation_timeout_secs: u64,
    pub trade_restart_policy: RestartPolicy,
    pub notify_on_error: bool,
    /// Currency holdings are valued in
    pub quote_currency: Asset,
}

fn default_min_volume(asset: &Asset) -> Option<Decimal> {
    match asset.as_str() {
        "XBT" => Some(dec!(0.002)),
        "ETH" => Some(dec!(0.02)),
        "XMR" => Some(dec!(0.1)),
        _ => None,
    }
}

fn is_known_key(key: &str) -> bool {
    key.starts_with(MIN_VOLUME_PREFIX) || DEFAULTS.iter().any(|(k, _)| *k == key)
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow!("Invalid value '{}' for setting '{}': {}", raw, key, e))
}

async fn read<T>(store: &dyn SettingsStore, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match store.get(key).await? {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

impl BotSettings {
    /// Read settings, falling back to defaults for anything not stored.
    pub async fn load(store: &dyn SettingsStore) -> Result<Self> {
        for (key, _) in store.entries().await? {
            if !is_known_key(&key) {
                warn!(key = %key, "Ignoring unknown stored setting");
            }
        }

        let pairs = match store.get("pairs").await? {
            Some(raw) => parse_pair_list(&raw)?,
            None => ExchangeRules::default().pairs,
        };
        if pairs.is_empty() {
            bail!("Setting 'pairs' must list at least one pair");
        }

        let mut min_volume = HashMap::new();
        for pair in &pairs {
            if min_volume.contains_key(&pair.base) {
                continue;
            }
            let key = format!("{}{}", MIN_VOLUME_PREFIX, pair.base);
            let minimum = match store.get(&key).await? {
                Some(raw) => Some(parse_value::<Decimal>(&key, &raw)?),
                None => default_min_volume(&pair.base),
            };
            if let Some(minimum) = minimum {
                min_volume.insert(pair.base.clone(), minimum);
            }
        }

        Ok(Self {
            pairs,
            min_volume,
            volume_decimals: read(store, "volume_decimals", 8).await?,
            price_decimals: read(store, "price_decimals", 2).await?,
            retry_max_attempts: read(store, "retry_max_attempts", 3).await?,
            retry_backoff: read(store, "retry_backoff", BackoffKind::Exponential).await?,
            retry_base_ms: read(store, "retry_base_ms", 500).await?,
            retry_max_delay_ms: read(store, "retry_max_delay_ms", 8000).await?,
            call_timeout_secs: read(store, "call_timeout_secs", 15).await?,
            monitor_interval_secs: read(store, "monitor_interval_secs", 30).await?,
            confirm_before_submit: read(store, "confirm_before_submit", true).await?,
            conversation_timeout_secs: read(store, "conversation_timeout_secs", 300).await?,
            trade_restart_policy: read(store, "trade_restart_policy", RestartPolicy::Restart)
                .await?,
            notify_on_error: read(store, "notify_on_error", false).await?,
            quote_currency: read(store, "quote_currency", Asset::new("EUR")?).await?,
        })
    }

    pub fn exchange_rules(&self) -> ExchangeRules {
        ExchangeRules {
            pairs: self.pairs.clone(),
            min_volume: self.min_volume.clone(),
            volume_decimals: self.volume_decimals,
            price_decimals: self.price_decimals,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(self.retry_base_ms);
        let backoff = match self.retry_backoff {
            BackoffKind::Fixed => BackoffStrategy::Fixed(base),
            BackoffKind::Exponential => BackoffStrategy::Exponential {
                initial: base,
                max: Duration::from_millis(self.retry_max_delay_ms.max(self.retry_base_ms)),
            },
        };
        RetryPolicy::new(self.retry_max_attempts, backoff)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            rules: self.exchange_rules(),
            confirm_before_submit: self.confirm_before_submit,
            conversation_timeout: TimeDelta::seconds(
                self.conversation_timeout_secs.min(MAX_CONVERSATION_TIMEOUT_SECS) as i64,
            ),
            restart_policy: self.trade_restart_policy,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

/// Check a value before it is stored, so a bad `set` cannot break startup.
pub fn check_setting(key: &str, value: &str) -> Result<()> {
    if let Some(asset) = key.strip_prefix(MIN_VOLUME_PREFIX) {
        Asset::new(asset)?;
        let minimum: Decimal = parse_value(key, value)?;
        if minimum.is_sign_negative() {
            bail!("Minimum volume cannot be negative");
        }
        return Ok(());
    }

    match key {
        "pairs" => {
            if parse_pair_list(value)?.is_empty() {
                bail!("Setting 'pairs' must list at least one pair");
            }
        }
        "volume_decimals" | "price_decimals" | "retry_max_attempts" => {
            parse_value::<u32>(key, value)?;
        }
        "retry_base_ms" | "retry_max_delay_ms" | "call_timeout_secs" | "monitor_interval_secs"
        | "conversation_timeout_secs" => {
            parse_value::<u64>(key, value)?;
        }
        "retry_backoff" => {
            parse_value::<BackoffKind>(key, value)?;
        }
        "confirm_before_submit" | "notify_on_error" => {
            parse_value::<bool>(key, value)?;
        }
        "trade_restart_policy" => {
            parse_value::<RestartPolicy>(key, value)?;
        }
        "quote_currency" => {
            Asset::new(value)?;
        }
        _ => bail!("Unknown setting '{}'", key),
    }
    Ok(())
}
