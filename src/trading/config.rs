//! Exchange-imposed trading rules.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{Asset, AssetPair};

/// Constraints an order must satisfy before it is submitted.
#[derive(Debug, Clone)]
pub struct ExchangeRules {
    /// Allow-listed pairs; the canonical (interned) instances handed out to drafts
    pub pairs: Vec<AssetPair>,

    /// Minimum order volume per base asset
    pub min_volume: HashMap<Asset, Decimal>,

    /// Maximum decimal places accepted for volume input
    pub volume_decimals: u32,

    /// Maximum decimal places accepted for price input
    pub price_decimals: u32,
}

impl ExchangeRules {
    /// Look up the interned allow-listed pair by display or exchange name.
    pub fn find_pair(&self, input: &str) -> Option<&AssetPair> {
        let wanted = input.trim();
        if let Ok(parsed) = wanted.parse::<AssetPair>() {
            return self.pairs.iter().find(|p| **p == parsed);
        }
        self.pairs.iter().find(|p| p.matches_exchange_name(wanted))
    }

    pub fn is_allowed(&self, pair: &AssetPair) -> bool {
        self.pairs.contains(pair)
    }

    /// Minimum volume for a pair's base asset; zero when not configured.
    pub fn minimum_volume(&self, pair: &AssetPair) -> Decimal {
        self.min_volume
            .get(&pair.base)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

impl Default for ExchangeRules {
    fn default() -> Self {
        let pairs = ["XBT/EUR", "ETH/EUR", "XMR/EUR"]
            .iter()
            .filter_map(|p| p.parse().ok())
            .collect();

        let min_volume = [("XBT", dec!(0.002)), ("ETH", dec!(0.02)), ("XMR", dec!(0.1))]
            .iter()
            .filter_map(|(code, min)| Asset::new(code).ok().map(|a| (a, *min)))
            .collect();

        Self {
            pairs,
            min_volume,
            volume_decimals: 8,
            price_decimals: 2,
        }
    }
}
