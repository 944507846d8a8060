//! Assets and trading pairs.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A currency code such as `XBT` or `EUR`.
///
/// Backed by an `Arc<str>` so interned pairs can be cloned freely.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Asset(Arc<str>);

impl Asset {
    pub fn new(code: &str) -> Result<Self, PairParseError> {
        let code = code.trim();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PairParseError::InvalidAsset(code.to_string()));
        }
        Ok(Self(Arc::from(code.to_ascii_uppercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Asset named by a balance key. Older assets carry an `X` (crypto) or
    /// `Z` (fiat) prefix on the exchange: `XXBT`, `ZEUR`.
    pub fn from_exchange_code(code: &str) -> Result<Self, PairParseError> {
        let code = code.trim();
        match code.as_bytes() {
            [b'X' | b'Z', _, _, _] => Asset::new(&code[1..]),
            _ => Asset::new(code),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Asset {
    type Err = PairParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Asset::new(s)
    }
}

impl TryFrom<String> for Asset {
    type Error = PairParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Asset::new(&value)
    }
}

impl From<Asset> for String {
    fn from(asset: Asset) -> Self {
        asset.0.to_string()
    }
}

/// Errors when parsing assets or pairs from user input or settings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PairParseError {
    #[error("Invalid asset code: '{0}'")]
    InvalidAsset(String),

    #[error("Invalid pair '{0}', expected BASE/QUOTE")]
    InvalidPair(String),
}

/// A tradable pair, e.g. `XBT/EUR`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetPair {
    pub base: Asset,
    pub quote: Asset,
}

impl AssetPair {
    pub fn new(base: Asset, quote: Asset) -> Self {
        Self { base, quote }
    }

    /// Symbol as the exchange expects it in requests (`XBTEUR`).
    pub fn exchange_symbol(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    /// Whether an exchange-reported pair name refers to this pair.
    ///
    /// Kraken reports either the altname (`XBTEUR`) or the legacy
    /// prefixed form (`XXBTZEUR`).
    pub fn matches_exchange_name(&self, name: &str) -> bool {
        let name = name.to_ascii_uppercase();
        if name == self.exchange_symbol() {
            return true;
        }
        let legacy = format!("X{}Z{}", self.base, self.quote);
        name == legacy
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for AssetPair {
    type Err = PairParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (base, quote) = trimmed
            .split_once('/')
            .or_else(|| trimmed.split_once('-'))
            .ok_or_else(|| PairParseError::InvalidPair(trimmed.to_string()))?;

        Ok(Self {
            base: Asset::new(base)?,
            quote: Asset::new(quote)?,
        })
    }
}

/// Parse a comma-separated pair list (`XBT/EUR,ETH/EUR`), dropping duplicates.
pub fn parse_pair_list(raw: &str) -> Result<Vec<AssetPair>, PairParseError> {
    let mut pairs: Vec<AssetPair> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let pair: AssetPair = part.parse()?;
        if !pairs.contains(&pair) {
            pairs.push(pair);
        }
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        let pair: AssetPair = "xbt/eur".parse().unwrap();
        assert_eq!(pair.base.as_str(), "XBT");
        assert_eq!(pair.quote.as_str(), "EUR");
        assert_eq!(pair.to_string(), "XBT/EUR");
        assert_eq!(pair.exchange_symbol(), "XBTEUR");

        let dashed: AssetPair = "ETH-EUR".parse().unwrap();
        assert_eq!(dashed.to_string(), "ETH/EUR");
    }

    #[test]
    fn test_parse_pair_rejects_garbage() {
        assert!("XBTEUR".parse::<AssetPair>().is_err());
        assert!("XBT/".parse::<AssetPair>().is_err());
        assert!("X B/EUR".parse::<AssetPair>().is_err());
    }

    #[test]
    fn test_exchange_name_matching() {
        let pair: AssetPair = "XBT/EUR".parse().unwrap();
        assert!(pair.matches_exchange_name("XBTEUR"));
        assert!(pair.matches_exchange_name("XXBTZEUR"));
        assert!(!pair.matches_exchange_name("ETHEUR"));
    }

    #[test]
    fn test_asset_from_exchange_code() {
        assert_eq!(Asset::from_exchange_code("XXBT").unwrap().as_str(), "XBT");
        assert_eq!(Asset::from_exchange_code("ZEUR").unwrap().as_str(), "EUR");
        assert_eq!(Asset::from_exchange_code("DOT").unwrap().as_str(), "DOT");
        assert_eq!(Asset::from_exchange_code("USDT").unwrap().as_str(), "USDT");
        assert!(Asset::from_exchange_code("ETH2.S").is_err());
    }

    #[test]
    fn test_pair_list_dedup() {
        let pairs = parse_pair_list("XBT/EUR, ETH/EUR,XBT/EUR,").unwrap();
        assert_eq!(pairs.len(), 2);
    }
}
