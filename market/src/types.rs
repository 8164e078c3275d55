use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Quote currencies stripped from a raw symbol when normalizing.
///
/// Tried in order; longer stablecoin suffixes precede `USD`.
/// Stablecoin and fiat quotes, stripped whenever a base remains.
pub const QUOTE_SUFFIXES: &[&str] = &["USDT", "USDC", "BUSD", "FDUSD", "TUSD", "USD", "EUR"];

/// Crypto quotes. Only stripped when the remainder is a plausible ticker,
/// so wrapped assets like `WBTC` and `WETH` keep their own identity.
pub const CROSS_QUOTE_SUFFIXES: &[&str] = &["BTC", "ETH"];

const MIN_CROSS_BASE_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        };
        f.write_str(s)
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LONG" | "BUY" => Ok(Direction::Long),
            "SHORT" | "SELL" => Ok(Direction::Short),
            other => Err(anyhow::anyhow!("Invalid Direction value: {}", other)),
        }
    }
}

/// Categorical market state reported by the market-context provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    BullishTrend,
    BearishTrend,
    Sideways,
    HighVolatility,
    LowVolatility,
}

impl MarketRegime {
    pub const ALL: [MarketRegime; 5] = [
        MarketRegime::BullishTrend,
        MarketRegime::BearishTrend,
        MarketRegime::Sideways,
        MarketRegime::HighVolatility,
        MarketRegime::LowVolatility,
    ];
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketRegime::BullishTrend => "BULLISH_TREND",
            MarketRegime::BearishTrend => "BEARISH_TREND",
            MarketRegime::Sideways => "SIDEWAYS",
            MarketRegime::HighVolatility => "HIGH_VOLATILITY",
            MarketRegime::LowVolatility => "LOW_VOLATILITY",
        };
        f.write_str(s)
    }
}

impl FromStr for MarketRegime {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match norm.as_str() {
            "BULLISH_TREND" => Ok(MarketRegime::BullishTrend),
            "BEARISH_TREND" => Ok(MarketRegime::BearishTrend),
            "SIDEWAYS" => Ok(MarketRegime::Sideways),
            "HIGH_VOLATILITY" => Ok(MarketRegime::HighVolatility),
            "LOW_VOLATILITY" => Ok(MarketRegime::LowVolatility),
            other => Err(anyhow::anyhow!("Invalid MarketRegime value: {}", other)),
        }
    }
}

/// Normalizes a raw detector symbol to its base asset.
///
/// `btc/usdt`, `BTC-USDT`, `BTCUSDT` and `BINANCE:BTCUSDT` all become `BTC`.
/// A symbol that is nothing but a quote currency (`USDT`) is kept as-is.
/// Returns `None` for symbols with no base.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let upper: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | ':'))
        .collect::<String>()
        .to_ascii_uppercase();

    // `EXCHANGE:PAIR` venue prefix
    let pair = match upper.rfind(':') {
        Some(idx) => &upper[idx + 1..],
        None => upper.as_str(),
    };

    // Explicit separator: base is everything before it.
    if let Some(idx) = pair.find(['/', '-', '_']) {
        let base = &pair[..idx];
        return (!base.is_empty()).then(|| base.to_string());
    }

    if pair.is_empty() {
        return None;
    }

    let stable = QUOTE_SUFFIXES
        .iter()
        .filter_map(|q| pair.strip_suffix(q))
        .find(|base| !base.is_empty());
    let cross = || {
        CROSS_QUOTE_SUFFIXES
            .iter()
            .filter_map(|q| pair.strip_suffix(q))
            .find(|base| base.len() >= MIN_CROSS_BASE_LEN)
    };

    Some(stable.or_else(cross).unwrap_or(pair).to_string())
}
