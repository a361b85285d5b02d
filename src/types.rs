//! Persisted domain records.
//!
//! These mirror the four database tables plus the paper-wallet columns that
//! live inside the active `grid_state` row. All wire serialization is
//! camelCase to match the read API.

use crate::error::BotError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Order side for a grid level or trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(BotError::InvalidParameter(format!(
                "unknown side {other:?}, expected buy|sell"
            ))),
        }
    }
}

/// A single spot-price observation. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub trading_day: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// An executed trade (paper or live). Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub trading_day: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub usd_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub is_paper_trade: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slippage_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_cost_eth: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Input for recording a trade; the repository fills id, trading day and
/// creation time.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub usd_value: f64,
    pub grid_level: Option<i32>,
    pub tx_hash: Option<String>,
    pub is_paper_trade: bool,
    pub slippage_percent: Option<f64>,
    pub gas_cost_eth: Option<f64>,
}

/// Aggregate trade statistics for the read API.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeStats {
    pub total_trades: i64,
    pub buy_count: i64,
    pub sell_count: i64,
    pub total_volume: Option<f64>,
    pub avg_price: Option<f64>,
    pub first_trade: Option<DateTime<Utc>>,
    pub last_trade: Option<DateTime<Utc>>,
}

/// A persisted support/resistance sample. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SrSample {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub lookback_days: i32,
    pub support: f64,
    pub resistance: f64,
    pub midpoint: f64,
    pub avg_price: Option<f64>,
    pub grid_recalculated: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for recording an S/R sample.
#[derive(Debug, Clone)]
pub struct NewSrSample {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub lookback_days: i32,
    pub support: f64,
    pub resistance: f64,
    pub midpoint: f64,
    pub avg_price: Option<f64>,
    pub grid_recalculated: bool,
}

/// A persisted grid-state row. At most one row is active at a time.
#[derive(Debug, Clone)]
pub struct GridStateRecord {
    pub id: i64,
    pub base_price: Option<f64>,
    pub grid_levels: Option<serde_json::Value>,
    pub trades_executed: i32,
    pub total_profit: f64,
    pub last_sr_refresh: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Paper wallet columns (NULL in live mode)
    pub paper_eth_balance: Option<f64>,
    pub paper_usdc_balance: Option<f64>,
    pub paper_total_gas_spent: Option<f64>,
    pub paper_trades: Option<serde_json::Value>,
    pub paper_start_time: Option<DateTime<Utc>>,
    pub paper_initial_eth: Option<f64>,
    pub paper_initial_usdc: Option<f64>,
}

/// Input for saving a new active grid-state row.
#[derive(Debug, Clone)]
pub struct NewGridState {
    pub base_price: Option<f64>,
    pub grid_levels: serde_json::Value,
    pub trades_executed: i32,
    pub total_profit: f64,
    pub last_sr_refresh: Option<DateTime<Utc>>,
}

/// Snapshot of the paper wallet as stored in the active grid-state row.
#[derive(Debug, Clone)]
pub struct PaperWalletState {
    pub eth_balance: f64,
    pub usdc_balance: f64,
    pub total_gas_spent: f64,
    pub trades: serde_json::Value,
    pub start_time: Option<DateTime<Utc>>,
    pub initial_eth: f64,
    pub initial_usdc: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Side::Buy).unwrap(), "\"buy\"");
        assert_eq!(serde_json::to_string(&Side::Sell).unwrap(), "\"sell\"");
    }

    #[test]
    fn side_round_trips_from_str() {
        assert_eq!("buy".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("sell".parse::<Side>().unwrap(), Side::Sell);
        assert!("hold".parse::<Side>().is_err());
    }
}
