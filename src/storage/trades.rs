//! Trade history repository.

use crate::error::Result;
use crate::risk::DailyTradeCounter;
use crate::storage::prices::parse_day;
use crate::storage::trading_day;
use crate::types::{NewTrade, Trade, TradeStats};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const TRADE_COLUMNS: &str = "id, timestamp, trading_day, side, price, quantity, usd_value, \
                             grid_level, tx_hash, is_paper_trade, slippage_percent, gas_cost_eth, \
                             created_at";

#[derive(Clone)]
pub struct TradeRepo {
    pool: PgPool,
}

impl TradeRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a trade. The trading day is derived from the trade timestamp.
    pub async fn record(&self, trade: &NewTrade) -> Result<Trade> {
        let row = sqlx::query(&format!(
            "INSERT INTO trade_history \
             (timestamp, trading_day, side, price, quantity, usd_value, \
              grid_level, tx_hash, is_paper_trade, slippage_percent, gas_cost_eth) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11) \
             RETURNING {TRADE_COLUMNS}"
        ))
        .bind(trade.timestamp)
        .bind(trading_day(trade.timestamp))
        .bind(trade.side.as_str())
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.usd_value)
        .bind(trade.grid_level)
        .bind(trade.tx_hash.as_deref())
        .bind(trade.is_paper_trade)
        .bind(trade.slippage_percent)
        .bind(trade.gas_cost_eth)
        .fetch_one(&self.pool)
        .await?;
        trade_from_row(&row)
    }

    /// Trades for a trading day, oldest first. `paper_mode` filters by
    /// `is_paper_trade` when set.
    pub async fn get_by_day(&self, day: &str, paper_mode: Option<bool>) -> Result<Vec<Trade>> {
        let day = parse_day(day)?;
        let rows = match paper_mode {
            Some(paper) => {
                sqlx::query(&format!(
                    "SELECT {TRADE_COLUMNS} FROM trade_history \
                     WHERE trading_day = $1 AND is_paper_trade = $2 ORDER BY timestamp ASC"
                ))
                .bind(day)
                .bind(paper)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {TRADE_COLUMNS} FROM trade_history \
                     WHERE trading_day = $1 ORDER BY timestamp ASC"
                ))
                .bind(day)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(trade_from_row).collect()
    }

    /// Most recent trades, newest first.
    pub async fn get_all(&self, limit: i64, paper_mode: Option<bool>) -> Result<Vec<Trade>> {
        let rows = match paper_mode {
            Some(paper) => {
                sqlx::query(&format!(
                    "SELECT {TRADE_COLUMNS} FROM trade_history \
                     WHERE is_paper_trade = $1 ORDER BY timestamp DESC LIMIT $2"
                ))
                .bind(paper)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {TRADE_COLUMNS} FROM trade_history \
                     ORDER BY timestamp DESC LIMIT $1"
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(trade_from_row).collect()
    }

    /// Aggregate statistics across all recorded trades.
    pub async fn get_stats(&self, paper_mode: Option<bool>) -> Result<TradeStats> {
        const AGGREGATES: &str = "COUNT(*) AS total_trades, \
             COUNT(CASE WHEN side = 'buy' THEN 1 END) AS buy_count, \
             COUNT(CASE WHEN side = 'sell' THEN 1 END) AS sell_count, \
             SUM(usd_value) AS total_volume, \
             AVG(price) AS avg_price, \
             MIN(timestamp) AS first_trade, \
             MAX(timestamp) AS last_trade";

        let row = match paper_mode {
            Some(paper) => {
                sqlx::query(&format!(
                    "SELECT {AGGREGATES} FROM trade_history WHERE is_paper_trade = $1"
                ))
                .bind(paper)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("SELECT {AGGREGATES} FROM trade_history"))
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        Ok(TradeStats {
            total_trades: row.try_get("total_trades")?,
            buy_count: row.try_get("buy_count")?,
            sell_count: row.try_get("sell_count")?,
            total_volume: row.try_get("total_volume")?,
            avg_price: row.try_get("avg_price")?,
            first_trade: row.try_get("first_trade")?,
            last_trade: row.try_get("last_trade")?,
        })
    }

    /// Number of trades in the current trading day.
    pub async fn count_today_inner(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM trade_history WHERE trading_day = $1")
            .bind(trading_day(Utc::now()))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }
}

#[async_trait]
impl DailyTradeCounter for TradeRepo {
    async fn count_today(&self) -> Result<i64> {
        self.count_today_inner().await
    }
}

fn trade_from_row(row: &PgRow) -> Result<Trade> {
    let day: NaiveDate = row.try_get("trading_day")?;
    let side: String = row.try_get("side")?;
    Ok(Trade {
        id: row.try_get("id")?,
        timestamp: row.try_get("timestamp")?,
        trading_day: day.to_string(),
        side: side.parse()?,
        price: row.try_get("price")?,
        quantity: row.try_get("quantity")?,
        usd_value: row.try_get("usd_value")?,
        grid_level: row.try_get("grid_level")?,
        tx_hash: row.try_get("tx_hash")?,
        is_paper_trade: row.try_get("is_paper_trade")?,
        slippage_percent: row.try_get("slippage_percent")?,
        gas_cost_eth: row.try_get("gas_cost_eth")?,
        created_at: row.try_get("created_at")?,
    })
}
