//! Price history repository.

use crate::error::{BotError, Result};
use crate::storage::trading_day;
use crate::types::PricePoint;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const PRICE_COLUMNS: &str = "id, timestamp, price, trading_day, source, created_at";

#[derive(Clone)]
pub struct PriceRepo {
    pool: PgPool,
}

impl PriceRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a spot-price observation. The trading day is derived here.
    pub async fn record(&self, price: f64, ts: DateTime<Utc>) -> Result<PricePoint> {
        let row = sqlx::query(&format!(
            "INSERT INTO price_history (timestamp, price, trading_day, source) \
             VALUES ($1, $2, $3, $4) RETURNING {PRICE_COLUMNS}"
        ))
        .bind(ts)
        .bind(price)
        .bind(trading_day(ts))
        .bind("coingecko")
        .fetch_one(&self.pool)
        .await?;
        price_from_row(&row)
    }

    /// All observations for a trading day, oldest first.
    pub async fn get_by_day(&self, day: &str) -> Result<Vec<PricePoint>> {
        let day = parse_day(day)?;
        let rows = sqlx::query(&format!(
            "SELECT {PRICE_COLUMNS} FROM price_history \
             WHERE trading_day = $1 ORDER BY timestamp ASC"
        ))
        .bind(day)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(price_from_row).collect()
    }

    /// Distinct trading days with data, oldest first, capped at 30.
    pub async fn get_available_days(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT trading_day FROM price_history ORDER BY trading_day ASC LIMIT 30",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let day: NaiveDate = row.try_get("trading_day")?;
                Ok(day.to_string())
            })
            .collect()
    }

    /// Most recent observation, if any.
    pub async fn get_latest(&self) -> Result<Option<PricePoint>> {
        let row = sqlx::query(&format!(
            "SELECT {PRICE_COLUMNS} FROM price_history ORDER BY timestamp DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(price_from_row).transpose()
    }
}

pub(crate) fn parse_day(day: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|_| BotError::InvalidParameter(format!("invalid date {day:?}")))
}

fn price_from_row(row: &PgRow) -> Result<PricePoint> {
    let day: NaiveDate = row.try_get("trading_day")?;
    Ok(PricePoint {
        id: row.try_get("id")?,
        timestamp: row.try_get("timestamp")?,
        price: row.try_get("price")?,
        trading_day: day.to_string(),
        source: row.try_get("source")?,
        created_at: row.try_get("created_at")?,
    })
}
