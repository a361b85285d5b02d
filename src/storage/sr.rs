//! Support/resistance history repository.

use crate::error::Result;
use crate::strategy::sr_change_percent;
use crate::types::{NewSrSample, SrSample};
use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const SR_COLUMNS: &str = "id, timestamp, method, lookback_days, support, resistance, midpoint, \
                          avg_price, grid_recalculated, created_at";

#[derive(Clone)]
pub struct SrRepo {
    pool: PgPool,
}

/// Comparison of a fresh midpoint against the latest persisted sample.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAnalysis {
    pub has_changed: bool,
    pub change_percent: Option<f64>,
    #[serde(skip_serializing)]
    pub previous: Option<SrSample>,
    pub reason: String,
}

impl SrRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an S/R sample.
    pub async fn record(&self, sample: &NewSrSample) -> Result<SrSample> {
        let row = sqlx::query(&format!(
            "INSERT INTO support_resistance_history \
             (timestamp, method, lookback_days, support, resistance, midpoint, avg_price, grid_recalculated) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8) \
             RETURNING {SR_COLUMNS}"
        ))
        .bind(sample.timestamp)
        .bind(&sample.method)
        .bind(sample.lookback_days)
        .bind(sample.support)
        .bind(sample.resistance)
        .bind(sample.midpoint)
        .bind(sample.avg_price)
        .bind(sample.grid_recalculated)
        .fetch_one(&self.pool)
        .await?;
        sr_from_row(&row)
    }

    /// Most recent sample, if any.
    pub async fn get_latest(&self) -> Result<Option<SrSample>> {
        let row = sqlx::query(&format!(
            "SELECT {SR_COLUMNS} FROM support_resistance_history ORDER BY timestamp DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(sr_from_row).transpose()
    }

    /// Recent samples, newest first.
    pub async fn get_history(&self, limit: i64) -> Result<Vec<SrSample>> {
        let rows = sqlx::query(&format!(
            "SELECT {SR_COLUMNS} FROM support_resistance_history ORDER BY timestamp DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(sr_from_row).collect()
    }

    /// True when no sample exists or the latest one is older than
    /// `refresh_hours`.
    pub async fn needs_refresh(&self, refresh_hours: i64) -> Result<bool> {
        match self.get_latest().await? {
            None => Ok(true),
            Some(latest) => Ok(Utc::now() - latest.timestamp >= Duration::hours(refresh_hours)),
        }
    }

    /// Compare a fresh midpoint against the latest persisted sample. Absence
    /// of a previous sample counts as a change.
    pub async fn check_significant_change(
        &self,
        new_midpoint: f64,
        threshold_percent: f64,
    ) -> Result<ChangeAnalysis> {
        let previous = self.get_latest().await?;
        let Some(previous) = previous else {
            return Ok(ChangeAnalysis {
                has_changed: true,
                change_percent: None,
                previous: None,
                reason: "first S/R fetch".to_string(),
            });
        };

        let pct = sr_change_percent(new_midpoint, previous.midpoint);
        let changed = pct >= threshold_percent;
        let reason = if changed {
            format!("midpoint changed {pct:.2}%")
        } else {
            "S/R stable".to_string()
        };

        Ok(ChangeAnalysis {
            has_changed: changed,
            change_percent: Some(pct),
            previous: Some(previous),
            reason,
        })
    }
}

fn sr_from_row(row: &PgRow) -> Result<SrSample> {
    Ok(SrSample {
        id: row.try_get("id")?,
        timestamp: row.try_get("timestamp")?,
        method: row.try_get("method")?,
        lookback_days: row.try_get("lookback_days")?,
        support: row.try_get("support")?,
        resistance: row.try_get("resistance")?,
        midpoint: row.try_get("midpoint")?,
        avg_price: row.try_get("avg_price")?,
        grid_recalculated: row.try_get("grid_recalculated")?,
        created_at: row.try_get("created_at")?,
    })
}
