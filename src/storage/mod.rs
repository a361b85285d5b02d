//! Persistence layer.
//!
//! A Postgres connection pool, migrations, the trading-day rule and one
//! repository per table. All database writes in the system flow through
//! these repositories.

mod grid;
mod prices;
mod sr;
mod trades;

pub use grid::GridStateRepo;
pub use prices::PriceRepo;
pub use sr::{ChangeAnalysis, SrRepo};
pub use trades::TradeRepo;

use crate::error::Result;
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Connect to Postgres and verify the connection with a ping.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .idle_timeout(std::time::Duration::from_secs(30))
        .max_lifetime(std::time::Duration::from_secs(300))
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(dsn)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    info!("database connection established");
    Ok(pool)
}

/// Apply pending migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// The trading day for a timestamp. Day boundary is 17:00 UTC (12:00 EST):
/// timestamps before the boundary belong to the previous calendar day.
pub fn trading_day(ts: DateTime<Utc>) -> NaiveDate {
    let cutoff = 17 * 60;
    let minutes = ts.hour() * 60 + ts.minute();

    let day = ts.date_naive();
    if minutes < cutoff {
        day - Duration::days(1)
    } else {
        day
    }
}

/// The trading day right now, formatted `YYYY-MM-DD`.
pub fn trading_day_now() -> String {
    trading_day(Utc::now()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn boundary_is_1700_utc() {
        // 16:59 belongs to the previous day, 17:00 to the current one.
        assert_eq!(
            trading_day(utc(2025, 3, 10, 16, 59)).to_string(),
            "2025-03-09"
        );
        assert_eq!(
            trading_day(utc(2025, 3, 10, 17, 0)).to_string(),
            "2025-03-10"
        );
        assert_eq!(
            trading_day(utc(2025, 3, 10, 17, 1)).to_string(),
            "2025-03-10"
        );
    }

    #[test]
    fn midnight_belongs_to_previous_day() {
        assert_eq!(
            trading_day(utc(2025, 3, 10, 0, 0)).to_string(),
            "2025-03-09"
        );
        assert_eq!(
            trading_day(utc(2025, 3, 10, 23, 59)).to_string(),
            "2025-03-10"
        );
    }

    #[test]
    fn boundary_crosses_month_and_year() {
        assert_eq!(
            trading_day(utc(2025, 3, 1, 2, 0)).to_string(),
            "2025-02-28"
        );
        assert_eq!(
            trading_day(utc(2025, 1, 1, 12, 0)).to_string(),
            "2024-12-31"
        );
    }

    #[test]
    fn formatting_is_iso_date() {
        let day = trading_day(utc(2025, 3, 10, 18, 0));
        assert_eq!(day.to_string(), "2025-03-10");
    }
}
