//! Support/resistance analytics client.
//!
//! Submits a SQL-shaped query to the analytics API, polls the execution to
//! completion and extracts the S/R band. Results are cached in memory for
//! the configured TTL so the scheduler and the bot can share one client
//! without hammering the provider.

use crate::client::retry::{send_with_retry, RetryPolicy};
use crate::error::{BotError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_BASE_URL: &str = "https://api.dune.com/api/v1";
const API_KEY_HEADER: &str = "X-Dune-API-Key";
const POLL_MAX_ATTEMPTS: u32 = 30;

/// A fetched support/resistance band. Runtime-only; the scheduler persists
/// its own sample record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SrResult {
    pub support: f64,
    pub resistance: f64,
    pub midpoint: f64,
    pub avg_price: f64,
    pub method: String,
    pub lookback_days: i32,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AnalyticsOptions {
    pub method: String,
    pub lookback_days: i32,
    pub refresh_hours: i64,
}

pub struct AnalyticsClient {
    api_key: String,
    base_url: String,
    method: String,
    lookback_days: i32,
    http: Client,
    retry: RetryPolicy,
    poll_interval: Duration,
    cache_ttl: ChronoDuration,
    cache: Mutex<Option<SrResult>>,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    execution_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    state: String,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct ResultsResponse {
    result: Option<ResultRows>,
    rows: Option<Vec<serde_json::Map<String, serde_json::Value>>>,
}

#[derive(Debug, Deserialize)]
struct ResultRows {
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

impl AnalyticsClient {
    pub fn new(api_key: &str, opts: AnalyticsOptions) -> Result<Self> {
        let method = if opts.method.is_empty() {
            "simple".to_string()
        } else {
            opts.method
        };
        let lookback_days = if opts.lookback_days <= 0 {
            14
        } else {
            opts.lookback_days
        };
        let refresh_hours = if opts.refresh_hours <= 0 {
            48
        } else {
            opts.refresh_hours
        };

        let http = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            method,
            lookback_days,
            http,
            retry: RetryPolicy::new(3, Duration::from_secs(3), Duration::from_secs(15)),
            poll_interval: Duration::from_secs(2),
            cache_ttl: ChronoDuration::hours(refresh_hours),
            cache: Mutex::new(None),
        })
    }

    /// Point the client at a different endpoint. Used by tests.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Shorten the status poll interval. Used by tests.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Fetch the current S/R band, serving from the in-memory cache when it
    /// is fresh and `force_refresh` is not set.
    pub async fn fetch_support_resistance(
        &self,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<SrResult> {
        if !force_refresh {
            let cached = self.cache.lock().expect("cache lock poisoned").clone();
            if let Some(sr) = cached {
                let age = Utc::now() - sr.fetched_at;
                if age < self.cache_ttl {
                    debug!(age_min = age.num_minutes(), "using cached S/R data");
                    return Ok(sr);
                }
            }
        }

        let sql = self.build_sr_query();
        let rows = self.execute_query(&sql, cancel).await?;
        let row = rows
            .first()
            .ok_or_else(|| BotError::Upstream("analytics returned no data for S/R query".into()))?;

        let result = SrResult {
            support: json_float(row, "support"),
            resistance: json_float(row, "resistance"),
            midpoint: json_float(row, "midpoint"),
            avg_price: json_float(row, "avg_price"),
            method: self.method.clone(),
            lookback_days: self.lookback_days,
            fetched_at: Utc::now(),
        };

        if result.support.is_nan() || result.resistance.is_nan() || result.midpoint.is_nan() {
            return Err(BotError::Upstream("invalid S/R data from analytics".into()));
        }
        if result.support >= result.resistance {
            return Err(BotError::Upstream(format!(
                "invalid S/R range: support {:.2} >= resistance {:.2}",
                result.support, result.resistance
            )));
        }

        *self.cache.lock().expect("cache lock poisoned") = Some(result.clone());

        info!(
            support = result.support,
            resistance = result.resistance,
            midpoint = result.midpoint,
            method = %result.method,
            lookback_days = result.lookback_days,
            "S/R fetched"
        );

        Ok(result)
    }

    /// Pre-populate the cache from a previously persisted S/R result (loaded
    /// from the database on startup). Entries older than the TTL are ignored.
    pub fn seed_cache(&self, sr: SrResult) {
        let age = Utc::now() - sr.fetched_at;
        if age >= self.cache_ttl {
            debug!(
                age_hours = age.num_hours(),
                "persisted S/R data too old, not seeding cache"
            );
            return;
        }

        info!(
            age_min = age.num_minutes(),
            midpoint = sr.midpoint,
            "S/R cache seeded from database"
        );
        *self.cache.lock().expect("cache lock poisoned") = Some(sr);
    }

    /// True when the cache is empty or stale.
    pub fn needs_refresh(&self) -> bool {
        match self.cache.lock().expect("cache lock poisoned").as_ref() {
            None => true,
            Some(sr) => Utc::now() - sr.fetched_at >= self.cache_ttl,
        }
    }

    fn build_sr_query(&self) -> String {
        if self.method == "percentile" {
            return format!(
                "SELECT \
                 approx_percentile(price, 0.05) as support, \
                 approx_percentile(price, 0.95) as resistance, \
                 approx_percentile(price, 0.50) as midpoint, \
                 AVG(price) as avg_price, \
                 MIN(price) as absolute_low, \
                 MAX(price) as absolute_high \
                 FROM prices.usd \
                 WHERE symbol = 'WETH' \
                 AND blockchain = 'ethereum' \
                 AND minute > now() - interval '{}' day",
                self.lookback_days
            );
        }

        format!(
            "SELECT \
             MIN(price) as support, \
             MAX(price) as resistance, \
             (MIN(price) + MAX(price)) / 2 as midpoint, \
             AVG(price) as avg_price \
             FROM prices.usd \
             WHERE symbol = 'WETH' \
             AND blockchain = 'ethereum' \
             AND minute > now() - interval '{}' day",
            self.lookback_days
        )
    }

    async fn execute_query(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
        if self.api_key.is_empty() {
            return Err(BotError::Upstream("analytics API key not configured".into()));
        }

        debug!("submitting S/R query");
        let body = serde_json::json!({ "sql": sql, "performance": "medium" });
        let url = format!("{}/sql/execute", self.base_url);

        let resp = send_with_retry(&self.retry, cancel, || {
            self.http
                .post(&url)
                .header(API_KEY_HEADER, &self.api_key)
                .json(&body)
        })
        .await?;

        if !resp.status().is_success() {
            return Err(BotError::Upstream(format!(
                "query execution failed: status {}",
                resp.status()
            )));
        }

        let exec: ExecuteResponse = resp.json().await?;
        if exec.execution_id.is_empty() {
            return Err(BotError::Upstream(
                "analytics did not return an execution ID".into(),
            ));
        }
        debug!(execution_id = %exec.execution_id, "query submitted");

        for attempt in 1..=POLL_MAX_ATTEMPTS {
            tokio::select! {
                _ = cancel.cancelled() => return Err(BotError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let status_url = format!(
                "{}/execution/{}/status",
                self.base_url, exec.execution_id
            );
            let status_resp = match self
                .http
                .get(&status_url)
                .header(API_KEY_HEADER, &self.api_key)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(attempt, error = %e, "status check failed, retrying");
                    continue;
                }
            };

            let status: StatusResponse = status_resp.json().await.unwrap_or(StatusResponse {
                state: String::new(),
                error: String::new(),
            });

            match status.state.as_str() {
                "QUERY_STATE_COMPLETED" | "completed" => {
                    return self.fetch_results(&exec.execution_id, cancel).await;
                }
                "QUERY_STATE_FAILED" | "failed" => {
                    let msg = if status.error.is_empty() {
                        "unknown error".to_string()
                    } else {
                        status.error
                    };
                    return Err(BotError::Upstream(format!("analytics query failed: {msg}")));
                }
                state => debug!(state, "query still running"),
            }
        }

        Err(BotError::Upstream(format!(
            "analytics query timed out after {} seconds",
            POLL_MAX_ATTEMPTS as u64 * self.poll_interval.as_secs()
        )))
    }

    async fn fetch_results(
        &self,
        execution_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
        let url = format!("{}/execution/{}/results", self.base_url, execution_id);
        let resp = send_with_retry(&self.retry, cancel, || {
            self.http.get(&url).header(API_KEY_HEADER, &self.api_key)
        })
        .await?;

        if !resp.status().is_success() {
            return Err(BotError::Upstream(format!(
                "failed to fetch analytics results: status {}",
                resp.status()
            )));
        }

        let data: ResultsResponse = resp.json().await?;
        Ok(data
            .result
            .map(|r| r.rows)
            .or(data.rows)
            .unwrap_or_default())
    }
}

/// Extract a float field from a result row; NaN when missing or non-numeric.
fn json_float(row: &serde_json::Map<String, serde_json::Value>, key: &str) -> f64 {
    row.get(key).and_then(|v| v.as_f64()).unwrap_or(f64::NAN)
}
