//! Spot-price client.
//!
//! Fetches the current USD price of ETH from a CoinGecko-compatible
//! `simple/price` endpoint.

use crate::client::retry::{send_with_retry, RetryPolicy};
use crate::error::{BotError, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

#[derive(Clone)]
pub struct SpotPriceClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct SimplePriceResponse {
    ethereum: QuoteEntry,
}

#[derive(Debug, Deserialize)]
struct QuoteEntry {
    usd: f64,
}

impl SpotPriceClient {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            retry: RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(10)),
        })
    }

    /// Point the client at a different endpoint. Used by tests.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Current ETH price in USD.
    pub async fn eth_price(&self, cancel: &CancellationToken) -> Result<f64> {
        let url = format!(
            "{}/simple/price?ids=ethereum&vs_currencies=usd",
            self.base_url
        );
        let resp = send_with_retry(&self.retry, cancel, || self.http.get(&url)).await?;

        if !resp.status().is_success() {
            return Err(BotError::Upstream(format!(
                "spot price endpoint returned status {}",
                resp.status()
            )));
        }

        let data: SimplePriceResponse = resp.json().await?;
        if data.ethereum.usd <= 0.0 {
            return Err(BotError::Upstream(format!(
                "invalid spot price: {}",
                data.ethereum.usd
            )));
        }

        Ok(data.ethereum.usd)
    }
}
