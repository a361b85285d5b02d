//! Webhook notifier.
//!
//! Fire-and-forget text messages to a Discord- or Slack-style webhook. Every
//! message is mirrored to the log; delivery failures are logged and dropped.

use crate::client::retry::{send_with_retry, RetryPolicy};
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Notifier {
    webhook_url: String,
    bot_name: String,
    http: Client,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl Notifier {
    pub fn new(webhook_url: &str, bot_name: &str, cancel: CancellationToken) -> Self {
        let bot_name = if bot_name.is_empty() {
            "GridTrader"
        } else {
            bot_name
        };
        Self {
            webhook_url: webhook_url.to_string(),
            bot_name: bot_name.to_string(),
            http: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            retry: RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(5)),
            cancel,
        }
    }

    /// A notifier with no webhook configured; messages only reach the log.
    pub fn disabled() -> Self {
        Self::new("", "", CancellationToken::new())
    }

    pub fn enabled(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    /// Send a message. Failures are logged, never propagated.
    pub async fn send(&self, msg: &str) {
        let formatted = format!("[{}] {}", self.bot_name, msg);
        info!("{formatted}");

        if self.webhook_url.is_empty() {
            return;
        }

        let payload = self.format_payload(&formatted);
        let send = send_with_retry(&self.retry, &self.cancel, || {
            self.http.post(&self.webhook_url).json(&payload)
        });

        match tokio::time::timeout(Duration::from_secs(30), send).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to send notification after retries"),
            Err(_) => warn!("notification send timed out"),
        }
    }

    fn format_payload(&self, msg: &str) -> serde_json::Value {
        if self.webhook_url.contains("discord") {
            serde_json::json!({ "content": msg, "username": self.bot_name })
        } else {
            serde_json::json!({ "text": format!("`{msg}`"), "username": self.bot_name })
        }
    }
}
