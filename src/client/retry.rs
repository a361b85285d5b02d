//! Exponential-backoff retry for idempotent outbound HTTP calls.

use crate::error::{BotError, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }
}

/// Execute an HTTP request with exponential backoff.
///
/// `build` is called on every attempt to produce a fresh request, since
/// request bodies are consumed per attempt. A response counts as success
/// when the transport succeeded and the status is below 500; 4xx responses
/// are returned to the caller without retrying. Cancellation during the
/// backoff wait aborts the chain with [`BotError::Cancelled`].
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    build: F,
) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.base_delay;
    let mut last_err = String::new();

    for attempt in 1..=max_attempts {
        match build().send().await {
            Ok(resp) if resp.status().as_u16() < 500 => return Ok(resp),
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                let snippet: String = body.chars().take(512).collect();
                last_err = format!("HTTP {status}: {snippet}");
            }
            Err(e) => last_err = e.to_string(),
        }

        if attempt == max_attempts {
            break;
        }

        warn!(
            attempt,
            max_attempts,
            error = %last_err,
            delay_ms = delay.as_millis() as u64,
            "request failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(BotError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = (delay * 2).min(policy.max_delay);
    }

    Err(BotError::RetriesExhausted {
        attempts: max_attempts,
        last: last_err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::get, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn spawn_server(status: StatusCode) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/",
                get(
                    move |State(hits): State<Arc<AtomicUsize>>| async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        status
                    },
                ),
            )
            .with_state(hits.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/"), hits)
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(
            3,
            Duration::from_millis(20),
            Duration::from_millis(80),
        )
    }

    #[tokio::test]
    async fn persistent_5xx_exhausts_all_attempts() {
        let (url, hits) = spawn_server(StatusCode::INTERNAL_SERVER_ERROR).await;
        let http = reqwest::Client::new();
        let cancel = CancellationToken::new();

        let err = send_with_retry(&fast_policy(), &cancel, || http.get(&url))
            .await
            .unwrap_err();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        match err {
            BotError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(last.contains("500"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_error_returns_immediately() {
        let (url, hits) = spawn_server(StatusCode::NOT_FOUND).await;
        let http = reqwest::Client::new();
        let cancel = CancellationToken::new();

        let resp = send_with_retry(&fast_policy(), &cancel, || http.get(&url))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_after_transient_failure() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        StatusCode::SERVICE_UNAVAILABLE
                    } else {
                        StatusCode::OK
                    }
                }),
            )
            .with_state(hits.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let url = format!("http://{addr}/");

        let http = reqwest::Client::new();
        let cancel = CancellationToken::new();
        let resp = send_with_retry(&fast_policy(), &cancel, || http.get(&url))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_aborts_the_chain() {
        let (url, hits) = spawn_server(StatusCode::INTERNAL_SERVER_ERROR).await;
        let http = reqwest::Client::new();
        let cancel = CancellationToken::new();

        // Long backoff so the cancel lands inside the wait.
        let policy = RetryPolicy::new(3, Duration::from_secs(30), Duration::from_secs(30));

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        let started = std::time::Instant::now();
        let err = send_with_retry(&policy, &cancel, || http.get(&url))
            .await
            .unwrap_err();

        assert!(matches!(err, BotError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
