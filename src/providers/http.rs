//! Shared HTTP plumbing for provider adapters: per-call timeout, bounded
//! retry with jittered exponential backoff, and a sliding-window rate
//! limiter with preemptive and reactive waits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::ProviderError;
use crate::providers::ProviderStats;

/// Total attempts per request, including the first.
const MAX_ATTEMPTS: u32 = 4;
const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_JITTER_MS: u64 = 250;
/// Wait applied to a 429 that carries no Retry-After header.
const RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max_requests: usize,
    pub window: Duration,
}

impl RateLimit {
    pub fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests: max_requests as usize,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    retries: AtomicU64,
    preemptive_waits: AtomicU64,
    rate_limit_waits: AtomicU64,
    failures: AtomicU64,
}

/// Sliding-window request limiter. Saturation makes the caller wait until
/// the oldest request leaves the window.
pub(crate) struct SlidingWindow {
    limit: RateLimit,
    sent: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            sent: Mutex::new(VecDeque::with_capacity(limit.max_requests)),
        }
    }

    /// Reserve a slot, sleeping while the window is saturated. Returns the
    /// number of preemptive waits taken.
    async fn acquire(&self, cancel: &CancellationToken) -> Result<u64, ProviderError> {
        let mut waits = 0u64;
        loop {
            let wait_for = {
                let mut sent = self.sent.lock().await;
                let now = Instant::now();
                while let Some(front) = sent.front() {
                    if now.duration_since(*front) >= self.limit.window {
                        sent.pop_front();
                    } else {
                        break;
                    }
                }
                if sent.len() < self.limit.max_requests {
                    sent.push_back(now);
                    return Ok(waits);
                }
                // Oldest in-window request decides how long until a slot frees
                self.limit.window - now.duration_since(*sent.front().expect("window saturated"))
            };

            waits += 1;
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Canceled),
                _ = tokio::time::sleep(wait_for) => {}
            }
        }
    }
}

/// HTTP client owned by exactly one adapter.
pub struct ProviderHttpClient {
    provider: String,
    client: reqwest::Client,
    window: SlidingWindow,
    counters: Counters,
}

impl ProviderHttpClient {
    pub fn new(provider: impl Into<String>, limit: RateLimit) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("teamarr/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            provider: provider.into(),
            client,
            window: SlidingWindow::new(limit),
            counters: Counters::default(),
        }
    }

    /// GET a JSON document. Returns `Ok(None)` on 404. Retries transient
    /// failures with backoff; waits out rate limits.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, ProviderError> {
        let mut last_error = ProviderError::transient("request not attempted");

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                self.counters.retries.fetch_add(1, Ordering::Relaxed);
            }

            let waits = self.window.acquire(cancel).await?;
            self.counters
                .preemptive_waits
                .fetch_add(waits, Ordering::Relaxed);
            self.counters.requests.fetch_add(1, Ordering::Relaxed);

            match self.send(url, cancel).await {
                Ok(Some(body)) => {
                    return serde_json::from_str::<T>(&body).map(Some).map_err(|e| {
                        self.counters.failures.fetch_add(1, Ordering::Relaxed);
                        ProviderError::permanent(
                            None,
                            format!("{}: malformed payload from {url}: {e}", self.provider),
                        )
                    });
                }
                Ok(None) => return Ok(None),
                Err(e) if e.is_retriable() => {
                    let backoff = match &e {
                        ProviderError::RateLimited { retry_after } => {
                            self.counters.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
                            retry_after.unwrap_or(RATE_LIMIT_FALLBACK)
                        }
                        _ => backoff_with_jitter(attempt),
                    };
                    debug!(
                        provider = %self.provider,
                        attempt,
                        wait_ms = backoff.as_millis() as u64,
                        "Retrying after transient failure: {e}"
                    );
                    last_error = e;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ProviderError::Canceled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => {
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            }
        }

        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            provider = %self.provider,
            url,
            "Retry budget exhausted: {last_error}"
        );
        // Rate limits are waited out, never surfaced; a provider that kept
        // answering 429 past the budget reads as a transient outage
        if let ProviderError::RateLimited { .. } = last_error {
            return Err(ProviderError::transient(format!(
                "{url}: rate limited past the retry budget"
            )));
        }
        Err(last_error)
    }

    /// One attempt: classify the response into body / missing / error kinds.
    async fn send(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ProviderError> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Canceled),
            result = self.client.get(url).send() => result.map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    ProviderError::transient(format!("{url}: {e}"))
                } else {
                    ProviderError::permanent(None, format!("{url}: {e}"))
                }
            })?,
        };

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(ProviderError::RateLimited { retry_after })
            }
            s if s.is_server_error() => Err(ProviderError::transient(format!(
                "{url}: HTTP {}",
                s.as_u16()
            ))),
            s if s.is_client_error() => Err(ProviderError::permanent(
                Some(s.as_u16()),
                format!("{url}: {}", s.canonical_reason().unwrap_or("client error")),
            )),
            _ => {
                let body = tokio::select! {
                    _ = cancel.cancelled() => return Err(ProviderError::Canceled),
                    body = response.text() => {
                        body.map_err(|e| ProviderError::transient(format!("{url}: {e}")))?
                    }
                };
                Ok(Some(body))
            }
        }
    }

    pub fn stats(&self) -> ProviderStats {
        ProviderStats {
            provider: self.provider.clone(),
            requests: self.counters.requests.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            preemptive_waits: self.counters.preemptive_waits.load(Ordering::Relaxed),
            rate_limit_waits: self.counters.rate_limit_waits.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.requests.store(0, Ordering::Relaxed);
        self.counters.retries.store(0, Ordering::Relaxed);
        self.counters.preemptive_waits.store(0, Ordering::Relaxed);
        self.counters.rate_limit_waits.store(0, Ordering::Relaxed);
        self.counters.failures.store(0, Ordering::Relaxed);
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = BACKOFF_BASE * 2u32.saturating_pow(attempt);
    base + Duration::from_millis(fastrand::u64(0..BACKOFF_JITTER_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        for attempt in 0..3 {
            let low = BACKOFF_BASE * 2u32.pow(attempt);
            let high = low + Duration::from_millis(BACKOFF_JITTER_MS);
            let backoff = backoff_with_jitter(attempt);
            assert!(backoff >= low && backoff <= high, "attempt {attempt}: {backoff:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn window_saturation_blocks_extra_requests() {
        let window = SlidingWindow::new(RateLimit::per_minute(30));
        let cancel = CancellationToken::new();

        let started = Instant::now();
        let mut total_waits = 0;
        // 31 requests in a tight loop: the 31st must wait out the window
        for _ in 0..31 {
            total_waits += window.acquire(&cancel).await.unwrap();
        }
        let elapsed = started.elapsed();

        assert!(total_waits >= 1, "31st request should have waited");
        assert!(
            elapsed >= Duration::from_secs(60),
            "expected to wait a full window, waited {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn window_frees_slots_as_they_age_out() {
        let window = SlidingWindow::new(RateLimit {
            max_requests: 2,
            window: Duration::from_secs(10),
        });
        let cancel = CancellationToken::new();

        assert_eq!(window.acquire(&cancel).await.unwrap(), 0);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(window.acquire(&cancel).await.unwrap(), 0);

        // Window full; next slot frees when the first request ages out (t=10)
        let before = Instant::now();
        let waits = window.acquire(&cancel).await.unwrap();
        assert!(waits >= 1);
        assert!(before.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test]
    async fn acquire_honors_cancellation() {
        let window = SlidingWindow::new(RateLimit {
            max_requests: 1,
            window: Duration::from_secs(3600),
        });
        let cancel = CancellationToken::new();
        window.acquire(&cancel).await.unwrap();

        cancel.cancel();
        let result = window.acquire(&cancel).await;
        assert!(matches!(result, Err(ProviderError::Canceled)));
    }

    #[tokio::test]
    async fn counters_reset() {
        let client = ProviderHttpClient::new("test", RateLimit::per_minute(30));
        client.counters.requests.fetch_add(5, Ordering::Relaxed);
        client.counters.retries.fetch_add(2, Ordering::Relaxed);
        assert_eq!(client.stats().requests, 5);

        client.reset_stats();
        let stats = client.stats();
        assert_eq!(stats.requests, 0);
        assert_eq!(stats.retries, 0);
    }
}
