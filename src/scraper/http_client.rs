use crate::config::ScraperConfig;
use crate::error::FetchError;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

pub struct HttpClient {
    inner: reqwest::Client,
    timeout: Duration,
    retry_delay_ms: u64,
    max_retries: usize,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(timeout)
            .gzip(true)
            // The portal hands out a session cookie on first contact
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            timeout,
            retry_delay_ms: config.retry_delay_ms,
            max_retries: config.max_retries,
        })
    }

    /// GET a page as text. Transient failures (transport errors, timeouts,
    /// 429 and 5xx) are retried with jittered exponential backoff.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.retry_delay_ms.max(1))
            .max_delay(MAX_BACKOFF)
            .map(jitter)
            .take(self.max_retries);

        let mut attempt = 0u32;
        retry_transient(strategy, || {
            attempt += 1;
            self.get_once(url, attempt)
        })
        .await
    }

    async fn get_once(&self, url: &str, attempt: u32) -> Result<String, FetchError> {
        debug!("GET {} (attempt {})", url, attempt);

        let resp = self
            .inner
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        resp.text().await.map_err(|e| self.transport_error(url, e))
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                source: e,
            }
        }
    }
}

/// Runs `action` until it succeeds, fails permanently, or `strategy` runs out
/// of delays.
async fn retry_transient<S, A, Fut>(strategy: S, action: A) -> Result<String, FetchError>
where
    S: IntoIterator<Item = Duration>,
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<String, FetchError>>,
{
    RetryIf::start(strategy, action, |e: &FetchError| {
        let retry = e.is_transient();
        if retry {
            warn!("{} (will retry)", e);
        }
        retry
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn status(code: u16) -> FetchError {
        FetchError::Status { status: code, url: "http://lsf.test/day".into() }
    }

    fn no_wait(retries: usize) -> impl Iterator<Item = Duration> {
        std::iter::repeat(Duration::ZERO).take(retries)
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = &AtomicUsize::new(0);
        let result = retry_transient(no_wait(2), || async move {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(status(503)),
                1 => Err(status(429)),
                _ => Ok("<h2>Montag, 01.12.2025</h2>".to_string()),
            }
        })
        .await;

        assert_eq!(result.unwrap(), "<h2>Montag, 01.12.2025</h2>");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = &AtomicUsize::new(0);
        let result = retry_transient(no_wait(2), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(status(404))
        })
        .await;

        assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = &AtomicUsize::new(0);
        let result = retry_transient(no_wait(2), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(status(502))
        })
        .await;

        assert!(matches!(result, Err(FetchError::Status { status: 502, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
