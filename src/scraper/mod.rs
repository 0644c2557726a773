pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::config::ScraperConfig;
use crate::error::FetchError;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use self::http_client::HttpClient;

pub use self::parsers::{DayPage, parse_day_page};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Anything that can hand out a page body for a URL.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError>;
}

// ── LSF portal ────────────────────────────────────────────────────────────────

pub struct LsfPortal {
    client: HttpClient,
}

impl LsfPortal {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(config)?,
        })
    }
}

#[async_trait]
impl PageSource for LsfPortal {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        self.client.get_text(url).await
    }
}

// ── Concurrency-capped fetcher ────────────────────────────────────────────────

/// Caps the number of requests in flight. Cloning shares the cap.
#[derive(Clone)]
pub struct RateLimitedFetcher {
    source: Arc<dyn PageSource>,
    slots: Arc<Semaphore>,
    timeout: Duration,
}

impl RateLimitedFetcher {
    /// `limit` is clamped to at least one slot.
    pub fn new(source: Arc<dyn PageSource>, limit: usize, timeout: Duration) -> Self {
        Self {
            source,
            slots: Arc::new(Semaphore::new(limit.max(1))),
            timeout,
        }
    }

    /// Waits for a free slot, then fetches. The slot is released when this
    /// returns, whatever the outcome; a source that never answers is cut off
    /// after the timeout.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        // The semaphore is never closed.
        let _permit = self.slots.acquire().await.ok();
        debug!("slot acquired for {}", url);

        match tokio::time::timeout(self.timeout, self.source.fetch_page(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    /// Fetches every URL, at most `limit` at a time, and returns the outcomes
    /// in input order. The pipeline fetches per day task instead, so this only
    /// backs the cap and timeout tests.
    #[cfg(test)]
    pub(crate) async fn fetch_all(&self, urls: &[String]) -> Vec<Result<String, FetchError>> {
        let handles: Vec<_> = urls
            .iter()
            .map(|url| {
                let fetcher = self.clone();
                let url = url.clone();
                tokio::spawn(async move { fetcher.fetch(&url).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (url, handle) in urls.iter().zip(handles) {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(FetchError::Aborted {
                    url: url.clone(),
                    reason: e.to_string(),
                }),
            });
        }
        results
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakePortal;
    use super::*;

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://lsf.test/day/{i}")).collect()
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let urls = urls(21);
        let portal = Arc::new(FakePortal {
            pages: urls.iter().map(|u| (u.clone(), Ok(format!("<p>{u}</p>")))).collect(),
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let fetcher = RateLimitedFetcher::new(portal.clone(), 5, Duration::from_secs(5));

        let results = fetcher.fetch_all(&urls).await;

        assert_eq!(results.len(), 21);
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(portal.peak() <= 5, "peak in flight was {}", portal.peak());
        assert_eq!(portal.peak(), 5);
    }

    #[tokio::test]
    async fn test_failures_are_reported_not_dropped() {
        let urls = urls(4);
        let mut pages: std::collections::HashMap<_, _> =
            urls.iter().map(|u| (u.clone(), Ok("ok".to_string()))).collect();
        pages.insert(urls[1].clone(), Err(503));
        let portal = Arc::new(FakePortal { pages, ..Default::default() });
        let fetcher = RateLimitedFetcher::new(portal, 2, Duration::from_secs(5));

        let results = fetcher.fetch_all(&urls).await;

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(FetchError::Status { status: 503, .. })));
        assert!(results[2].is_ok() && results[3].is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_request_times_out_and_frees_its_slot() {
        let urls = urls(3);
        let portal = Arc::new(FakePortal {
            pages: urls.iter().map(|u| (u.clone(), Ok("ok".to_string()))).collect(),
            hang: vec![urls[0].clone()],
            ..Default::default()
        });
        // One slot: the later URLs only run if the hung one gives its slot back.
        let fetcher = RateLimitedFetcher::new(portal, 1, Duration::from_secs(30));

        let results = fetcher.fetch_all(&urls).await;

        assert!(matches!(results[0], Err(FetchError::Timeout { .. })));
        assert!(results[1].is_ok());
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let portal = Arc::new(FakePortal::default());
        let fetcher = RateLimitedFetcher::new(portal, 0, Duration::from_secs(1));
        assert_eq!(fetcher.slots.available_permits(), 1);
    }
}
