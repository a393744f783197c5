use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::FetchSettings;

/// Bounded-retry wrapper around a single idempotent HTTP GET.
///
/// Every attempt that errors at the transport level or returns a non-success
/// status counts as a failure. The final attempt's error is returned as-is;
/// the first success is returned immediately.
#[derive(Clone)]
pub struct ResilientFetch {
    http: Client,
    attempts: u32,
    delay: Duration,
}

impl ResilientFetch {
    pub fn new(settings: &FetchSettings) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(concat!("pwa-android-builder/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()
            .map_err(FetchError::Http)?;

        Ok(Self::with_client(http, settings.attempts, settings.delay))
    }

    pub fn with_client(http: Client, attempts: u32, delay: Duration) -> Self {
        Self {
            http,
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub async fn fetch(&self, url: &str) -> Result<Response, FetchError> {
        let mut attempt = 1;
        loop {
            let failure = match self.http.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(url = %url, attempt, "Fetch succeeded");
                    return Ok(response);
                }
                Ok(response) => FetchError::Status {
                    url: url.to_string(),
                    status: response.status(),
                },
                Err(e) => FetchError::Http(e),
            };

            if attempt >= self.attempts {
                tracing::warn!(
                    url = %url,
                    attempt,
                    error = %failure,
                    "Fetch failed, attempts exhausted"
                );
                return Err(failure);
            }

            tracing::warn!(
                url = %url,
                attempt,
                max_attempts = self.attempts,
                error = %failure,
                "Fetch failed, retrying"
            );
            metrics::counter!("fetch_retries_total").increment(1);
            sleep(self.delay).await;
            attempt += 1;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct Flaky {
        hits: Arc<AtomicUsize>,
        failures: usize,
    }

    async fn flaky(State(flaky): State<Flaky>) -> (axum::http::StatusCode, &'static str) {
        let hit = flaky.hits.fetch_add(1, Ordering::SeqCst);
        if hit < flaky.failures {
            (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom")
        } else {
            (axum::http::StatusCode::OK, "{}")
        }
    }

    async fn serve(failures: usize) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route("/manifest.json", get(flaky)).with_state(Flaky {
            hits: hits.clone(),
            failures,
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/manifest.json", addr), hits)
    }

    fn fetcher() -> ResilientFetch {
        ResilientFetch::with_client(Client::new(), 3, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_first_try_success_uses_one_attempt() {
        let (url, hits) = serve(0).await;
        let response = fetcher().fetch(&url).await.unwrap();
        assert!(response.status().is_success());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_two_failures_then_success_uses_three_attempts() {
        let (url, hits) = serve(2).await;
        let response = fetcher().fetch(&url).await.unwrap();
        assert_eq!(response.text().await.unwrap(), "{}");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_persistent_failure_raises_after_three_attempts() {
        let (url, hits) = serve(usize::MAX).await;
        let err = fetcher().fetch(&url).await.unwrap_err();
        match err {
            FetchError::Status { status, .. } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR)
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connection_error_propagated() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetcher()
            .fetch(&format!("http://{}/manifest.json", addr))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Http(_)));
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let fetch = ResilientFetch::with_client(Client::new(), 0, Duration::ZERO);
        assert_eq!(fetch.attempts(), 1);
    }
}
