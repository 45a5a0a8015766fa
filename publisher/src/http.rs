//! Outbound HTTP with a bounded retry budget.
//!
//! Every call to the feed, geocoding and elevation services goes through
//! [`HttpClient`]. Transient failures (connect errors, timeouts and the
//! statuses in [`RETRYABLE_STATUSES`]) are retried with exponential backoff up
//! to [`RetryPolicy::max_attempts`]; everything else fails on the spot.

use crate::errors::{Error, Result};
use crate::metrics::HTTP_RETRIES_TOTAL;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    RETRYABLE_STATUSES.contains(&status.as_u16())
}

/// Methods whose transient failures may be retried.
pub fn is_retryable_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET
            | Method::PUT
            | Method::POST
            | Method::DELETE
            | Method::HEAD
            | Method::OPTIONS
            | Method::TRACE
    )
}

/// `scheme://host[:port]/path` without the query string, which may carry tokens.
pub fn display_url(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.set_fragment(None);
    let _ = shown.set_password(None);
    shown.to_string()
}

/// Join `base` and `path` and append `params` as the query string.
pub fn endpoint<I, K, V>(base: &str, path: &str, params: I) -> Result<Url>
where
    I: IntoIterator,
    I::Item: std::borrow::Borrow<(K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    let joined = if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    };
    Url::parse_with_params(&joined, params)
        .map_err(|e| Error::Config(format!("Invalid URL {}: {}", joined, e)))
}

struct Failure {
    error: Error,
    retryable: bool,
    retry_after: Option<Duration>,
}

/// Retrying JSON client. Owns its connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl HttpClient {
    pub fn new(policy: RetryPolicy, timeout: Duration, headers: HeaderMap) -> Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, policy })
    }

    pub async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        self.request(Method::GET, url, None::<&()>).await
    }

    pub async fn post<T, B>(&self, url: Url, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, url, Some(body)).await
    }

    /// Issue `method` against `url`, retrying transient failures, and decode
    /// the JSON body of the successful response into `T`.
    pub async fn request<T, B>(&self, method: Method, url: Url, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let shown = display_url(&url);
        let retryable_method = is_retryable_method(&method);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let failure = match self.attempt(&method, &url, body).await {
                Ok(bytes) => {
                    if attempt > 1 {
                        info!("{} {} succeeded on attempt {}", method, shown, attempt);
                    }
                    return serde_json::from_slice(&bytes).map_err(|e| {
                        Error::Parse(format!("Unexpected response from {} {}: {}", method, shown, e))
                    });
                }
                Err(failure) => failure,
            };

            if !failure.retryable || !retryable_method || attempt >= self.policy.max_attempts {
                return Err(failure.error);
            }

            let delay = failure
                .retry_after
                .map(|d| d.min(self.policy.max_backoff))
                .unwrap_or_else(|| self.policy.backoff(attempt));

            warn!(
                "{} {} failed (attempt {}/{}): {}. Retrying in {}ms...",
                method,
                shown,
                attempt,
                self.policy.max_attempts,
                failure.error,
                delay.as_millis()
            );
            HTTP_RETRIES_TOTAL.inc();
            tokio::time::sleep(delay).await;
        }
    }

    /// One round trip. `Ok` carries the body of a 2xx response.
    async fn attempt<B>(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&B>,
    ) -> std::result::Result<Vec<u8>, Failure>
    where
        B: Serialize + ?Sized,
    {
        let mut builder = self.client.request(method.clone(), url.clone());
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| Failure {
            retryable: e.is_connect() || e.is_timeout(),
            error: Error::Network(format!("{} {}: {}", method, display_url(url), e.without_url())),
            retry_after: None,
        })?;

        let status = response.status();
        debug!("{} {} -> {}", method, display_url(url), status);
        if status.is_success() {
            let bytes = response.bytes().await.map_err(|e| Failure {
                retryable: e.is_timeout(),
                error: Error::Network(format!(
                    "Failed to read response from {}: {}",
                    display_url(url),
                    e.without_url()
                )),
                retry_after: None,
            })?;
            return Ok(bytes.to_vec());
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        Err(Failure {
            error: Error::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
                url: display_url(url),
            },
            retryable: is_retryable_status(status),
            retry_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fast_policy, spawn_cloud};
    use serde_json::Value;
    use simulator::{Fault, MockCloud};
    use std::time::Instant;

    fn client(max_attempts: u32) -> HttpClient {
        HttpClient::new(fast_policy(max_attempts), Duration::from_secs(5), HeaderMap::new()).unwrap()
    }

    fn groups_url(base: &str) -> Url {
        endpoint(base, "/api/v2/u/groups", &[] as &[(&str, &str)]).unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_retryable_methods() {
        assert!(is_retryable_method(&Method::GET));
        assert!(is_retryable_method(&Method::POST));
        assert!(is_retryable_method(&Method::TRACE));
        assert!(!is_retryable_method(&Method::PATCH));
        assert!(!is_retryable_method(&Method::CONNECT));
    }

    #[test]
    fn test_display_url_hides_query() {
        let url = endpoint("http://example.com/v1/", "/forward", &[("access_key", "secret"), ("query", "x")]).unwrap();
        assert_eq!(url.query(), Some("access_key=secret&query=x"));
        assert_eq!(display_url(&url), "http://example.com/v1/forward");
    }

    #[tokio::test]
    async fn test_retryable_statuses_use_whole_budget() {
        for status in RETRYABLE_STATUSES {
            let cloud = MockCloud::new();
            let base = spawn_cloud(&cloud).await;
            cloud.fail_next(status, 10);

            let result: Result<Value> = client(3).get(groups_url(&base)).await;
            match result {
                Err(Error::Http { status: got, .. }) => assert_eq!(got, status),
                other => panic!("expected HttpError for {}, got {:?}", status, other),
            }
            assert_eq!(cloud.counters().requests, 3, "status {}", status);
        }
    }

    #[tokio::test]
    async fn test_client_errors_fail_immediately() {
        for status in [400, 401, 403, 404, 409, 422] {
            let cloud = MockCloud::new();
            let base = spawn_cloud(&cloud).await;
            cloud.fail_next(status, 10);

            let result: Result<Value> = client(4).get(groups_url(&base)).await;
            assert!(matches!(result, Err(Error::Http { status: got, .. }) if got == status));
            assert_eq!(cloud.counters().requests, 1, "status {}", status);
        }
    }

    #[tokio::test]
    async fn test_recovers_within_budget() {
        let cloud = MockCloud::new();
        let base = spawn_cloud(&cloud).await;
        cloud.fail_next(503, 2);

        let groups: Vec<Value> = client(3).get(groups_url(&base)).await.unwrap();
        assert!(groups.is_empty());
        assert_eq!(cloud.counters().requests, 3);
    }

    #[tokio::test]
    async fn test_unretryable_method_is_not_retried() {
        let cloud = MockCloud::new();
        let base = spawn_cloud(&cloud).await;
        cloud.fail_next(503, 5);

        let result: Result<Value> = client(5)
            .request(Method::PATCH, groups_url(&base), Some(&serde_json::json!({})))
            .await;
        assert!(matches!(result, Err(Error::Http { status: 503, .. })));
        assert_eq!(cloud.counters().requests, 1);
    }

    #[tokio::test]
    async fn test_body_shape_mismatch_is_parse_error() {
        let cloud = MockCloud::new();
        let base = spawn_cloud(&cloud).await;
        let url = endpoint(&base, "/opentopodata/v1/mapzen", &[("locations", "1,2")]).unwrap();

        let result: Result<Vec<String>> = client(3).get(url).await;
        assert!(matches!(result, Err(Error::Parse(_))));
        assert_eq!(cloud.counters().requests, 1);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = endpoint(&format!("http://{}", addr), "/anything", &[] as &[(&str, &str)]).unwrap();
        let result: Result<Value> = client(2).get(url).await;
        assert!(matches!(result, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_retry_after_overrides_backoff() {
        let cloud = MockCloud::new();
        let base = spawn_cloud(&cloud).await;
        cloud.push_fault(Fault {
            status: 429,
            retry_after_secs: Some(0),
        });

        let slow = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(30),
        };
        let client = HttpClient::new(slow, Duration::from_secs(5), HeaderMap::new()).unwrap();

        let started = Instant::now();
        let _: Vec<Value> = client.get(groups_url(&base)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(cloud.counters().requests, 2);
    }
}
