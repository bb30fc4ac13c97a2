//! HTTP plumbing shared by search providers and page fetchers: client setup,
//! bounded retries, and the `PageFetcher` implementations.

use crate::config::{Config, UnlockerSettings, read_secret};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Builds the shared client with a browser-like identity.
pub(crate) fn build_client(config: &Config) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    let language = HeaderValue::from_str(&config.accept_language)
        .map_err(|e| AppError::Config(format!("Invalid Accept-Language header: {}", e)))?;
    headers.insert(ACCEPT_LANGUAGE, language);

    Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(headers)
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| AppError::Generic(anyhow::anyhow!("Failed to build HTTP client: {}", e)))
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    /// Total attempts, the first included.
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            attempts: config.retry_attempts,
            base_delay: config.retry_base_delay,
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry` plus up to
    /// half a base step of jitter.
    pub(crate) fn backoff(&self, retry: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(retry.min(10)));
        let jitter_ms = self.base_delay.as_millis() as u64 / 2;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        exp + jitter
    }
}

/// Sends the request built by `make_request`, retrying timeouts, connection
/// failures and 429/5xx statuses up to `policy.attempts` times.
///
/// Builder errors (e.g. an unusable URL) fail on the first attempt.
pub(crate) async fn send_with_retries<F>(make_request: F, policy: &RetryPolicy) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let err = match make_request().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => AppError::HttpStatus {
                status: response.status(),
                url: response.url().to_string(),
            },
            Err(e) => AppError::Request(e),
        };

        if !err.is_transient() || attempt >= policy.attempts {
            return Err(err);
        }

        let delay = policy.backoff(attempt - 1);
        tracing::debug!(
            "Transient failure (attempt {}/{}): {}. Retrying in {:?}",
            attempt,
            policy.attempts,
            err,
            delay
        );
        tokio::time::sleep(delay).await;
    }
}

/// Retrieves page markup for the prober.
#[async_trait]
pub(crate) trait PageFetcher: Send + Sync {
    /// Short name recorded in lead `source` values ("direct", "unlocker").
    fn name(&self) -> &str;

    /// Returns the page's HTML, or an error for network failure, non-2xx
    /// status or non-HTML content.
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// Plain GET against the target site.
pub(crate) struct DirectFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl DirectFetcher {
    pub(crate) fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }
}

#[async_trait]
impl PageFetcher for DirectFetcher {
    fn name(&self) -> &str {
        "direct"
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = send_with_retries(|| self.client.get(url.clone()), &self.policy).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        if !content_type.is_empty() && !content_type.contains("html") {
            return Err(AppError::NonHtml {
                content_type,
                url: url.to_string(),
            });
        }

        Ok(response.text().await?)
    }
}

/// Fetches through a third-party unlocker proxy that takes the target URL as a
/// query parameter.
pub(crate) struct UnlockerFetcher {
    client: Client,
    policy: RetryPolicy,
    endpoint: Url,
    api_key: String,
    url_param: String,
    key_param: String,
}

#[derive(Deserialize)]
struct UnlockerEnvelope {
    html: Option<String>,
}

impl UnlockerFetcher {
    /// Fails with a configuration error if the endpoint is unusable or the API key
    /// is missing from the environment.
    pub(crate) fn from_settings(
        client: Client,
        policy: RetryPolicy,
        settings: &UnlockerSettings,
    ) -> Result<Self> {
        let endpoint = Url::parse(&settings.endpoint).map_err(|e| {
            AppError::Config(format!("Invalid unlocker endpoint '{}': {}", settings.endpoint, e))
        })?;
        let api_key = read_secret(&settings.api_key_env)?;
        Ok(Self {
            client,
            policy,
            endpoint,
            api_key,
            url_param: settings.url_param.clone(),
            key_param: settings.key_param.clone(),
        })
    }
}

/// The unlocker answers either with raw HTML or with `{"html": "..."}`.
fn unwrap_unlocker_body(body: String) -> Result<String> {
    if !body.trim_start().starts_with('{') {
        return Ok(body);
    }
    let envelope: UnlockerEnvelope = serde_json::from_str(&body)?;
    envelope.html.ok_or_else(|| {
        AppError::Generic(anyhow::anyhow!("Unlocker response has no 'html' field"))
    })
}

#[async_trait]
impl PageFetcher for UnlockerFetcher {
    fn name(&self) -> &str {
        "unlocker"
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = send_with_retries(
            || {
                self.client.get(self.endpoint.clone()).query(&[
                    (self.url_param.as_str(), url.as_str()),
                    (self.key_param.as_str(), self.api_key.as_str()),
                ])
            },
            &self.policy,
        )
        .await?;
        unwrap_unlocker_body(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warp::Filter;
    use warp::http::StatusCode;

    macro_rules! serve {
        ($routes:expr) => {{
            let (addr, server) = warp::serve($routes).bind_ephemeral(([127, 0, 0, 1], 0));
            tokio::spawn(server);
            addr
        }};
    }

    fn test_client() -> Client {
        Client::builder().no_proxy().build().unwrap()
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(1),
        }
    }

    fn counted_route(
        name: &'static str,
        hits: Arc<AtomicUsize>,
        failures_before_success: usize,
        failure: StatusCode,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        warp::path(name).map(move || {
            let n = hits.fetch_add(1, Ordering::SeqCst);
            if n < failures_before_success {
                warp::reply::with_status(warp::reply::html("busy".to_string()), failure)
            } else {
                warp::reply::with_status(
                    warp::reply::html("<p>sales@acme.com</p>".to_string()),
                    StatusCode::OK,
                )
            }
        })
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = RetryPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(100),
        };
        let first = policy.backoff(0);
        let third = policy.backoff(2);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(450));
    }

    #[test]
    fn test_unlocker_body_shapes() {
        assert_eq!(
            unwrap_unlocker_body("<html>raw</html>".to_string()).unwrap(),
            "<html>raw</html>"
        );
        assert_eq!(
            unwrap_unlocker_body(r#"{"html": "<p>wrapped</p>", "status": 200}"#.to_string())
                .unwrap(),
            "<p>wrapped</p>"
        );
        assert!(unwrap_unlocker_body(r#"{"status": 403}"#.to_string()).is_err());
    }

    #[tokio::test]
    async fn test_retries_transient_statuses() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = serve!(counted_route("flaky", hits.clone(), 2, StatusCode::SERVICE_UNAVAILABLE));
        let fetcher = DirectFetcher::new(test_client(), fast_policy());

        let url = Url::parse(&format!("http://{}/flaky", addr)).unwrap();
        let body = fetcher.fetch(&url).await.unwrap();
        assert!(body.contains("sales@acme.com"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = serve!(counted_route("down", hits.clone(), 100, StatusCode::TOO_MANY_REQUESTS));
        let fetcher = DirectFetcher::new(test_client(), fast_policy());

        let url = Url::parse(&format!("http://{}/down", addr)).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, AppError::HttpStatus { status, .. } if status.as_u16() == 429));
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_does_not_retry_not_found() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = serve!(counted_route("gone", hits.clone(), 100, StatusCode::NOT_FOUND));
        let fetcher = DirectFetcher::new(test_client(), fast_policy());

        let url = Url::parse(&format!("http://{}/gone", addr)).unwrap();
        assert!(fetcher.fetch(&url).await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_builder_errors_are_not_retried() {
        let client = test_client();
        let builds = AtomicUsize::new(0);
        let err = send_with_retries(
            || {
                builds.fetch_add(1, Ordering::SeqCst);
                client.get("not a url")
            },
            &fast_policy(),
        )
        .await
        .unwrap_err();
        assert!(matches!(&err, AppError::Request(e) if e.is_builder()));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        let builds = AtomicUsize::new(0);
        let err = send_with_retries(
            || {
                builds.fetch_add(1, Ordering::SeqCst);
                client.get("http://127.0.0.1:9/").header("x-broken", "line\nbreak")
            },
            &fast_policy(),
        )
        .await
        .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejects_non_html() {
        let route = warp::path("data.json").map(|| warp::reply::json(&vec!["a", "b"]));
        let addr = serve!(route);
        let fetcher = DirectFetcher::new(test_client(), fast_policy());

        let url = Url::parse(&format!("http://{}/data.json", addr)).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, AppError::NonHtml { .. }));
    }

    #[tokio::test]
    async fn test_unlocker_passes_target_and_key() {
        let route = warp::path("unlock")
            .and(warp::query::<std::collections::HashMap<String, String>>())
            .map(|params: std::collections::HashMap<String, String>| {
                let body = serde_json::json!({
                    "html": format!(
                        "<p>{} {}</p>",
                        params.get("url").cloned().unwrap_or_default(),
                        params.get("token").cloned().unwrap_or_default()
                    )
                });
                warp::reply::json(&body)
            });
        let addr = serve!(route);

        let fetcher = UnlockerFetcher {
            client: test_client(),
            policy: fast_policy(),
            endpoint: Url::parse(&format!("http://{}/unlock", addr)).unwrap(),
            api_key: "k3y".to_string(),
            url_param: "url".to_string(),
            key_param: "token".to_string(),
        };
        let target = Url::parse("https://acme.com/contact").unwrap();
        let html = fetcher.fetch(&target).await.unwrap();
        assert_eq!(html, "<p>https://acme.com/contact k3y</p>");
    }
}
