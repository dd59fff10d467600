//! Shared JSON client for the external document services.
//!
//! Requests are throttled by a token bucket and retried with exponential
//! backoff on transport errors, 429 and 5xx. Everything else fails at once.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::models::Config;

/// Connection, throttling and retry settings.
#[derive(Debug, Clone)]
pub struct ServiceClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub requests_per_second: u32,
    pub burst_size: u32,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl ServiceClientConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.providers.base_url.clone(),
            api_key: config.providers.api_key.clone(),
            requests_per_second: config.rate_limit.requests_per_second,
            burst_size: config.rate_limit.burst_size,
            max_retries: config.retry.max_retries,
            initial_backoff_ms: config.retry.initial_backoff_ms,
            max_backoff_ms: config.retry.max_backoff_ms,
        }
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("service returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl HttpError {
    /// Worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => !e.is_decode() && !e.is_builder(),
            Self::Status { status, .. } => status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

pub struct ServiceClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    limiter: DefaultDirectRateLimiter,
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl ServiceClient {
    pub fn new(config: ServiceClientConfig) -> Result<Self, HttpError> {
        let http = Client::builder().pool_max_idle_per_host(10).tcp_nodelay(true).build()?;

        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(rate);
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms.max(config.initial_backoff_ms)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `body` as JSON to `path` and decode the JSON reply.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, HttpError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build();

        let attempts = AtomicU32::new(0);
        let (url, attempts) = (&url, &attempts);
        backoff::future::retry(policy, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            self.limiter.until_ready().await;

            match self.send(url, body).await {
                Ok(reply) => Ok(reply),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    warn!(url = %url, attempt = attempt + 1, error = %e, "Transient service error, retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }

    async fn send<B, T>(&self, url: &str, body: &B) -> Result<T, HttpError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.http.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HttpError::Status { status, body });
        }
        debug!(url = %url, status = %status, "Service call succeeded");
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn test_config(base_url: String) -> ServiceClientConfig {
        ServiceClientConfig {
            base_url,
            api_key: Some("secret".into()),
            requests_per_second: 100,
            burst_size: 100,
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_posts_json_with_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/echo")
            .match_header("authorization", "Bearer secret")
            .match_body(mockito::Matcher::Json(json!({"a": 1})))
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": true}"#)
            .create_async()
            .await;

        let client = ServiceClient::new(test_config(server.url())).unwrap();
        let reply: Value = client.post_json("/echo", &json!({"a": 1})).await.unwrap();

        assert_eq!(reply["ok"], true);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_reported() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/flaky")
            .with_status(503)
            .with_body("overloaded")
            .expect(3)
            .create_async()
            .await;

        let client = ServiceClient::new(test_config(server.url())).unwrap();
        let err = client.post_json::<_, Value>("flaky", &json!({})).await.unwrap_err();

        assert!(matches!(err, HttpError::Status { status, .. } if status == StatusCode::SERVICE_UNAVAILABLE));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bad")
            .with_status(422)
            .with_body("unknown parameter")
            .expect(1)
            .create_async()
            .await;

        let client = ServiceClient::new(test_config(server.url())).unwrap();
        let err = client.post_json::<_, Value>("bad", &json!({})).await.unwrap_err();

        assert!(!err.is_transient());
        assert!(err.to_string().contains("unknown parameter"));
        mock.assert_async().await;
    }
}
