//! HTTP Client Module
//!
//! Provides the outbound client every source goes through:
//! - Semaphore-based concurrency limiting
//! - Bounded connect/request timeouts
//! - Exponential backoff with jitter for transient failures
//! - Per-source rate limiting and circuit breaker

use backoff::ExponentialBackoffBuilder;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, Request, RequestBuilder, Response, StatusCode};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{PipelineError, Result};

/// Longest error body kept in an `ApiError`
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum concurrent requests across all sources
    pub max_concurrent_requests: usize,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Total time budget for one request including retries
    pub max_elapsed: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            request_timeout: Duration::from_secs(8),
            connect_timeout: Duration::from_secs(5),
            max_retries: 2,
            initial_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(4),
            max_elapsed: Duration::from_secs(10),
            user_agent: format!("news-pipeline/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Shared HTTP client with concurrency limiting and retries
pub struct ResilientHttpClient {
    client: Client,
    semaphore: Arc<Semaphore>,
    config: HttpClientConfig,
}

impl ResilientHttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true)
            .build()?;

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));

        Ok(Self {
            client,
            semaphore,
            config,
        })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Sends the request built by `build_request`, retrying transient failures.
    ///
    /// The request is rebuilt for every attempt. Non-2xx responses that are not
    /// retryable come back as `ApiError` with the status code and a truncated body.
    pub async fn execute<F>(&self, build_request: F) -> Result<Response>
    where
        F: Fn() -> std::result::Result<Request, reqwest::Error>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| PipelineError::ShutdownRequested)?;

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_retry_delay)
            .with_max_interval(self.config.max_retry_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.5)
            .with_max_elapsed_time(Some(self.config.max_elapsed))
            .build();

        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let build_request = &build_request;
        let client = &self.client;
        let max_retries = self.config.max_retries;

        backoff::future::retry(policy, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let may_retry = attempt <= max_retries;

            let request = build_request()
                .map_err(|e| backoff::Error::permanent(PipelineError::HttpError(e)))?;
            debug!(method = %request.method(), url = %request.url(), attempt, "Sending request");

            match client.execute(request).await {
                Ok(response) if response.status().is_success() => Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let mut body = response.text().await.unwrap_or_default();
                    truncate_at_char_boundary(&mut body, MAX_ERROR_BODY);
                    let error = PipelineError::ApiError {
                        code: status.as_u16().to_string(),
                        message: body,
                    };
                    if is_retryable_status(status) && may_retry {
                        warn!(status = %status, attempt, "Retryable status, backing off");
                        Err(backoff::Error::transient(error))
                    } else {
                        Err(backoff::Error::permanent(error))
                    }
                }
                Err(e) if (e.is_timeout() || e.is_connect()) && may_retry => {
                    warn!(error = %e, attempt, "Transient error, backing off");
                    Err(backoff::Error::transient(PipelineError::HttpError(e)))
                }
                Err(e) => Err(backoff::Error::permanent(PipelineError::HttpError(e))),
            }
        })
        .await
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Statuses worth another attempt
fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::BAD_GATEWAY
            | StatusCode::REQUEST_TIMEOUT
    )
}

fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
}

/// Per-source view of the shared client with its own rate limit and circuit breaker
#[derive(Clone)]
pub struct SourceHttpClient {
    client: Arc<ResilientHttpClient>,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
    source_id: String,
}

impl SourceHttpClient {
    pub fn new(
        client: Arc<ResilientHttpClient>,
        source_id: &str,
        rate_limit_rpm: u32,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let rpm = NonZeroU32::new(rate_limit_rpm).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Self {
            client,
            rate_limiter,
            circuit_breaker,
            source_id: source_id.to_string(),
        }
    }

    /// GET with query parameters
    pub async fn get_with_query<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        query: &T,
    ) -> Result<Response> {
        self.send(|client| client.get(url).query(query)).await
    }

    /// Sends whatever request `build` describes, with all protections applied
    pub async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        if self.rate_limiter.check().is_err() {
            warn!(source = %self.source_id, "Rate limit reached, skipping request");
            return Err(PipelineError::RateLimitExceeded);
        }

        // held across the await: a cancelled request still settles the breaker
        let Some(permit) = self.circuit_breaker.acquire() else {
            return Err(PipelineError::CircuitBreakerOpen(self.source_id.clone()));
        };

        let inner = self.client.inner();
        match self.client.execute(|| build(inner).build()).await {
            Ok(response) => {
                permit.success();
                Ok(response)
            }
            Err(e) => {
                permit.failure();
                Err(e)
            }
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }
}
