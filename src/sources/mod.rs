//! News sources
//!
//! Each provider implements [`NewsSource`]. The provided [`NewsSource::fetch`]
//! is the adapter boundary: it never fails, it reports.

pub mod gnews;
pub mod newsapi;
pub mod scrape;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::Config;
use crate::error::Result;
use crate::http_client::{ResilientHttpClient, SourceHttpClient};
use crate::metrics;
use crate::schemas::Article;

pub use gnews::GNewsSource;
pub use newsapi::NewsApiSource;
pub use scrape::{ScrapeSource, ScrapeTarget};

/// Metadata about a source
#[derive(Debug, Clone, Serialize)]
pub struct SourceMetadata {
    /// Unique identifier, used in logs and metrics
    pub id: String,
    /// Human-readable name
    pub name: String,
    pub description: String,
    /// Category stamped on every article from this source
    pub category: String,
}

/// Per-call options handed to every source by the scheduler
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Overrides the source's configured query
    pub query: Option<String>,
    pub page_size: u32,
    pub language: String,
    /// Bound on the whole fetch, retries included
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            query: None,
            page_size: 20,
            language: "en".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.page_size,
            timeout: config.fetch_timeout(),
            ..Self::default()
        }
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// How a single source fetch ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum FetchStatus {
    Ok,
    NotConfigured,
    Failed(String),
    TimedOut,
}

impl FetchStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotConfigured => "not_configured",
            Self::Failed(_) => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Result of one source fetch: always a (possibly empty) article list plus a status
#[derive(Debug, Clone)]
pub struct SourceFetch {
    pub source_id: String,
    pub articles: Vec<Article>,
    pub status: FetchStatus,
    pub elapsed: Duration,
}

/// Trait implemented by every news provider
#[async_trait]
pub trait NewsSource: Send + Sync {
    fn metadata(&self) -> &SourceMetadata;

    /// False when the credential or endpoint this source needs is missing
    fn is_configured(&self) -> bool {
        true
    }

    /// Provider-specific fetch and normalization. May fail.
    async fn fetch_articles(&self, options: &FetchOptions) -> Result<Vec<Article>>;

    /// Fetches under the options' timeout and turns every failure into an empty,
    /// reported result.
    async fn fetch(&self, options: &FetchOptions) -> SourceFetch {
        let source_id = self.id().to_string();
        let started = Instant::now();

        if !self.is_configured() {
            debug!(source = %source_id, "Source not configured, skipping");
            return SourceFetch {
                source_id,
                articles: Vec::new(),
                status: FetchStatus::NotConfigured,
                elapsed: started.elapsed(),
            };
        }

        let guarded = AssertUnwindSafe(self.fetch_articles(options)).catch_unwind();

        let (articles, status) =
            match tokio::time::timeout(options.timeout, guarded)
                .instrument(info_span!("fetch", source = %source_id))
                .await
            {
                Ok(Ok(Ok(articles))) => {
                    info!(source = %source_id, count = articles.len(), "Fetched articles");
                    (articles, FetchStatus::Ok)
                }
                Ok(Ok(Err(e))) => {
                    warn!(source = %source_id, error = %e, kind = e.kind(), "Source fetch failed");
                    (Vec::new(), FetchStatus::Failed(e.to_string()))
                }
                Ok(Err(panic)) => {
                    error!(source = %source_id, panic = %panic_message(&*panic), "Source adapter panicked");
                    (Vec::new(), FetchStatus::Failed(PANICKED.to_string()))
                }
                Err(_) => {
                    warn!(
                        source = %source_id,
                        timeout_secs = options.timeout.as_secs_f64(),
                        "Source fetch timed out"
                    );
                    (Vec::new(), FetchStatus::TimedOut)
                }
            };

        metrics::record_source_fetch(&source_id, status.label(), articles.len());

        SourceFetch {
            source_id,
            articles,
            status,
            elapsed: started.elapsed(),
        }
    }

    fn id(&self) -> &str {
        &self.metadata().id
    }

    fn name(&self) -> &str {
        &self.metadata().name
    }
}

/// Failure reason reported for an adapter that panicked
pub const PANICKED: &str = "panicked";

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Builds the registered source list from configuration, in registration order.
///
/// Sources without credentials are still registered so ticks report them as
/// `NotConfigured`; disabled sources are left out entirely.
pub fn build_sources(config: &Config, http_client: Arc<ResilientHttpClient>) -> Vec<Arc<dyn NewsSource>> {
    let breaker_config = CircuitBreakerConfig {
        failure_threshold: config.circuit_breaker_failure_threshold,
        open_duration: Duration::from_secs(config.circuit_breaker_open_duration_secs),
        ..Default::default()
    };
    let source_client = |id: &str| {
        SourceHttpClient::new(
            http_client.clone(),
            id,
            config.source_rate_limit_rpm,
            Arc::new(CircuitBreaker::new(id, breaker_config.clone())),
        )
    };

    let mut sources: Vec<Arc<dyn NewsSource>> = Vec::new();

    if config.newsapi_enabled {
        sources.push(Arc::new(NewsApiSource::new(
            source_client("newsapi"),
            config.news_api_key.clone(),
            config.newsapi_query.clone(),
        )));
    }

    if config.gnews_enabled {
        sources.push(Arc::new(GNewsSource::new(
            source_client("gnews"),
            config.gnews_api_key.clone(),
            config.gnews_query.clone(),
        )));
    }

    if config.scrape_enabled {
        if let Some(target) = config.scrape_target() {
            match ScrapeSource::new(source_client("scrape"), target) {
                Ok(source) => sources.push(Arc::new(source)),
                Err(e) => warn!(error = %e, "Scrape source misconfigured, not registered"),
            }
        }
    }

    sources
}
