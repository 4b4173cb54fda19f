//! Configuration for the news pipeline
//!
//! Every setting is optional. Missing credentials disable the matching
//! source; the pipeline still starts with whatever is left.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::sources::scrape::ScrapeTarget;

/// Longest accepted `ARTICLE_TTL`
pub const MAX_ARTICLE_TTL: Duration = Duration::from_secs(3650 * 24 * 3600);

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // NewsAPI.org
    pub news_api_key: Option<String>,
    #[serde(default = "default_newsapi_query")]
    pub newsapi_query: String,
    #[serde(default = "default_true")]
    pub newsapi_enabled: bool,

    // GNews
    pub gnews_api_key: Option<String>,
    #[serde(default = "default_gnews_query")]
    pub gnews_query: String,
    #[serde(default = "default_true")]
    pub gnews_enabled: bool,

    // Site scrape
    pub scrape_listing_url: Option<String>,
    #[serde(default = "default_scrape_site_name")]
    pub scrape_site_name: String,
    #[serde(default = "default_scrape_item_selector")]
    pub scrape_item_selector: String,
    #[serde(default = "default_scrape_link_selector")]
    pub scrape_link_selector: String,
    #[serde(default = "default_scrape_title_selector")]
    pub scrape_title_selector: String,
    #[serde(default = "default_scrape_description_selector")]
    pub scrape_description_selector: String,
    #[serde(default = "default_scrape_image_selector")]
    pub scrape_image_selector: String,
    #[serde(default = "default_nigerian_category")]
    pub scrape_category: String,
    #[serde(default = "default_scrape_country")]
    pub scrape_country: String,
    #[serde(default = "default_true")]
    pub scrape_enabled: bool,

    // Fetching
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_source_rate_limit")]
    pub source_rate_limit_rpm: u32,

    // Circuit breaker
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_circuit_breaker_open_duration")]
    pub circuit_breaker_open_duration_secs: u64,

    // Lifecycle (humantime strings, e.g. "15m", "48h")
    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,
    #[serde(default = "default_article_ttl")]
    pub article_ttl: String,

    // Storage
    #[serde(default = "default_store_backend")]
    pub store_backend: String,
    pub database_url: Option<String>,

    // HTTP server (read query + metrics)
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_true")]
    pub http_enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_newsapi_query() -> String {
    "Nigeria".to_string()
}

fn default_gnews_query() -> String {
    "world".to_string()
}

fn default_scrape_site_name() -> String {
    "Punch".to_string()
}

fn default_scrape_item_selector() -> String {
    "article".to_string()
}

fn default_scrape_link_selector() -> String {
    "a[href]".to_string()
}

fn default_scrape_title_selector() -> String {
    "h2, h3".to_string()
}

fn default_scrape_description_selector() -> String {
    "p".to_string()
}

fn default_scrape_image_selector() -> String {
    "img".to_string()
}

fn default_nigerian_category() -> String {
    "Nigerian News".to_string()
}

fn default_scrape_country() -> String {
    "ng".to_string()
}

fn default_page_size() -> u32 {
    20
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_max_concurrent_requests() -> usize {
    10
}

fn default_source_rate_limit() -> u32 {
    30 // NewsAPI free tier: 100 requests/day
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

fn default_circuit_breaker_open_duration() -> u64 {
    300
}

fn default_tick_interval() -> String {
    "15m".to_string()
}

fn default_article_ttl() -> String {
    "48h".to_string()
}

fn default_store_backend() -> String {
    "memory".to_string()
}

fn default_http_port() -> u16 {
    9090
}

impl Config {
    /// Loads configuration from `.env` and the process environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_environment(config::Environment::default())
    }

    /// Builds configuration from an explicit variable map instead of the process environment
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        Self::from_environment(config::Environment::default().source(Some(vars)))
    }

    fn from_environment(env: config::Environment) -> Result<Self> {
        let cfg: Config = config::Config::builder()
            .add_source(env.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(cfg)
    }

    /// Rejects values that cannot be interpreted at all.
    ///
    /// Absent credentials are not an error; see [`Config::configured_sources`].
    pub fn validate(&self) -> Result<()> {
        self.tick_interval()?;
        self.article_lifetime()?;
        if self.page_size == 0 {
            return Err(PipelineError::ParseError("PAGE_SIZE must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Result<Duration> {
        parse_duration(&self.tick_interval)
    }

    pub fn article_ttl(&self) -> Result<Duration> {
        parse_duration(&self.article_ttl)
    }

    /// `ARTICLE_TTL` as the signed duration added to `created_at`
    pub fn article_lifetime(&self) -> Result<chrono::Duration> {
        let ttl = self.article_ttl()?;
        if ttl > MAX_ARTICLE_TTL {
            return Err(PipelineError::InvalidDuration {
                value: self.article_ttl.clone(),
                message: format!("article TTL may not exceed {}", humantime::format_duration(MAX_ARTICLE_TTL)),
            });
        }
        chrono::Duration::from_std(ttl).map_err(|e| PipelineError::InvalidDuration {
            value: self.article_ttl.clone(),
            message: e.to_string(),
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    /// Checks if NewsAPI is configured and enabled
    pub fn has_newsapi(&self) -> bool {
        self.newsapi_enabled && non_empty(&self.news_api_key)
    }

    /// Checks if GNews is configured and enabled
    pub fn has_gnews(&self) -> bool {
        self.gnews_enabled && non_empty(&self.gnews_api_key)
    }

    /// Checks if the scrape target is configured and enabled
    pub fn has_scrape(&self) -> bool {
        self.scrape_enabled && non_empty(&self.scrape_listing_url)
    }

    /// Names of the sources that will actually run
    pub fn configured_sources(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.has_newsapi() {
            names.push("newsapi");
        }
        if self.has_gnews() {
            names.push("gnews");
        }
        if self.has_scrape() {
            names.push("scrape");
        }
        names
    }

    /// Scrape target assembled from the `SCRAPE_*` settings
    pub fn scrape_target(&self) -> Option<ScrapeTarget> {
        let listing_url = self.scrape_listing_url.clone().filter(|u| !u.trim().is_empty())?;
        Some(ScrapeTarget {
            name: self.scrape_site_name.clone(),
            listing_url,
            item_selector: self.scrape_item_selector.clone(),
            link_selector: self.scrape_link_selector.clone(),
            title_selector: self.scrape_title_selector.clone(),
            description_selector: Some(self.scrape_description_selector.clone())
                .filter(|s| !s.trim().is_empty()),
            image_selector: Some(self.scrape_image_selector.clone())
                .filter(|s| !s.trim().is_empty()),
            category: self.scrape_category.clone(),
            country: Some(self.scrape_country.clone()).filter(|c| !c.trim().is_empty()),
        })
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Parses a humantime duration such as "15m", "48h" or "1h 30m"
pub fn parse_duration(value: &str) -> Result<Duration> {
    let duration = humantime::parse_duration(value.trim()).map_err(|e| PipelineError::InvalidDuration {
        value: value.to_string(),
        message: e.to_string(),
    })?;
    if duration.is_zero() {
        return Err(PipelineError::InvalidDuration {
            value: value.to_string(),
            message: "duration must be greater than zero".to_string(),
        });
    }
    Ok(duration)
}
