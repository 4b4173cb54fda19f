//! GNews Source
//!
//! Alternate provider used for international coverage.
//! https://gnews.io/docs/v4#search-endpoint

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{FetchOptions, NewsSource, SourceMetadata};
use crate::dedup::canonicalize_url;
use crate::error::{PipelineError, Result};
use crate::http_client::SourceHttpClient;
use crate::schemas::{parse_published_at, Article, CATEGORY_WORLD_NEWS};

const GNEWS_BASE_URL: &str = "https://gnews.io/api/v4";

#[derive(Debug, Deserialize)]
struct GNewsResponse {
    #[serde(default)]
    articles: Vec<GNewsArticle>,
    /// Present instead of `articles` when the request is rejected
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GNewsArticle {
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    image: Option<String>,
    published_at: Option<String>,
    source: Option<GNewsArticleSource>,
}

#[derive(Debug, Deserialize)]
struct GNewsArticleSource {
    name: Option<String>,
}

pub struct GNewsSource {
    client: SourceHttpClient,
    api_key: Option<String>,
    query: String,
    base_url: String,
    metadata: SourceMetadata,
}

impl GNewsSource {
    pub fn new(client: SourceHttpClient, api_key: Option<String>, query: String) -> Self {
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            query,
            base_url: GNEWS_BASE_URL.to_string(),
            metadata: SourceMetadata {
                id: "gnews".to_string(),
                name: "GNews".to_string(),
                description: "Alternate news provider, international coverage".to_string(),
                category: CATEGORY_WORLD_NEWS.to_string(),
            },
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn normalize(&self, raw: GNewsArticle, fetched_at: DateTime<Utc>) -> Option<Article> {
        let url = match raw.url.as_deref().map(canonicalize_url) {
            Some(Ok(url)) => url,
            _ => {
                debug!(source = "gnews", url = ?raw.url, "Dropping article without usable URL");
                return None;
            }
        };

        Some(Article {
            url,
            title: raw.title.unwrap_or_default().trim().to_string(),
            description: raw.description.unwrap_or_default().trim().to_string(),
            image: raw.image.filter(|i| !i.trim().is_empty()),
            published_at: parse_published_at(raw.published_at.as_deref(), fetched_at),
            source: raw
                .source
                .and_then(|s| s.name)
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| self.metadata.name.clone()),
            // GNews does not report authors
            author: None,
            category: self.metadata.category.clone(),
            country: None,
        })
    }
}

#[async_trait]
impl NewsSource for GNewsSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn fetch_articles(&self, options: &FetchOptions) -> Result<Vec<Article>> {
        let token = self
            .api_key
            .as_deref()
            .ok_or_else(|| PipelineError::SourceNotConfigured(self.metadata.id.clone()))?;
        let query = options.query.as_deref().unwrap_or(&self.query);
        let max = options.page_size.clamp(1, 100).to_string();
        let url = format!("{}/search", self.base_url);

        let params = [
            ("q", query),
            ("lang", options.language.as_str()),
            ("max", max.as_str()),
            ("token", token),
        ];

        let response = self.client.get_with_query(&url, &params).await?;
        let body: GNewsResponse = serde_json::from_str(&response.text().await?)?;

        if let Some(errors) = body.errors {
            return Err(PipelineError::ApiError {
                code: "gnews".to_string(),
                message: errors.to_string(),
            });
        }

        let fetched_at = Utc::now();
        Ok(body
            .articles
            .into_iter()
            .filter_map(|raw| self.normalize(raw, fetched_at))
            .collect())
    }
}
