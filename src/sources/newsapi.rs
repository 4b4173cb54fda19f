//! NewsAPI Source
//!
//! General news search against NewsAPI.org
//! https://newsapi.org/docs/endpoints/everything

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{FetchOptions, NewsSource, SourceMetadata};
use crate::dedup::canonicalize_url;
use crate::error::{PipelineError, Result};
use crate::http_client::SourceHttpClient;
use crate::schemas::{parse_published_at, Article, CATEGORY_NIGERIAN_NEWS};

const NEWSAPI_BASE_URL: &str = "https://newsapi.org/v2";
const NEWSAPI_COUNTRY: &str = "ng";
/// Title NewsAPI puts on articles that were taken down
const REMOVED_MARKER: &str = "[Removed]";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiResponse {
    status: String,
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiArticle {
    source: Option<NewsApiArticleSource>,
    author: Option<String>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    url_to_image: Option<String>,
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsApiArticleSource {
    name: Option<String>,
}

pub struct NewsApiSource {
    client: SourceHttpClient,
    api_key: Option<String>,
    query: String,
    base_url: String,
    metadata: SourceMetadata,
}

impl NewsApiSource {
    pub fn new(client: SourceHttpClient, api_key: Option<String>, query: String) -> Self {
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            query,
            base_url: NEWSAPI_BASE_URL.to_string(),
            metadata: SourceMetadata {
                id: "newsapi".to_string(),
                name: "NewsAPI".to_string(),
                description: "General news search".to_string(),
                category: CATEGORY_NIGERIAN_NEWS.to_string(),
            },
        }
    }

    /// Points the source at another endpoint (mirrors, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn normalize(&self, raw: NewsApiArticle, fetched_at: DateTime<Utc>) -> Option<Article> {
        let title = raw.title.unwrap_or_default();
        if title.trim() == REMOVED_MARKER {
            return None;
        }

        let url = match raw.url.as_deref().map(canonicalize_url) {
            Some(Ok(url)) => url,
            _ => {
                debug!(source = "newsapi", url = ?raw.url, "Dropping article without usable URL");
                return None;
            }
        };

        let source = raw
            .source
            .and_then(|s| s.name)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.metadata.name.clone());

        Some(Article {
            url,
            title: title.trim().to_string(),
            description: raw.description.unwrap_or_default().trim().to_string(),
            image: raw.url_to_image.filter(|i| !i.trim().is_empty()),
            published_at: parse_published_at(raw.published_at.as_deref(), fetched_at),
            source,
            author: raw.author.filter(|a| !a.trim().is_empty()),
            category: self.metadata.category.clone(),
            country: Some(NEWSAPI_COUNTRY.to_string()),
        })
    }
}

#[async_trait]
impl NewsSource for NewsApiSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn fetch_articles(&self, options: &FetchOptions) -> Result<Vec<Article>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| PipelineError::SourceNotConfigured(self.metadata.id.clone()))?;
        let query = options.query.as_deref().unwrap_or(&self.query);
        let page_size = options.page_size.clamp(1, 100).to_string();
        let url = format!("{}/everything", self.base_url);

        let params = [
            ("q", query),
            ("language", options.language.as_str()),
            ("sortBy", "publishedAt"),
            ("pageSize", page_size.as_str()),
        ];

        let response = self
            .client
            .send(|client| client.get(&url).query(&params).header("X-Api-Key", api_key))
            .await?;
        let body: NewsApiResponse = serde_json::from_str(&response.text().await?)?;

        if body.status != "ok" {
            return Err(PipelineError::ApiError {
                code: body.code.unwrap_or_else(|| "unknown".to_string()),
                message: body.message.unwrap_or_else(|| "Unknown error".to_string()),
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
