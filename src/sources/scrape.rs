//! Site scrape source.
//!
//! Reads a news site's listing page and turns each story card into an
//! [`Article`]. What counts as a card, link, title, teaser and image is
//! described by CSS selectors in a [`ScrapeTarget`], so a new site is a
//! configuration change rather than new code.
//!
//! Listing pages carry no reliable publication time, so every item is
//! stamped with the fetch time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};
use url::Url;

use super::{FetchOptions, NewsSource, SourceMetadata};
use crate::dedup::canonicalize_url;
use crate::error::{PipelineError, Result};
use crate::http_client::SourceHttpClient;
use crate::schemas::Article;

/// Where and how to scrape one site
#[derive(Debug, Clone)]
pub struct ScrapeTarget {
    /// Source name stamped on every item
    pub name: String,
    pub listing_url: String,
    /// One match per story card
    pub item_selector: String,
    /// Link inside a card; the card itself is used when it is an anchor
    pub link_selector: String,
    pub title_selector: String,
    pub description_selector: Option<String>,
    pub image_selector: Option<String>,
    pub category: String,
    pub country: Option<String>,
}

struct CompiledSelectors {
    item: Selector,
    link: Selector,
    title: Selector,
    description: Option<Selector>,
    image: Option<Selector>,
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| PipelineError::InvalidSelector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

impl ScrapeTarget {
    /// Checks the listing URL and every selector
    pub fn validate(&self) -> Result<()> {
        self.base_url()?;
        self.compile().map(|_| ())
    }

    fn base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.listing_url)
            .map_err(|e| PipelineError::ParseError(format!("listing URL {}: {e}", self.listing_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PipelineError::ParseError(format!(
                "listing URL {} is not http(s)",
                self.listing_url
            )));
        }
        Ok(url)
    }

    fn compile(&self) -> Result<CompiledSelectors> {
        Ok(CompiledSelectors {
            item: compile(&self.item_selector)?,
            link: compile(&self.link_selector)?,
            title: compile(&self.title_selector)?,
            description: self.description_selector.as_deref().map(compile).transpose()?,
            image: self.image_selector.as_deref().map(compile).transpose()?,
        })
    }
}

pub struct ScrapeSource {
    client: SourceHttpClient,
    target: ScrapeTarget,
    base_url: Url,
    selectors: CompiledSelectors,
    metadata: SourceMetadata,
}

impl ScrapeSource {
    /// Fails if the target's URL or selectors are invalid
    pub fn new(client: SourceHttpClient, target: ScrapeTarget) -> Result<Self> {
        let base_url = target.base_url()?;
        let selectors = target.compile()?;
        let metadata = SourceMetadata {
            id: "scrape".to_string(),
            name: target.name.clone(),
            description: format!("Listing page scrape of {}", target.listing_url),
            category: target.category.clone(),
        };

        Ok(Self {
            client,
            target,
            base_url,
            selectors,
            metadata,
        })
    }

    /// Extracts at most `limit` articles from a listing page, in page order
    pub fn parse_listing(&self, html: &str, fetched_at: DateTime<Utc>, limit: usize) -> Vec<Article> {
        let document = Html::parse_document(html);

        document
            .select(&self.selectors.item)
            .filter_map(|item| self.parse_item(item, fetched_at))
            .take(limit)
            .collect()
    }

    fn parse_item(&self, item: ElementRef<'_>, fetched_at: DateTime<Utc>) -> Option<Article> {
        let link = item
            .select(&self.selectors.link)
            .next()
            .or_else(|| (item.value().name() == "a").then_some(item))?;
        let href = link.value().attr("href")?;

        let url = match self.resolve(href).map(|u| canonicalize_url(&u)) {
            Some(Ok(url)) => url,
            _ => {
                debug!(source = %self.target.name, href, "Skipping item with unusable link");
                return None;
            }
        };

        let title = item
            .select(&self.selectors.title)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| element_text(link));

        let description = self
            .selectors
            .description
            .as_ref()
            .and_then(|sel| item.select(sel).next())
            .map(element_text)
            .unwrap_or_default();

        let image = self
            .selectors
            .image
            .as_ref()
            .and_then(|sel| item.select(sel).next())
            .and_then(|img| img.value().attr("src").or_else(|| img.value().attr("data-src")))
            .and_then(|src| self.resolve(src));

        Some(Article {
            url,
            title,
            description,
            image,
            published_at: fetched_at,
            source: self.target.name.clone(),
            author: None,
            category: self.target.category.clone(),
            country: self.target.country.clone(),
        })
    }

    fn resolve(&self, href: &str) -> Option<String> {
        self.base_url.join(href.trim()).ok().map(|u| u.to_string())
    }
}

/// Visible text of an element with whitespace collapsed
fn element_text(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl NewsSource for ScrapeSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    async fn fetch_articles(&self, options: &FetchOptions) -> Result<Vec<Article>> {
        let response = self
            .client
            .send(|client| client.get(self.base_url.as_str()))
            .await?;
        let html = response.text().await?;

        let articles = self.parse_listing(&html, Utc::now(), options.page_size as usize);
        info!(
            source = %self.target.name,
            bytes = html.len(),
            count = articles.len(),
            "Parsed listing page"
        );
        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::http_client::{HttpClientConfig, ResilientHttpClient};
    use crate::schemas::CATEGORY_NIGERIAN_NEWS;
    use crate::sources::FetchStatus;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LISTING: &str = r#"
        <html><body>
          <article class="story">
            <a href="/2024/01/lagos-traffic?utm_campaign=home"><h3>  Lagos   traffic eases </h3></a>
            <p>Commuters report shorter trips.</p>
            <img src="/images/traffic.jpg">
          </article>
          <article class="story">
            <a href="https://other.test/abuja">Abuja budget passed</a>
          </article>
          <article class="story">
            <span>No link in this card</span>
          </article>
        </body></html>
    "#;

    fn target(listing_url: &str) -> ScrapeTarget {
        ScrapeTarget {
            name: "Punch".to_string(),
            listing_url: listing_url.to_string(),
            item_selector: "article.story".to_string(),
            link_selector: "a[href]".to_string(),
            title_selector: "h2, h3".to_string(),
            description_selector: Some("p".to_string()),
            image_selector: Some("img".to_string()),
            category: CATEGORY_NIGERIAN_NEWS.to_string(),
            country: Some("ng".to_string()),
        }
    }

    fn source(listing_url: &str) -> ScrapeSource {
        let http = Arc::new(ResilientHttpClient::new(HttpClientConfig::default()).unwrap());
        let client = SourceHttpClient::new(http, "scrape", 600, Arc::new(CircuitBreaker::with_defaults("scrape")));
        ScrapeSource::new(client, target(listing_url)).unwrap()
    }

    #[test]
    fn test_parse_listing() {
        let fetched_at = Utc::now();
        let articles = source("https://punchng.com/topics/news/").parse_listing(LISTING, fetched_at, 20);

        assert_eq!(articles.len(), 2);

        let first = &articles[0];
        assert_eq!(first.url, "https://punchng.com/2024/01/lagos-traffic");
        assert_eq!(first.title, "Lagos traffic eases");
        assert_eq!(first.description, "Commuters report shorter trips.");
        assert_eq!(first.image.as_deref(), Some("https://punchng.com/images/traffic.jpg"));
        assert_eq!(first.published_at, fetched_at);
        assert_eq!(first.category, "Nigerian News");
        assert_eq!(first.country.as_deref(), Some("ng"));

        // title falls back to link text, missing teaser becomes empty
        let second = &articles[1];
        assert_eq!(second.url, "https://other.test/abuja");
        assert_eq!(second.title, "Abuja budget passed");
        assert_eq!(second.description, "");
        assert!(second.image.is_none());
    }

    #[test]
    fn test_parse_listing_honours_page_size() {
        let articles = source("https://punchng.com/topics/news/").parse_listing(LISTING, Utc::now(), 1);
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].url, "https://punchng.com/2024/01/lagos-traffic");
    }

    #[tokio::test]
    async fn test_fetch_applies_page_size() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/news"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
            .mount(&server)
            .await;

        let options = FetchOptions::new().page_size(1);
        let result = source(&format!("{}/news", server.uri())).fetch(&options).await;
        assert_eq!(result.status, FetchStatus::Ok);
        assert_eq!(result.articles.len(), 1);
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let mut bad = target("https://punchng.com/");
        bad.item_selector = "article[".to_string();
        assert!(matches!(bad.validate(), Err(PipelineError::InvalidSelector { .. })));

        assert!(target("ftp://punchng.com/").validate().is_err());
        assert!(target("https://punchng.com/").validate().is_ok());
    }

    #[tokio::test]
    async fn test_fetch_from_site() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/news"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
            .mount(&server)
            .await;

        let result = source(&format!("{}/news", server.uri())).fetch(&FetchOptions::new()).await;
        assert_eq!(result.status, FetchStatus::Ok);
        assert_eq!(result.articles.len(), 2);
        assert!(result.articles[0].url.starts_with(&server.uri()));
    }

    #[tokio::test]
    async fn test_site_down_is_contained() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = source(&format!("{}/news", server.uri())).fetch(&FetchOptions::new()).await;
        assert!(matches!(result.status, FetchStatus::Failed(_)));
        assert!(result.articles.is_empty());
    }
}
