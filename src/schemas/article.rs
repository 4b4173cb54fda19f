//! Article Schema
//!
//! One canonical news record, identified by its canonical source URL.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::dedup::article_id;

/// Category assigned to items about Nigeria
pub const CATEGORY_NIGERIAN_NEWS: &str = "Nigerian News";
/// Category assigned to general international items
pub const CATEGORY_WORLD_NEWS: &str = "World News";

/// A normalized article as produced by a source adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    /// Canonical source URL; the identity key
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub published_at: DateTime<Utc>,
    /// Provider or site name
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Article {
    /// Creates an article with empty optional fields
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        source: impl Into<String>,
        category: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            description: String::new(),
            image: None,
            published_at,
            source: source.into(),
            author: None,
            category: category.into(),
            country: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    /// Fixed-width document key derived from the URL (SHA-256, hex)
    pub fn id(&self) -> String {
        article_id(&self.url)
    }
}

/// An article as held by the store, with its lifetime attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredArticle {
    #[serde(flatten)]
    pub article: Article,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StoredArticle {
    /// Stamps an article with `created_at = now` and `expires_at = now + ttl`.
    ///
    /// An expiry past the representable range saturates at the latest instant.
    pub fn stamp(article: Article, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            article,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn url(&self) -> &str {
        &self.article.url
    }

    /// Whether the reaper should delete this record at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Parses a provider timestamp, falling back to `fallback` when absent or malformed
pub fn parse_published_at(raw: Option<&str>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| {
            DateTime::parse_from_rfc3339(s)
                .or_else(|_| DateTime::parse_from_rfc2822(s))
                .ok()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(fallback)
}
