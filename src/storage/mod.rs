//! Storage layer for articles
//!
//! [`StoreGateway`] is the pipeline's only door to persistence. It owns the
//! article lifetime (TTL) and stamps `createdAt`/`expiresAt` on insert; the
//! backends behind [`ArticleStore`] only store and query records.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::schemas::{Article, StoredArticle};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Default article lifetime
pub const DEFAULT_TTL_HOURS: i64 = 48;

/// Outcome of an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with this URL already exists; nothing was written
    AlreadyExists,
}

/// Backend contract: keyed by canonical URL, write-once records
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Backend name for logs
    fn kind(&self) -> &'static str;

    /// False when records live only as long as the process
    fn is_persistent(&self) -> bool {
        true
    }

    async fn exists(&self, url: &str) -> Result<bool>;

    /// Writes the record unless its URL is already present; must never create a second record
    async fn insert(&self, record: StoredArticle) -> Result<InsertOutcome>;

    /// URLs of records whose `expires_at` is at or before `cutoff`
    async fn expired_by(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>>;

    /// Returns false if nothing was stored under `url`
    async fn delete(&self, url: &str) -> Result<bool>;

    /// Newest first by `published_at`
    async fn list(&self, limit: usize) -> Result<Vec<StoredArticle>>;

    async fn count(&self) -> Result<usize>;
}

/// The pipeline's access point to persistence
#[derive(Clone)]
pub struct StoreGateway {
    store: Arc<dyn ArticleStore>,
    ttl: Duration,
}

impl StoreGateway {
    pub fn new(store: Arc<dyn ArticleStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Gateway over a fresh in-memory store with the default 48h TTL
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Duration::hours(DEFAULT_TTL_HOURS))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn backend(&self) -> &'static str {
        self.store.kind()
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_persistent()
    }

    pub async fn exists(&self, url: &str) -> Result<bool> {
        self.store.exists(url).await
    }

    /// Stamps `created_at = now`, `expires_at = now + ttl` and writes the record
    pub async fn insert(&self, article: Article, now: DateTime<Utc>) -> Result<InsertOutcome> {
        let url = article.url.clone();
        let outcome = self.store.insert(StoredArticle::stamp(article, now, self.ttl)).await?;
        if outcome == InsertOutcome::AlreadyExists {
            debug!(url = %url, "Article already stored, insert skipped");
        }
        Ok(outcome)
    }

    /// URLs of articles whose lifetime has elapsed by `cutoff`
    pub async fn older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        self.store.expired_by(cutoff).await
    }

    pub async fn delete(&self, url: &str) -> Result<bool> {
        self.store.delete(url).await
    }

    /// Read query for the presentation layer: newest `published_at` first
    pub async fn list(&self, limit: usize) -> Result<Vec<StoredArticle>> {
        self.store.list(limit).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count().await
    }

    /// Builds the gateway the configuration asks for.
    ///
    /// A postgres backend that cannot be reached falls back to memory so the
    /// service still starts.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let ttl = config.article_lifetime()?;

        let store: Arc<dyn ArticleStore> = match config.store_backend.as_str() {
            "memory" => Arc::new(MemoryStore::new()),
            "postgres" => match config.database_url.as_deref() {
                Some(url) => match PostgresStore::connect(url).await {
                    Ok(store) => Arc::new(store),
                    Err(e) => {
                        warn!(error = %e, "Postgres unavailable, falling back to in-memory store");
                        Arc::new(MemoryStore::new())
                    }
                },
                None => {
                    warn!("STORE_BACKEND=postgres but DATABASE_URL is not set, using in-memory store");
                    Arc::new(MemoryStore::new())
                }
            },
            other => {
                return Err(PipelineError::StorageError(format!("unknown store backend: {other}")));
            }
        };

        info!(backend = store.kind(), ttl_hours = ttl.num_hours(), "Store initialized");
        Ok(Self::new(store, ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::CATEGORY_WORLD_NEWS;
    use chrono::TimeZone;

    fn article(url: &str) -> Article {
        Article::new(url, "t", "s", CATEGORY_WORLD_NEWS, Utc::now())
    }

    #[tokio::test]
    async fn test_insert_stamps_lifetime() {
        let gateway = StoreGateway::in_memory();
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();

        assert_eq!(gateway.insert(article("https://x.test/a"), t).await.unwrap(), InsertOutcome::Inserted);

        let stored = gateway.list(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].created_at, t);
        assert_eq!(stored[0].expires_at, t + Duration::hours(48));
    }

    #[tokio::test]
    async fn test_second_insert_never_duplicates() {
        let gateway = StoreGateway::in_memory();
        let t = Utc::now();

        gateway.insert(article("https://x.test/a"), t).await.unwrap();
        let again = gateway
            .insert(article("https://x.test/a"), t + Duration::minutes(15))
            .await
            .unwrap();

        assert_eq!(again, InsertOutcome::AlreadyExists);
        assert_eq!(gateway.count().await.unwrap(), 1);
        // the original record is untouched
        assert_eq!(gateway.list(1).await.unwrap()[0].created_at, t);
    }

    #[tokio::test]
    async fn test_older_than_and_delete() {
        let gateway = StoreGateway::in_memory();
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        gateway.insert(article("https://x.test/old"), t).await.unwrap();
        gateway.insert(article("https://x.test/new"), t + Duration::hours(10)).await.unwrap();

        let expired = gateway.older_than(t + Duration::hours(48)).await.unwrap();
        assert_eq!(expired, vec!["https://x.test/old".to_string()]);

        assert!(gateway.delete("https://x.test/old").await.unwrap());
        assert!(!gateway.delete("https://x.test/old").await.unwrap());
        assert!(!gateway.exists("https://x.test/old").await.unwrap());
        assert!(gateway.exists("https://x.test/new").await.unwrap());
    }

    #[tokio::test]
    async fn test_from_config_unknown_backend() {
        let mut vars = std::collections::HashMap::new();
        vars.insert("STORE_BACKEND".to_string(), "firestore".to_string());
        let config = Config::from_vars(vars).unwrap();
        assert!(matches!(
            StoreGateway::from_config(&config).await,
            Err(PipelineError::StorageError(_))
        ));
    }

    #[tokio::test]
    async fn test_from_config_postgres_without_url_degrades() {
        let mut vars = std::collections::HashMap::new();
        vars.insert("STORE_BACKEND".to_string(), "postgres".to_string());
        vars.insert("ARTICLE_TTL".to_string(), "24h".to_string());
        let config = Config::from_vars(vars).unwrap();

        let gateway = tokio_test::assert_ok!(StoreGateway::from_config(&config).await);
        assert_eq!(gateway.backend(), "memory");
        assert!(!gateway.is_persistent());
        assert_eq!(gateway.ttl(), Duration::hours(24));
    }

    #[tokio::test]
    async fn test_from_config_rejects_oversized_ttl() {
        let mut vars = std::collections::HashMap::new();
        vars.insert("ARTICLE_TTL".to_string(), "300000years".to_string());
        let config = Config::from_vars(vars).unwrap();
        assert!(matches!(
            StoreGateway::from_config(&config).await,
            Err(PipelineError::InvalidDuration { .. })
        ));
    }
}
