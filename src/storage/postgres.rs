//! Postgres article store
//!
//! Runtime queries only, so building the crate never needs a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info};

use super::{ArticleStore, InsertOutcome};
use crate::error::Result;
use crate::schemas::{Article, StoredArticle};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS news_articles (
        url          TEXT PRIMARY KEY,
        id           CHAR(64) NOT NULL,
        title        TEXT NOT NULL DEFAULT '',
        description  TEXT NOT NULL DEFAULT '',
        image        TEXT,
        published_at TIMESTAMPTZ NOT NULL,
        source       TEXT NOT NULL,
        author       TEXT,
        category     TEXT NOT NULL,
        country      TEXT,
        created_at   TIMESTAMPTZ NOT NULL,
        expires_at   TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS news_articles_expires_at_idx ON news_articles (expires_at)",
    "CREATE INDEX IF NOT EXISTS news_articles_published_at_idx ON news_articles (published_at DESC)",
];

#[derive(Clone)]
pub struct PostgresStore {
    db: PgPool,
}

impl PostgresStore {
    /// Connects and makes sure the table exists
    pub async fn connect(database_url: &str) -> Result<Self> {
        info!("Connecting to database...");

        let db = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        let store = Self { db };
        store.migrate().await?;

        info!("Postgres store ready");
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.db).await?;
        }
        Ok(())
    }
}

fn row_to_record(row: &PgRow) -> std::result::Result<StoredArticle, sqlx::Error> {
    Ok(StoredArticle {
        article: Article {
            url: row.try_get("url")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            image: row.try_get("image")?,
            published_at: row.try_get("published_at")?,
            source: row.try_get("source")?,
            author: row.try_get("author")?,
            category: row.try_get("category")?,
            country: row.try_get("country")?,
        },
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[async_trait]
impl ArticleStore for PostgresStore {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn exists(&self, url: &str) -> Result<bool> {
        let found: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM news_articles WHERE url = $1)")
            .bind(url)
            .fetch_one(&self.db)
            .await?;
        Ok(found)
    }

    async fn insert(&self, record: StoredArticle) -> Result<InsertOutcome> {
        let article = &record.article;
        let result = sqlx::query(
            r#"
            INSERT INTO news_articles
                (url, id, title, description, image, published_at, source, author, category, country, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (url) DO NOTHING
            "#,
        )
        .bind(&article.url)
        .bind(article.id())
        .bind(&article.title)
        .bind(&article.description)
        .bind(&article.image)
        .bind(article.published_at)
        .bind(&article.source)
        .bind(&article.author)
        .bind(&article.category)
        .bind(&article.country)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            debug!(url = %article.url, "Insert hit existing row");
            return Ok(InsertOutcome::AlreadyExists);
        }
        Ok(InsertOutcome::Inserted)
    }

    async fn expired_by(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let urls: Vec<String> = sqlx::query_scalar("SELECT url FROM news_articles WHERE expires_at <= $1")
            .bind(cutoff)
            .fetch_all(&self.db)
            .await?;
        Ok(urls)
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM news_articles WHERE url = $1")
            .bind(url)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, limit: usize) -> Result<Vec<StoredArticle>> {
        let rows = sqlx::query(
            r#"
            SELECT url, title, description, image, published_at, source, author, category, country, created_at, expires_at
            FROM news_articles
            ORDER BY published_at DESC, url ASC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.db)
        .await?;

        let records = rows.iter().map(row_to_record).collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM news_articles")
            .fetch_one(&self.db)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::CATEGORY_NIGERIAN_NEWS;
    use chrono::{Duration as ChronoDuration, TimeZone};

    async fn store() -> PostgresStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch database");
        PostgresStore::connect(&url).await.expect("Failed to connect to Postgres")
    }

    fn record(url: &str, now: DateTime<Utc>) -> StoredArticle {
        StoredArticle::stamp(
            Article::new(url, "Lagos traffic eases", "Punch", CATEGORY_NIGERIAN_NEWS, now).with_country("ng"),
            now,
            ChronoDuration::hours(48),
        )
    }

    #[tokio::test]
    #[ignore = "Integration test - needs Postgres at DATABASE_URL"]
    async fn test_insert_conflict_keeps_first_record() {
        let store = store().await;
        let url = format!("https://pg.test/{}", uuid::Uuid::new_v4());
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();

        assert_eq!(store.insert(record(&url, t)).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            store.insert(record(&url, t + ChronoDuration::minutes(15))).await.unwrap(),
            InsertOutcome::AlreadyExists
        );
        assert!(store.exists(&url).await.unwrap());

        let stored = store
            .list(10_000)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.url() == url)
            .unwrap();
        assert_eq!(stored.created_at, t);
        assert_eq!(stored.article.country.as_deref(), Some("ng"));

        assert!(store.delete(&url).await.unwrap());
        assert!(!store.delete(&url).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "Integration test - needs Postgres at DATABASE_URL"]
    async fn test_expired_by_includes_boundary() {
        let store = store().await;
        let url = format!("https://pg.test/{}", uuid::Uuid::new_v4());
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        store.insert(record(&url, t)).await.unwrap();

        let expires_at = t + ChronoDuration::hours(48);
        let before = store.expired_by(expires_at - ChronoDuration::seconds(1)).await.unwrap();
        assert!(!before.contains(&url));
        let at = store.expired_by(expires_at).await.unwrap();
        assert!(at.contains(&url));

        store.delete(&url).await.unwrap();
    }
}
