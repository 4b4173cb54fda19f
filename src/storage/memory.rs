//! In-memory article store, keyed by URL in a `BTreeMap`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{ArticleStore, InsertOutcome};
use crate::error::Result;
use crate::schemas::StoredArticle;

#[derive(Debug, Default)]
pub struct MemoryStore {
    articles: RwLock<BTreeMap<String, StoredArticle>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn is_persistent(&self) -> bool {
        false
    }

    async fn exists(&self, url: &str) -> Result<bool> {
        Ok(self.articles.read().await.contains_key(url))
    }

    async fn insert(&self, record: StoredArticle) -> Result<InsertOutcome> {
        // check-and-set under one write lock
        let mut articles = self.articles.write().await;
        match articles.entry(record.article.url.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn expired_by(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        Ok(self
            .articles
            .read()
            .await
            .values()
            .filter(|record| record.is_expired_at(cutoff))
            .map(|record| record.url().to_string())
            .collect())
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        Ok(self.articles.write().await.remove(url).is_some())
    }

    async fn list(&self, limit: usize) -> Result<Vec<StoredArticle>> {
        let articles = self.articles.read().await;
        let mut records: Vec<StoredArticle> = articles.values().cloned().collect();
        records.sort_by(|a, b| {
            b.article
                .published_at
                .cmp(&a.article.published_at)
                .then_with(|| a.article.url.cmp(&b.article.url))
        });
        records.truncate(limit);
        Ok(records)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.articles.read().await.len())
    }
}
