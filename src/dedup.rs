//! Deduplication Module
//!
//! Identity of an article is its canonical URL:
//! - fragment removed
//! - tracking parameters (utm_*, fbclid, ...) removed
//! - remaining query parameters sorted
//! - scheme and host lowercased (path case is significant and kept)
//!
//! [`merge`] folds the outputs of all sources into one set, first-seen-wins.

use sha2::{Digest, Sha256};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

use crate::schemas::Article;

const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "msclkid", "mc_cid", "mc_eid", "_ga", "_gl", "yclid", "twclid", "igshid",
];

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Normalizes an absolute http(s) URL to its canonical form
pub fn canonicalize_url(url_str: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(url_str.trim())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(url::ParseError::RelativeUrlWithoutBase);
    }

    url.set_fragment(None);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if params.is_empty() {
        url.set_query(None);
    } else {
        params.sort();
        url.query_pairs_mut().clear().extend_pairs(params);
    }

    Ok(url.to_string())
}

/// SHA-256 of the canonical URL, hex encoded
pub fn article_id(canonical_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Articles keyed by URL, kept in first-seen order
#[derive(Debug, Default, Clone)]
pub struct MergedArticles {
    articles: Vec<Article>,
    index: HashMap<String, usize>,
    duplicates_discarded: usize,
}

impl MergedArticles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an article unless its URL was already seen.
    /// Returns true if the article was kept.
    pub fn push(&mut self, article: Article) -> bool {
        match self.index.entry(article.url.clone()) {
            Entry::Occupied(_) => {
                debug!(url = %article.url, source = %article.source, "Duplicate article discarded");
                self.duplicates_discarded += 1;
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(self.articles.len());
                self.articles.push(article);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.index.contains_key(url)
    }

    pub fn get(&self, url: &str) -> Option<&Article> {
        self.index.get(url).map(|&i| &self.articles[i])
    }

    /// Number of incoming articles dropped because their URL was already present
    pub fn duplicates_discarded(&self) -> usize {
        self.duplicates_discarded
    }

    pub fn iter(&self) -> impl Iterator<Item = &Article> {
        self.articles.iter()
    }

    pub fn into_vec(self) -> Vec<Article> {
        self.articles
    }
}

/// Merges source outputs in registration order; the first article seen for a URL wins
pub fn merge<I, S>(sequences: I) -> MergedArticles
where
    I: IntoIterator<Item = S>,
    S: IntoIterator<Item = Article>,
{
    let mut merged = MergedArticles::new();
    for sequence in sequences {
        for article in sequence {
            merged.push(article);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{CATEGORY_NIGERIAN_NEWS, CATEGORY_WORLD_NEWS};
    use chrono::Utc;

    fn article(url: &str, title: &str, source: &str) -> Article {
        Article::new(url, title, source, CATEGORY_WORLD_NEWS, Utc::now())
    }

    #[test]
    fn test_article_id() {
        let id1 = article_id("https://x.test/a");
        let id2 = article_id("https://x.test/a");
        let id3 = article_id("https://x.test/b");

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
        assert_eq!(id1.len(), 64);
    }

    #[test]
    fn test_canonicalize_url() {
        // Remove tracking params
        let url = "https://example.com/article?id=123&utm_source=twitter&utm_medium=social";
        assert_eq!(canonicalize_url(url).unwrap(), "https://example.com/article?id=123");

        // Remove fragment, lowercase host, keep path case
        let url = "HTTPS://Example.COM/News/Story#section";
        assert_eq!(canonicalize_url(url).unwrap(), "https://example.com/News/Story");

        // Sort params
        let url = "https://example.com/search?z=last&a=first&fbclid=xyz";
        assert_eq!(canonicalize_url(url).unwrap(), "https://example.com/search?a=first&z=last");
    }

    #[test]
    fn test_canonicalize_rejects_non_web_urls() {
        assert!(canonicalize_url("/relative/path").is_err());
        assert!(canonicalize_url("mailto:desk@example.com").is_err());
        assert!(canonicalize_url("").is_err());
    }

    #[test]
    fn test_merge_keeps_one_per_url() {
        let a = vec![article("https://x.test/a", "X", "newsapi"), article("https://x.test/b", "B", "newsapi")];
        let b = vec![article("https://x.test/a", "Y", "gnews")];
        let c = vec![article("https://x.test/a", "Z", "punch"), article("https://x.test/c", "C", "punch")];

        let merged = merge(vec![a, b, c]);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged.duplicates_discarded(), 2);
        assert_eq!(merged.iter().filter(|a| a.url == "https://x.test/a").count(), 1);
    }

    #[test]
    fn test_merge_first_seen_wins() {
        let first = vec![article("https://x.test/a", "X", "newsapi")];
        let second = vec![article("https://x.test/a", "Y", "gnews")];

        let merged = merge(vec![first, second]);

        assert_eq!(merged.len(), 1);
        let kept = merged.get("https://x.test/a").unwrap();
        assert_eq!(kept.title, "X");
        assert_eq!(kept.source, "newsapi");
    }

    #[test]
    fn test_merge_preserves_first_seen_order() {
        let first = vec![
            Article::new("https://x.test/2", "", "s", CATEGORY_NIGERIAN_NEWS, Utc::now()),
            Article::new("https://x.test/1", "", "s", CATEGORY_NIGERIAN_NEWS, Utc::now()),
        ];
        let second = vec![article("https://x.test/3", "", "t"), article("https://x.test/2", "", "t")];

        let urls: Vec<String> = merge(vec![first, second]).into_vec().into_iter().map(|a| a.url).collect();
        assert_eq!(urls, vec!["https://x.test/2", "https://x.test/1", "https://x.test/3"]);
    }

    #[test]
    fn test_merge_empty_inputs() {
        let merged = merge(Vec::<Vec<Article>>::new());
        assert!(merged.is_empty());

        let merged = merge(vec![Vec::new(), vec![article("https://x.test/a", "A", "s")]]);
        assert_eq!(merged.len(), 1);
        assert!(merged.contains("https://x.test/a"));
    }
}
