//! Integration Tests for the News Pipeline
//!
//! Uses wiremock for the provider endpoints and runs full ticks through the
//! real adapters, merge step and store gateway.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use news_pipeline::circuit_breaker::CircuitBreaker;
use news_pipeline::dedup::merge;
use news_pipeline::http_client::{HttpClientConfig, ResilientHttpClient, SourceHttpClient};
use news_pipeline::reaper::Reaper;
use news_pipeline::scheduler::{Scheduler, TickOutcome, TickReport};
use news_pipeline::schemas::{Article, CATEGORY_WORLD_NEWS};
use news_pipeline::sources::{FetchOptions, FetchStatus, GNewsSource, NewsApiSource, NewsSource};
use news_pipeline::storage::StoreGateway;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
}

fn source_client(http: &Arc<ResilientHttpClient>, id: &str) -> SourceHttpClient {
    SourceHttpClient::new(http.clone(), id, 600, Arc::new(CircuitBreaker::with_defaults(id)))
}

fn http_client() -> Arc<ResilientHttpClient> {
    Arc::new(ResilientHttpClient::new(HttpClientConfig::default()).unwrap())
}

fn newsapi_body(items: &[(&str, &str)]) -> serde_json::Value {
    let articles: Vec<_> = items
        .iter()
        .map(|(url, title)| {
            json!({
                "source": {"id": null, "name": "Punch"},
                "author": null,
                "title": title,
                "description": "desc",
                "url": url,
                "urlToImage": null,
                "publishedAt": "2024-01-15T09:00:00Z"
            })
        })
        .collect();
    json!({"status": "ok", "totalResults": articles.len(), "articles": articles})
}

fn gnews_body(items: &[(&str, &str)]) -> serde_json::Value {
    let articles: Vec<_> = items
        .iter()
        .map(|(url, title)| {
            json!({
                "title": title,
                "description": "desc",
                "url": url,
                "image": null,
                "publishedAt": "2024-01-15T08:00:00Z",
                "source": {"name": "World Wire", "url": "https://world.test"}
            })
        })
        .collect();
    json!({"totalArticles": articles.len(), "articles": articles})
}

async fn newsapi_server(status: u16, body: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/everything"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(&server)
        .await;
    server
}

async fn gnews_server(body: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

fn pipeline(newsapi: &MockServer, gnews: &MockServer, gateway: &StoreGateway) -> Scheduler {
    let http = http_client();
    let sources: Vec<Arc<dyn NewsSource>> = vec![
        Arc::new(
            NewsApiSource::new(source_client(&http, "newsapi"), Some("key".to_string()), "Nigeria".to_string())
                .with_base_url(newsapi.uri()),
        ),
        Arc::new(
            GNewsSource::new(source_client(&http, "gnews"), Some("token".to_string()), "world".to_string())
                .with_base_url(gnews.uri()),
        ),
    ];
    Scheduler::new(sources, gateway.clone(), FetchOptions::new())
}

fn completed(outcome: TickOutcome) -> TickReport {
    match outcome {
        TickOutcome::Completed(report) => report,
        TickOutcome::Skipped => panic!("tick was skipped"),
    }
}

/// Two adapters report the same URL with different titles
#[tokio::test]
async fn test_same_url_from_two_sources_keeps_first_registered() {
    let newsapi = newsapi_server(200, newsapi_body(&[("https://x.test/a", "Title from NewsAPI")])).await;
    let gnews = gnews_server(gnews_body(&[("https://x.test/a?utm_source=gnews", "Title from GNews")])).await;
    let gateway = StoreGateway::in_memory();

    let report = completed(pipeline(&newsapi, &gnews, &gateway).tick_at(t0()).await);

    assert_eq!(report.merged, 1);
    assert_eq!(report.duplicates_discarded, 1);
    let stored = gateway.list(10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].article.title, "Title from NewsAPI");
    assert_eq!(stored[0].article.category, "Nigerian News");
}

/// One adapter fails authentication, the other still lands its articles
#[tokio::test]
async fn test_auth_failure_on_one_source_is_isolated() {
    let newsapi = newsapi_server(
        401,
        json!({"status": "error", "code": "apiKeyInvalid", "message": "Your API key is invalid"}),
    )
    .await;
    let gnews = gnews_server(gnews_body(&[
        ("https://world.test/1", "one"),
        ("https://world.test/2", "two"),
        ("https://world.test/3", "three"),
    ]))
    .await;
    let gateway = StoreGateway::in_memory();

    let report = completed(pipeline(&newsapi, &gnews, &gateway).tick_at(t0()).await);

    assert!(matches!(report.sources[0].status, FetchStatus::Failed(_)));
    assert_eq!(report.sources[1].status, FetchStatus::Ok);
    assert_eq!(report.inserted, 3);
    assert_eq!(gateway.count().await.unwrap(), 3);
}

/// An article is visible shortly after insert and gone once its lifetime passes
#[tokio::test]
async fn test_article_lifecycle() {
    let gateway = StoreGateway::in_memory();
    gateway
        .insert(Article::new("https://x.test/a", "a", "Punch", CATEGORY_WORLD_NEWS, t0()), t0())
        .await
        .unwrap();
    let reaper = Reaper::new(gateway.clone());

    reaper.reap(t0() + Duration::minutes(10)).await;
    let listed = gateway.list(50).await.unwrap();
    assert!(listed.iter().any(|r| r.article.url == "https://x.test/a"));

    reaper.reap(t0() + Duration::hours(47)).await;
    assert!(gateway.exists("https://x.test/a").await.unwrap());

    reaper.reap(t0() + Duration::hours(49)).await;
    assert!(!gateway.exists("https://x.test/a").await.unwrap());
}

/// Back-to-back reaps with nothing newly expired
#[tokio::test]
async fn test_second_reap_deletes_nothing() {
    let gateway = StoreGateway::in_memory();
    gateway
        .insert(Article::new("https://x.test/a", "a", "Punch", CATEGORY_WORLD_NEWS, t0()), t0())
        .await
        .unwrap();
    let reaper = Reaper::new(gateway);

    let now = t0() + Duration::hours(49);
    assert_eq!(reaper.reap(now).await.deleted, 1);
    assert_eq!(reaper.reap(now).await.deleted, 0);
}

#[tokio::test]
async fn test_full_tick_twice_persists_same_set() {
    let newsapi = newsapi_server(
        200,
        newsapi_body(&[("https://punchng.com/1", "one"), ("https://punchng.com/2", "two")]),
    )
    .await;
    let gnews = gnews_server(gnews_body(&[("https://world.test/1", "w1")])).await;
    let gateway = StoreGateway::in_memory();
    let scheduler = pipeline(&newsapi, &gnews, &gateway);

    let first = completed(scheduler.tick_at(t0()).await);
    let after_first: Vec<String> = gateway.list(50).await.unwrap().into_iter().map(|r| r.article.url).collect();

    let second = completed(scheduler.tick_at(t0() + Duration::minutes(15)).await);
    let after_second: Vec<String> = gateway.list(50).await.unwrap().into_iter().map(|r| r.article.url).collect();

    assert_eq!(first.inserted, 3);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.already_present, 3);
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn test_unconfigured_sources_leave_store_untouched() {
    let http = http_client();
    let sources: Vec<Arc<dyn NewsSource>> = vec![
        Arc::new(NewsApiSource::new(source_client(&http, "newsapi"), None, "Nigeria".to_string())),
        Arc::new(GNewsSource::new(source_client(&http, "gnews"), None, "world".to_string())),
    ];
    let gateway = StoreGateway::in_memory();
    let scheduler = Scheduler::new(sources, gateway.clone(), FetchOptions::new());

    let report = completed(scheduler.tick().await);

    assert!(report.sources.iter().all(|s| s.status == FetchStatus::NotConfigured));
    assert_eq!(report.merged, 0);
    assert_eq!(gateway.count().await.unwrap(), 0);
}

#[test]
fn test_merge_keeps_exactly_one_per_url() {
    let a = |url: &str, title: &str| Article::new(url, title, "s", CATEGORY_WORLD_NEWS, t0());
    let merged = merge(vec![
        vec![a("https://x.test/1", "A1"), a("https://x.test/2", "A2")],
        vec![a("https://x.test/2", "B2"), a("https://x.test/3", "B3")],
        vec![a("https://x.test/1", "C1"), a("https://x.test/2", "C2")],
    ]);

    assert_eq!(merged.len(), 3);
    assert_eq!(merged.duplicates_discarded(), 3);
    assert_eq!(merged.get("https://x.test/2").unwrap().title, "A2");
}
