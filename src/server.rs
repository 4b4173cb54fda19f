//! HTTP server for the read query and metrics
//!
//! - `GET /articles?limit=N` stored articles as JSON, newest first
//! - `GET /metrics` Prometheus text format
//! - `GET /health`

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::metrics::gather_metrics;
use crate::schemas::StoredArticle;
use crate::storage::StoreGateway;

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 500;

#[derive(Serialize)]
struct ArticlesResponse {
    count: usize,
    articles: Vec<StoredArticle>,
}

/// `limit` query parameter, defaulted and clamped to `1..=MAX_LIST_LIMIT`
pub fn parse_limit(query: Option<&str>) -> usize {
    query
        .into_iter()
        .flat_map(|q| url::form_urlencoded::parse(q.as_bytes()))
        .find(|(key, _)| key == "limit")
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT)
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json_error(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message }).to_string();
    respond(status, "application/json", body)
}

async fn list_articles(gateway: &StoreGateway, limit: usize) -> Response<Full<Bytes>> {
    let articles = match gateway.list(limit).await {
        Ok(articles) => articles,
        Err(e) => {
            warn!(error = %e, "List query failed");
            return json_error(StatusCode::SERVICE_UNAVAILABLE, "store unavailable");
        }
    };

    let body = ArticlesResponse {
        count: articles.len(),
        articles,
    };
    match serde_json::to_vec(&body) {
        Ok(json) => respond(StatusCode::OK, "application/json", json),
        Err(e) => {
            error!(error = %e, "Failed to encode articles");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed")
        }
    }
}

/// Routes one request
async fn handle(req: Request<Incoming>, gateway: StoreGateway) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    debug!(method = %req.method(), path = req.uri().path(), "HTTP request");

    if req.method() != Method::GET {
        return Ok(json_error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"));
    }

    let response = match req.uri().path() {
        "/articles" => list_articles(&gateway, parse_limit(req.uri().query())).await,
        "/metrics" => respond(StatusCode::OK, "text/plain; version=0.0.4", gather_metrics()),
        "/health" => respond(StatusCode::OK, "text/plain", "ok"),
        _ => json_error(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

/// Serves connections from `listener` until `shutdown` flips to true or its sender is dropped
pub async fn serve(listener: TcpListener, gateway: StoreGateway, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.changed() => {
                info!("HTTP server shutting down");
                return Ok(());
            }
        };

        let io = TokioIo::new(stream);
        let gateway = gateway.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, gateway.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(error = %e, peer = %peer, "Error serving HTTP connection");
            }
        });
    }
}

/// Binds `addr` and serves until shutdown
pub async fn start_http_server(addr: SocketAddr, gateway: StoreGateway, shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "HTTP server listening (/articles, /metrics, /health)");
    serve(listener, gateway, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{Article, CATEGORY_NIGERIAN_NEWS};
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit(None), 50);
        assert_eq!(parse_limit(Some("limit=10")), 10);
        assert_eq!(parse_limit(Some("foo=bar&limit=3")), 3);
        assert_eq!(parse_limit(Some("limit=0")), 1);
        assert_eq!(parse_limit(Some("limit=100000")), 500);
        assert_eq!(parse_limit(Some("limit=ten")), 50);
    }

    async fn spawn_server(gateway: StoreGateway) -> (String, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(serve(listener, gateway, rx));
        (format!("http://{addr}"), tx)
    }

    #[tokio::test]
    async fn test_articles_endpoint() {
        let gateway = StoreGateway::in_memory();
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        for (i, url) in ["https://x.test/a", "https://x.test/b", "https://x.test/c"].iter().enumerate() {
            let article = Article::new(*url, "t", "Punch", CATEGORY_NIGERIAN_NEWS, t + Duration::hours(i as i64));
            gateway.insert(article, t).await.unwrap();
        }
        let (base, _shutdown) = spawn_server(gateway).await;

        let body: serde_json::Value = reqwest::get(format!("{base}/articles?limit=2"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["count"], 2);
        assert_eq!(body["articles"][0]["url"], "https://x.test/c");
        assert_eq!(body["articles"][0]["expiresAt"], "2024-01-17T10:00:00Z");
    }

    #[tokio::test]
    async fn test_health_metrics_and_unknown_paths() {
        let (base, shutdown) = spawn_server(StoreGateway::in_memory()).await;

        let health = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(health.status(), 200);
        assert_eq!(health.text().await.unwrap(), "ok");

        let metrics = reqwest::get(format!("{base}/metrics")).await.unwrap();
        assert_eq!(metrics.status(), 200);

        let missing = reqwest::get(format!("{base}/nope")).await.unwrap();
        assert_eq!(missing.status(), 404);

        shutdown.send(true).unwrap();
    }
}
