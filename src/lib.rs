//! News aggregation and lifecycle pipeline
//!
//! Periodically pulls articles from several providers, merges them by
//! canonical URL, stores each article once with a bounded lifetime and reaps
//! what has expired.
//!
//! Features:
//! - Pluggable sources (NewsAPI, GNews, CSS-selector site scrape)
//! - Per-source rate limiting and circuit breakers
//! - Exponential backoff with jitter for retries
//! - First-seen-wins merge keyed by canonical URL
//! - Memory or Postgres storage behind one gateway
//! - Prometheus metrics and a read endpoint

pub mod circuit_breaker;
pub mod config;
pub mod dedup;
pub mod error;
pub mod http_client;
pub mod metrics;
pub mod reaper;
pub mod scheduler;
pub mod schemas;
pub mod server;
pub mod sources;
pub mod storage;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use scheduler::{Scheduler, SchedulerHandle, TickOutcome, TickReport};
pub use storage::StoreGateway;
