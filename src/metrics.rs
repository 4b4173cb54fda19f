//! Prometheus metrics for the pipeline
//!
//! Metrics include:
//! - ticks run and ticks skipped because one was already running
//! - articles fetched per source, fetch outcomes per status
//! - inserted, duplicate and reaped article counts
//! - store errors per operation
//! - tick duration

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use tracing::error;

static TICKS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("news_pipeline_ticks_total", "Total number of completed ticks")
        .expect("Failed to create ticks metric")
});

static TICK_SKIPS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "news_pipeline_tick_skips_total",
        "Ticks dropped because the previous tick was still running"
    )
    .expect("Failed to create tick_skips metric")
});

static TICK_DURATION: Lazy<Histogram> = Lazy::new(|| {
    let buckets = vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0];
    register_histogram!(HistogramOpts::new(
        "news_pipeline_tick_duration_seconds",
        "Wall time of a full tick in seconds"
    )
    .buckets(buckets))
    .expect("Failed to create tick_duration metric")
});

static ARTICLES_FETCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "news_pipeline_articles_fetched_total",
        "Articles returned by each source",
        &["source"]
    )
    .expect("Failed to create articles_fetched metric")
});

static SOURCE_FETCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "news_pipeline_source_fetches_total",
        "Source fetches by outcome",
        &["source", "status"]
    )
    .expect("Failed to create source_fetches metric")
});

static ARTICLES_INSERTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("news_pipeline_articles_inserted_total", "Articles written to the store")
        .expect("Failed to create articles_inserted metric")
});

static DUPLICATES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "news_pipeline_duplicates_total",
        "Articles skipped as duplicates, by where the duplicate was detected",
        &["stage"]
    )
    .expect("Failed to create duplicates metric")
});

static ARTICLES_REAPED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("news_pipeline_articles_reaped_total", "Expired articles deleted")
        .expect("Failed to create articles_reaped metric")
});

static STORE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "news_pipeline_store_errors_total",
        "Failed store operations",
        &["operation"]
    )
    .expect("Failed to create store_errors metric")
});

static STORED_ARTICLES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("news_pipeline_stored_articles", "Articles currently in the store")
        .expect("Failed to create stored_articles metric")
});

/// Duplicates collapsed by the merge step
pub const DUP_STAGE_MERGE: &str = "merge";
/// Duplicates found already persisted
pub const DUP_STAGE_STORE: &str = "store";

pub fn record_tick(duration_secs: f64) {
    TICKS.inc();
    TICK_DURATION.observe(duration_secs);
}

pub fn record_tick_skipped() {
    TICK_SKIPS.inc();
}

/// Records the outcome of one source fetch
pub fn record_source_fetch(source: &str, status: &str, count: usize) {
    SOURCE_FETCHES.with_label_values(&[source, status]).inc();
    ARTICLES_FETCHED.with_label_values(&[source]).inc_by(count as u64);
}

pub fn record_inserted(count: usize) {
    ARTICLES_INSERTED.inc_by(count as u64);
}

pub fn record_duplicates(stage: &str, count: usize) {
    DUPLICATES.with_label_values(&[stage]).inc_by(count as u64);
}

pub fn record_reaped(count: usize) {
    ARTICLES_REAPED.inc_by(count as u64);
}

pub fn record_store_error(operation: &str) {
    STORE_ERRORS.with_label_values(&[operation]).inc();
}

pub fn set_stored_articles(count: usize) {
    STORED_ARTICLES.set(i64::try_from(count).unwrap_or(i64::MAX));
}

/// Collects all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
