//! News Pipeline Service
//! Periodic news aggregation with deduplication and bounded article lifetime
//!
//! Features:
//! - Multiple sources (NewsAPI, GNews, site scrape) fetched concurrently
//! - Exponential backoff with jitter, per-source rate limits and circuit breakers
//! - First-seen-wins merge keyed by canonical URL
//! - 48h article lifetime with a reaper pass at the start of every tick
//! - Memory or Postgres store
//! - HTTP read endpoint and Prometheus metrics
//! - Graceful shutdown with SIGTERM handling

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use news_pipeline::config::Config;
use news_pipeline::http_client::{HttpClientConfig, ResilientHttpClient};
use news_pipeline::scheduler::{Scheduler, TickOutcome};
use news_pipeline::server::start_http_server;
use news_pipeline::sources::{build_sources, FetchOptions};
use news_pipeline::storage::StoreGateway;

/// News Pipeline - periodic news aggregation with bounded article lifetime
#[derive(Parser, Debug)]
#[command(name = "news-pipeline")]
#[command(author = "Newsroom Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Aggregates news from several providers into a deduplicated, self-expiring store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the scheduler (and HTTP server) until Ctrl+C/SIGTERM
    Run,

    /// Run a single tick and print its report
    Tick,

    /// Delete expired articles only
    Reap,

    /// Print stored articles as JSON, newest first
    List {
        /// Maximum number of articles
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show source configuration and store status
    Status,
}

/// Sets up structured logging with tracing
fn setup_logging(log_level: &str, json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Resolves on SIGTERM/SIGINT
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs);

    let session_id = uuid::Uuid::new_v4();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        session_id = %session_id,
        "Starting News Pipeline"
    );

    let config = Config::load()?;
    config.validate()?;

    info!(
        sources = ?config.configured_sources(),
        tick_interval = %config.tick_interval,
        article_ttl = %config.article_ttl,
        store_backend = %config.store_backend,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Run => run_service(config).await?,
        Commands::Tick => tick_once(config).await?,
        Commands::Reap => reap_once(config).await?,
        Commands::List { limit } => list_articles(config, limit).await?,
        Commands::Status => show_status(config).await?,
    }

    Ok(())
}

/// Wires store, HTTP client and sources into a scheduler
async fn build_scheduler(config: &Config) -> Result<Scheduler> {
    let gateway = StoreGateway::from_config(config).await?;

    let http_config = HttpClientConfig {
        max_concurrent_requests: config.max_concurrent_requests,
        request_timeout: config.fetch_timeout().min(HttpClientConfig::default().request_timeout),
        ..Default::default()
    };
    let http_client = Arc::new(ResilientHttpClient::new(http_config)?);

    let sources = build_sources(config, http_client);
    info!(
        registered = sources.len(),
        configured = sources.iter().filter(|s| s.is_configured()).count(),
        "Sources registered"
    );

    Ok(Scheduler::new(sources, gateway, FetchOptions::from_config(config)))
}

/// Runs the scheduler until a shutdown signal arrives
async fn run_service(config: Config) -> Result<()> {
    let scheduler = build_scheduler(&config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_handle = if config.http_enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
        let gateway = scheduler.gateway().clone();
        Some(tokio::spawn(async move {
            if let Err(e) = start_http_server(addr, gateway, shutdown_rx).await {
                error!(error = %e, "HTTP server failed");
            }
        }))
    } else {
        None
    };

    let interval = config.tick_interval()?;
    let handle = scheduler.start(interval);
    info!(interval = %config.tick_interval, "News Pipeline running");

    shutdown_signal().await;

    info!("Stopping scheduler, waiting for the running tick...");
    handle.stop().await;

    let _ = shutdown_tx.send(true);
    if let Some(http) = http_handle {
        let _ = http.await;
    }

    info!("News Pipeline stopped");
    Ok(())
}

/// Runs one tick from the command line
async fn tick_once(config: Config) -> Result<()> {
    let scheduler = build_scheduler(&config).await?;

    match scheduler.tick().await {
        TickOutcome::Completed(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        TickOutcome::Skipped => warn!("Tick skipped, another tick is running"),
    }
    Ok(())
}

/// Opens the store for a one-shot command that only reads or reaps
async fn open_store(config: &Config, command: &str) -> Result<StoreGateway> {
    let gateway = StoreGateway::from_config(config).await?;
    if !gateway.is_persistent() {
        warn!(
            command,
            backend = gateway.backend(),
            "Store is not persistent, this command sees a fresh empty store; set STORE_BACKEND=postgres"
        );
    }
    Ok(gateway)
}

/// Reaps expired articles without fetching
async fn reap_once(config: Config) -> Result<()> {
    let gateway = open_store(&config, "reap").await?;
    let report = news_pipeline::reaper::Reaper::new(gateway)
        .reap(chrono::Utc::now())
        .await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Prints stored articles
async fn list_articles(config: Config, limit: usize) -> Result<()> {
    let gateway = open_store(&config, "list").await?;
    let articles = gateway.list(limit).await?;

    println!("{}", serde_json::to_string_pretty(&articles)?);
    Ok(())
}

/// Shows source configuration and store status
async fn show_status(config: Config) -> Result<()> {
    let mark = |on: bool, reason: &str| if on { "yes".to_string() } else { format!("no ({reason})") };

    println!("\nNews Pipeline Status");
    println!("====================\n");

    println!("Sources:");
    println!("  - NewsAPI: {}", mark(config.has_newsapi(), "no NEWS_API_KEY or disabled"));
    println!("  - GNews:   {}", mark(config.has_gnews(), "no GNEWS_API_KEY or disabled"));
    println!("  - Scrape:  {}", mark(config.has_scrape(), "no SCRAPE_LISTING_URL or disabled"));
    if let Some(target) = config.scrape_target() {
        println!("    {} <{}>", target.name, target.listing_url);
    }

    println!("\nLifecycle:");
    println!("  Tick interval: {}", config.tick_interval);
    println!("  Article TTL:   {}", config.article_ttl);

    let gateway = open_store(&config, "status").await?;
    println!("\nStore:");
    println!("  Backend: {}", gateway.backend());
    if !gateway.is_persistent() {
        println!("  (not persistent: counts below reflect this process only)");
    }
    match gateway.count().await {
        Ok(count) => println!("  Articles: {count}"),
        Err(e) => println!("  Articles: unavailable ({e})"),
    }

    Ok(())
}
