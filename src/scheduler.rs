//! Tick orchestration
//!
//! One tick is: reap expired articles, fetch every registered source
//! concurrently, merge the results in registration order, then persist each
//! merged article that the store does not already hold.
//!
//! A [`Scheduler`] is either idle or running one tick; a tick requested while
//! another is in flight is skipped rather than queued.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::dedup::merge;
use crate::metrics;
use crate::reaper::{ReapReport, Reaper};
use crate::sources::{panic_message, FetchOptions, FetchStatus, NewsSource, SourceFetch};
use crate::storage::{InsertOutcome, StoreGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Per-source line of a tick report
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub source_id: String,
    pub status: FetchStatus,
    pub fetched: usize,
    pub elapsed_ms: u64,
}

impl From<&SourceFetch> for SourceSummary {
    fn from(fetch: &SourceFetch) -> Self {
        Self {
            source_id: fetch.source_id.clone(),
            status: fetch.status.clone(),
            fetched: fetch.articles.len(),
            elapsed_ms: u64::try_from(fetch.elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// A store call that failed for one article
#[derive(Debug, Clone, Serialize)]
pub struct StoreFailure {
    pub url: String,
    pub error: String,
}

/// Everything one tick did
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reap: ReapReport,
    pub sources: Vec<SourceSummary>,
    /// Distinct articles after merging all sources
    pub merged: usize,
    /// Same-URL articles dropped by the merge
    pub duplicates_discarded: usize,
    pub inserted: usize,
    /// Merged articles the store already held
    pub already_present: usize,
    pub insert_failures: Vec<StoreFailure>,
    pub exists_failures: Vec<StoreFailure>,
}

impl TickReport {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceSummary> {
        self.sources
            .iter()
            .filter(|s| matches!(s.status, FetchStatus::Failed(_) | FetchStatus::TimedOut))
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    /// Another tick was running; nothing was done
    Skipped,
    Completed(TickReport),
}

impl TickOutcome {
    pub fn report(&self) -> Option<&TickReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Skipped => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// Resets the running flag however the tick ends, panics included
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct SchedulerInner {
    sources: Vec<Arc<dyn NewsSource>>,
    gateway: StoreGateway,
    reaper: Reaper,
    options: FetchOptions,
    running: AtomicBool,
}

/// Owns the registered sources, the store and the tick state.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Sources are fetched and merged in the order given
    pub fn new(sources: Vec<Arc<dyn NewsSource>>, gateway: StoreGateway, options: FetchOptions) -> Self {
        let configured = sources.iter().filter(|s| s.is_configured()).count();
        if configured == 0 {
            warn!(registered = sources.len(), "No news source is configured, ticks will only reap");
        }

        Self {
            inner: Arc::new(SchedulerInner {
                reaper: Reaper::new(gateway.clone()),
                sources,
                gateway,
                options,
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.inner.running.load(Ordering::Acquire) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    pub fn sources(&self) -> &[Arc<dyn NewsSource>] {
        &self.inner.sources
    }

    pub fn gateway(&self) -> &StoreGateway {
        &self.inner.gateway
    }

    pub fn reaper(&self) -> &Reaper {
        &self.inner.reaper
    }

    /// Runs one tick now
    pub async fn tick(&self) -> TickOutcome {
        self.tick_at(Utc::now()).await
    }

    /// Runs one tick with `now` as the reap cutoff and the `created_at` of new records
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickOutcome {
        let Some(_guard) = self.try_enter() else {
            debug!("Tick already running, skipping");
            metrics::record_tick_skipped();
            return TickOutcome::Skipped;
        };

        TickOutcome::Completed(self.run_tick(Uuid::new_v4(), now).await)
    }

    fn try_enter(&self) -> Option<RunningGuard<'_>> {
        self.inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(&self.inner.running))
    }

    #[instrument(skip(self), fields(tick_id = %tick_id))]
    async fn run_tick(&self, tick_id: Uuid, now: DateTime<Utc>) -> TickReport {
        let started_at = Utc::now();
        let timer = Instant::now();
        let inner = &self.inner;

        let reap = inner.reaper.reap(now).await;

        let fetches = join_all(inner.sources.iter().map(|source| source.fetch(&inner.options))).await;
        let sources: Vec<SourceSummary> = fetches.iter().map(SourceSummary::from).collect();

        let merged = merge(fetches.into_iter().map(|fetch| fetch.articles));
        let duplicates_discarded = merged.duplicates_discarded();
        metrics::record_duplicates(metrics::DUP_STAGE_MERGE, duplicates_discarded);

        let mut report = TickReport {
            tick_id,
            started_at,
            finished_at: started_at,
            reap,
            sources,
            merged: merged.len(),
            duplicates_discarded,
            inserted: 0,
            already_present: 0,
            insert_failures: Vec::new(),
            exists_failures: Vec::new(),
        };

        for article in merged.into_vec() {
            match inner.gateway.exists(&article.url).await {
                Ok(true) => {
                    report.already_present += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(url = %article.url, error = %e, "Existence check failed, article skipped");
                    metrics::record_store_error("exists");
                    report.exists_failures.push(StoreFailure {
                        url: article.url,
                        error: e.to_string(),
                    });
                    continue;
                }
            }

            let url = article.url.clone();
            match inner.gateway.insert(article, now).await {
                Ok(InsertOutcome::Inserted) => report.inserted += 1,
                // lost a race with another writer
                Ok(InsertOutcome::AlreadyExists) => report.already_present += 1,
                Err(e) => {
                    warn!(url = %url, error = %e, "Insert failed");
                    metrics::record_store_error("insert");
                    report.insert_failures.push(StoreFailure {
                        url,
                        error: e.to_string(),
                    });
                }
            }
        }

        metrics::record_inserted(report.inserted);
        metrics::record_duplicates(metrics::DUP_STAGE_STORE, report.already_present);
        if let Ok(count) = inner.gateway.count().await {
            metrics::set_stored_articles(count);
        }

        report.finished_at = Utc::now();
        let elapsed = timer.elapsed();
        metrics::record_tick(elapsed.as_secs_f64());

        info!(
            reaped = report.reap.deleted,
            merged = report.merged,
            duplicates = report.duplicates_discarded,
            inserted = report.inserted,
            already_present = report.already_present,
            store_failures = report.insert_failures.len() + report.exists_failures.len(),
            failed_sources = report.failed_sources().count(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Tick completed"
        );

        report
    }

    /// Starts periodic ticking; the first tick fires immediately.
    ///
    /// Firings that land while a tick is still running are dropped.
    pub fn start(&self, period: Duration) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let scheduler = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = period.as_secs_f64(), "Scheduler started");

            loop {
                tokio::select! {
                    biased;
                    // a send or a dropped handle both end the loop
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        match AssertUnwindSafe(scheduler.tick()).catch_unwind().await {
                            Ok(TickOutcome::Skipped) => debug!("Timer fired during a running tick, dropped"),
                            Ok(TickOutcome::Completed(_)) => {}
                            Err(panic) => error!(panic = %panic_message(&*panic), "Tick panicked, timer keeps running"),
                        }
                    }
                }
            }

            info!("Scheduler stopped");
        });

        SchedulerHandle { stop_tx, task }
    }
}

/// Handle to a running timer; dropping it also stops the timer
pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops the timer and waits for an in-flight tick to finish
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
