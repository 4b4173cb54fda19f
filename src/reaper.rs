//! Expired article removal

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::metrics;
use crate::storage::StoreGateway;

/// What a reap pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    /// Records found past their lifetime
    pub expired: usize,
    pub deleted: usize,
    /// Failed store calls (the expiry query or individual deletes)
    pub failed: usize,
}

/// Deletes articles whose `expires_at` has passed
#[derive(Clone)]
pub struct Reaper {
    gateway: StoreGateway,
}

impl Reaper {
    pub fn new(gateway: StoreGateway) -> Self {
        Self { gateway }
    }

    /// Deletes every article expired at `now`.
    ///
    /// Never fails: store errors are counted in the report and the remaining
    /// records are picked up by the next pass.
    #[instrument(skip(self), fields(now = %now))]
    pub async fn reap(&self, now: DateTime<Utc>) -> ReapReport {
        let mut report = ReapReport::default();

        let expired = match self.gateway.older_than(now).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!(error = %e, "Expiry query failed, reap deferred");
                metrics::record_store_error("older_than");
                report.failed = 1;
                return report;
            }
        };
        report.expired = expired.len();

        for url in &expired {
            match self.gateway.delete(url).await {
                Ok(true) => report.deleted += 1,
                // removed concurrently; nothing left to do
                Ok(false) => debug!(url = %url, "Expired article already gone"),
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to delete expired article");
                    metrics::record_store_error("delete");
                    report.failed += 1;
                }
            }
        }

        metrics::record_reaped(report.deleted);
        if report.expired > 0 {
            info!(
                expired = report.expired,
                deleted = report.deleted,
                failed = report.failed,
                "Reaped expired articles"
            );
        }
        report
    }
}
