//! Storage layer for periods and retention rows
//!
//! Provides the store abstraction the period job and the reports run
//! against, plus the batched, bounded-parallel row writer.

pub mod sqlite;
#[cfg(test)]
pub mod test_utils;

use crate::error::{RetainlessError, Result};
use crate::types::{PeriodId, PeriodRecord, RetentionRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

pub use sqlite::SqliteStore;

/// A period that has rows stored, as seen by the reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPeriod {
    pub period_id: PeriodId,
    pub period_end: DateTime<Utc>,
}

/// Storage backend trait defining all required operations
#[async_trait]
pub trait PeriodStore: Send + Sync {
    /// Periods of an application still holding their salt, newest first
    async fn list_retained_periods(&self, application_id: &str) -> Result<Vec<PeriodRecord>>;

    /// All rows of the given periods
    async fn load_retention_rows(&self, period_ids: &[PeriodId]) -> Result<Vec<RetentionRow>>;

    /// Record a processed period
    async fn append_period(&self, period: &PeriodRecord) -> Result<()>;

    /// Write one batch of rows atomically
    async fn append_retention_rows(&self, rows: &[RetentionRow]) -> Result<()>;

    /// Every period with stored rows, oldest first
    async fn list_report_periods(&self) -> Result<Vec<ReportPeriod>>;

    /// Forget salts of periods expired at `now`; returns how many were removed
    async fn purge_expired_periods(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Write rows in batches with bounded parallelism
///
/// There is no transaction across batches: when one fails, batches that
/// already completed stay written and the error reports how many rows made it.
pub async fn write_rows_batched(
    store: Arc<dyn PeriodStore>,
    rows: Vec<RetentionRow>,
    batch_size: usize,
    concurrency: usize,
) -> Result<usize> {
    let total = rows.len();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, batch) in rows.chunks(batch_size.max(1)).enumerate() {
        let batch = batch.to_vec();
        let store = Arc::clone(&store);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| RetainlessError::Other(format!("Write semaphore closed: {}", e)))?;
            debug!("Writing batch {} ({} rows)", index, batch.len());
            store.append_retention_rows(&batch).await?;
            Ok::<usize, RetainlessError>(batch.len())
        });
    }

    let mut written = 0usize;
    let mut failure: Option<String> = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(count)) => written += count,
            Ok(Err(e)) => {
                failure.get_or_insert_with(|| e.to_string());
            }
            Err(e) => {
                failure.get_or_insert_with(|| format!("Write task panicked: {}", e));
            }
        }
        if failure.is_some() {
            tasks.abort_all();
        }
    }

    if let Some(reason) = failure {
        return Err(RetainlessError::BatchWrite {
            written,
            total,
            reason,
        });
    }

    info!("Wrote {} rows in batches of {}", written, batch_size);
    Ok(written)
}
