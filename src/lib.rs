//! Retainless - Privacy-Preserving Retention Analytics
//!
//! Computes visitor retention from web server access logs without ever
//! persisting a stable visitor identifier:
//! - Visitors are identified per period by a salted hash of address and agent
//! - Each period's salt is random and retained only for a limited time
//! - Returning visitors are linked by re-hashing with a retained period's salt
//! - Cohort reports fold the resulting visit chains into retention curves
//!
//! # Architecture
//!
//! - **Types**: access log events, periods, retention rows
//! - **Processor**: hashing, aggregation, linking and row building for one period
//! - **Cohort**: daily retention, daily survival and weekly retention reports
//! - **Storage**: period store trait and its SQLite backend
//! - **Ingest**: windowed log queries and the W3C log file backend
//! - **Notify**: run summaries and notification channels
//!
//! # Example
//!
//! ```ignore
//! use retainless_core::{PeriodJob, RetainlessConfig, SecretRing, SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RetainlessConfig::load(None)?;
//!     let store = SqliteStore::open(config.database_path())?;
//!     store.run_migrations().await?;
//!
//!     let job = PeriodJob::new(config, secrets, Arc::new(store), logs, notifier);
//!     let summary = job.run(period_end, Utc::now()).await?;
//!     println!("{}", summary.success_body());
//!     Ok(())
//! }
//! ```

pub mod cohort;
pub mod config;
pub mod error;
pub mod ingest;
pub mod job;
pub mod notify;
pub mod processor;
pub mod secrets;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use cohort::{load_report_rows, CohortReport, ReportKind};
pub use config::RetainlessConfig;
pub use error::{RetainlessError, Result};
pub use ingest::{LogSource, W3cLogBackend, WindowedLogSource};
pub use job::PeriodJob;
pub use notify::{Notifier, RunSummary, TracingNotifier, WebhookNotifier};
pub use processor::{process_logs, PeriodContext, PeriodOutput, RunCounters};
pub use secrets::{HashSecret, SecretRing};
pub use storage::{PeriodStore, SqliteStore};
pub use types::{AccessLogEvent, Period, PeriodId, PeriodRecord, RetentionRow, UserId, VisitRecord};
