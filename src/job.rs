//! The scheduled per-period run
//!
//! One run covers the time between the latest retained period and the new
//! period end: it links the period's visitors to retained rows, persists the
//! new period and its rows, and publishes a single notification either way.

use crate::config::RetainlessConfig;
use crate::error::Result;
use crate::ingest::LogSource;
use crate::notify::{failure_body, Notifier, RunSummary, FAILURE_SUBJECT, SUCCESS_SUBJECT};
use crate::processor::{process_logs, validate_chronology, PeriodContext};
use crate::secrets::{HashSecret, SecretRing};
use crate::storage::{write_rows_batched, PeriodStore};
use crate::types::{Period, PeriodId, PeriodRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use tracing::{info, warn};

pub struct PeriodJob {
    config: RetainlessConfig,
    secrets: SecretRing,
    store: Arc<dyn PeriodStore>,
    logs: Arc<dyn LogSource>,
    notifier: Arc<dyn Notifier>,
}

impl PeriodJob {
    pub fn new(
        config: RetainlessConfig,
        secrets: SecretRing,
        store: Arc<dyn PeriodStore>,
        logs: Arc<dyn LogSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            secrets,
            store,
            logs,
            notifier,
        }
    }

    /// Process the period ending at `period_end` and publish the outcome
    ///
    /// A failed notification is logged but does not change the run's result.
    pub async fn run(&self, period_end: DateTime<Utc>, now: DateTime<Utc>) -> Result<RunSummary> {
        match self.execute(period_end, now).await {
            Ok(summary) => {
                if let Err(e) = self
                    .notifier
                    .publish(SUCCESS_SUBJECT, &summary.success_body())
                    .await
                {
                    warn!("Failed to publish results: {}", e);
                }
                Ok(summary)
            }
            Err(error) => {
                if let Err(e) = self
                    .notifier
                    .publish(FAILURE_SUBJECT, &failure_body(&error))
                    .await
                {
                    warn!("Failed to publish processing error: {}", e);
                }
                Err(error)
            }
        }
    }

    /// The newest `link_depth` stored periods whose secret can still be resolved
    fn linkable_periods(&self, records: &[PeriodRecord]) -> Vec<Period> {
        records
            .iter()
            .take(self.config.link_depth)
            .filter_map(|record| match self.secrets.resolve(&record.secret_version) {
                Some(secret) => Some(Period {
                    period_id: record.period_id.clone(),
                    period_end: record.period_end,
                    retired_secret: secret,
                    retired_salt: HashSecret::new(record.salt.clone()),
                }),
                None => {
                    warn!(
                        "Period {} uses unknown secret version '{}'; its users cannot be linked",
                        record.period_id, record.secret_version
                    );
                    None
                }
            })
            .collect()
    }

    async fn execute(&self, period_end: DateTime<Utc>, now: DateTime<Utc>) -> Result<RunSummary> {
        let application_id = &self.config.application_id;
        let period_id = PeriodId::for_period(application_id, period_end);

        info!("Loading previous periods");
        let records = self.store.list_retained_periods(application_id).await?;
        let latest_period_end = records.first().map(|record| record.period_end);
        validate_chronology(period_end, now, latest_period_end, self.config.period_length())?;
        let retained = self.linkable_periods(&records);

        let period_start =
            latest_period_end.unwrap_or_else(|| period_end - self.config.period_length());
        let salt = HashSecret::generate_salt();

        info!("Loading retained users from previous periods");
        let retained_ids: Vec<PeriodId> = retained.iter().map(|p| p.period_id.clone()).collect();
        let retained_rows = if retained_ids.is_empty() {
            Vec::new()
        } else {
            self.store.load_retention_rows(&retained_ids).await?
        };

        info!(
            "Getting access logs for {} to {}",
            period_start.to_rfc3339_opts(SecondsFormat::Secs, true),
            period_end.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let access_log = self.logs.fetch(period_start, period_end).await?;

        let context = PeriodContext {
            period_id: period_id.clone(),
            period_end,
            secret: self.secrets.current(),
            salt: &salt,
            latest_period_end,
            retained_periods: &retained,
            period_length: self.config.period_length(),
        };
        let output = process_logs(access_log, retained_rows, &context, now)?;

        info!("Writing period {}", period_id);
        self.store
            .append_period(&PeriodRecord {
                application_id: application_id.clone(),
                period_id: period_id.clone(),
                period_end,
                period_expires: period_end + self.config.period_expiration(),
                salt: salt.expose().to_string(),
                secret_version: self.secrets.current_version().to_string(),
            })
            .await?;

        info!("Writing {} users", output.rows.len());
        let rows_written = write_rows_batched(
            Arc::clone(&self.store),
            output.rows,
            self.config.write_batch_size,
            self.config.write_concurrency,
        )
        .await?;

        self.store.purge_expired_periods(now).await?;

        info!("Done!");
        Ok(RunSummary {
            period_id,
            period_start,
            period_end,
            counters: output.counters,
            rows_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetainlessError;
    use crate::storage::test_utils::create_test_store;
    use crate::types::AccessLogEvent;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct VecLogSource(Vec<AccessLogEvent>);

    #[async_trait]
    impl LogSource for VecLogSource {
        async fn fetch(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<AccessLogEvent>> {
            Ok(self
                .0
                .iter()
                .filter(|e| e.timestamp >= start && e.timestamp < end)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier(Mutex<Vec<(String, String)>>);

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn publish(&self, subject: &str, body: &str) -> Result<()> {
            self.0.lock().unwrap().push((subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn day(n: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, n, 5, 0, 0).unwrap()
    }

    fn visit(address: &str, at: DateTime<Utc>) -> AccessLogEvent {
        AccessLogEvent::new(address, "Firefox", at, "/")
    }

    async fn job(
        events: Vec<AccessLogEvent>,
    ) -> (PeriodJob, Arc<dyn PeriodStore>, Arc<RecordingNotifier>, TempDir) {
        let (store, dir) = create_test_store().await.unwrap();
        let store: Arc<dyn PeriodStore> = store;
        let notifier = Arc::new(RecordingNotifier::default());
        let job = PeriodJob::new(
            RetainlessConfig::default(),
            SecretRing::single("v1", "app-secret"),
            Arc::clone(&store),
            Arc::new(VecLogSource(events)),
            notifier.clone(),
        );
        (job, store, notifier, dir)
    }

    fn stored_period(period_end: DateTime<Utc>, secret_version: &str) -> PeriodRecord {
        PeriodRecord {
            application_id: "retainless-app".to_string(),
            period_id: PeriodId::for_period("retainless-app", period_end),
            period_end,
            period_expires: period_end + Duration::days(30),
            salt: "old-salt".to_string(),
            secret_version: secret_version.to_string(),
        }
    }

    #[tokio::test]
    async fn test_consecutive_periods_link() {
        let events = vec![
            visit("203.0.113.7", day(16) - Duration::hours(6)),
            visit("203.0.113.7", day(17) - Duration::hours(2)),
            visit("198.51.100.1", day(17) - Duration::hours(1)),
        ];
        let (job, store, notifier, _dir) = job(events).await;

        let first = job.run(day(16), day(16)).await.unwrap();
        assert_eq!(first.rows_written, 1);
        assert_eq!(first.period_start, day(15));

        let second = job.run(day(17), day(17)).await.unwrap();
        assert_eq!(second.period_start, day(16));
        assert_eq!(second.counters.grouped_identities, 2);
        assert_eq!(second.counters.linked, 1);

        let rows = store.load_retention_rows(&[second.period_id]).await.unwrap();
        let chains: Vec<usize> = rows.iter().map(|r| r.visits_prior.len()).collect();
        assert_eq!(chains.iter().sum::<usize>(), 1);

        let periods = store.list_retained_periods("retainless-app").await.unwrap();
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[0].secret_version, "v1");
        assert_eq!(periods[0].period_expires, day(17) + Duration::days(30));

        let published = notifier.0.lock().unwrap();
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|(subject, _)| subject == SUCCESS_SUBJECT));
    }

    #[tokio::test]
    async fn test_chronology_failure_publishes_error() {
        let (job, store, notifier, _dir) = job(vec![]).await;
        job.run(day(10), day(10)).await.unwrap();

        let err = job.run(day(14), day(14)).await.unwrap_err();
        assert!(err.is_chronology());

        assert_eq!(store.list_retained_periods("retainless-app").await.unwrap().len(), 1);
        let published = notifier.0.lock().unwrap();
        assert_eq!(published.last().unwrap().0, FAILURE_SUBJECT);
    }

    #[tokio::test]
    async fn test_unknown_secret_version_not_linked() {
        let events = vec![visit("203.0.113.7", day(17) - Duration::hours(2))];
        let (job, store, _, _dir) = job(events).await;
        store.append_period(&stored_period(day(16), "retired")).await.unwrap();

        let summary = job.run(day(17), day(17)).await.unwrap();
        assert_eq!(summary.period_start, day(16));
        assert_eq!(summary.counters.linked, 0);
        assert_eq!(summary.rows_written, 1);
    }

    #[tokio::test]
    async fn test_dropped_secret_version_does_not_block_later_runs() {
        let events = vec![
            visit("203.0.113.7", day(17) - Duration::hours(2)),
            visit("203.0.113.7", day(18) - Duration::hours(2)),
        ];
        let (job, store, notifier, _dir) = job(events).await;
        store.append_period(&stored_period(day(15), "v1")).await.unwrap();
        store.append_period(&stored_period(day(16), "gone")).await.unwrap();

        // Spacing is checked against day 16 even though only day 15 resolves
        let first = job.run(day(17), day(17)).await.unwrap();
        assert_eq!(first.period_start, day(16));
        assert_eq!(first.counters.linked, 0);

        let second = job.run(day(18), day(18)).await.unwrap();
        assert_eq!(second.period_start, day(17));
        assert_eq!(second.counters.linked, 1);

        let published = notifier.0.lock().unwrap();
        assert!(published.iter().all(|(subject, _)| subject == SUCCESS_SUBJECT));
    }

    #[tokio::test]
    async fn test_link_depth_counts_unresolvable_periods() {
        let events = vec![
            visit("203.0.113.7", day(15) - Duration::hours(2)),
            visit("203.0.113.7", day(17) - Duration::hours(2)),
        ];
        let (job, store, _, _dir) = job(events).await;
        job.run(day(15), day(15)).await.unwrap();
        store.append_period(&stored_period(day(16), "gone")).await.unwrap();

        // link_depth 1 reaches only day 16, so the day 15 visit stays unlinked
        let summary = job.run(day(17), day(17)).await.unwrap();
        assert_eq!(summary.counters.linked, 0);
        assert_eq!(summary.rows_written, 1);
    }

    #[tokio::test]
    async fn test_future_period_rejected() {
        let (job, _, _, _dir) = job(vec![]).await;
        let err = job.run(day(17), day(16)).await.unwrap_err();
        assert!(matches!(err, RetainlessError::Chronology(_)));
    }
}
