//! Access log ingestion
//!
//! A period's time range is split into bounded windows that are queried with
//! bounded parallelism. Each window query is started, polled until it leaves
//! the running state, and rejected when it matched so many records that the
//! backend may have truncated its result.

pub mod w3c;

pub use w3c::W3cLogBackend;

use crate::config::RetainlessConfig;
use crate::error::{RetainlessError, Result};
use crate::types::AccessLogEvent;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Anything that can produce the access log of a time range
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Events with `start <= timestamp < end`
    async fn fetch(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<AccessLogEvent>>;
}

/// Half-open query window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Split `[start, end)` into windows no longer than `max_duration`
    ///
    /// The start is first clamped to `available_since`; nothing left to query
    /// is an error rather than an empty log.
    pub fn split(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        available_since: Option<DateTime<Utc>>,
        max_duration: Duration,
    ) -> Result<Vec<TimeWindow>> {
        if max_duration <= Duration::zero() {
            return Err(RetainlessError::EmptyTimeRange(format!(
                "window length must be positive, got {}s",
                max_duration.num_seconds()
            )));
        }

        let mut window_start = match available_since {
            Some(earliest) if earliest > start => earliest,
            _ => start,
        };

        let mut windows = Vec::new();
        while window_start < end {
            let window_end = (window_start + max_duration).min(end);
            windows.push(TimeWindow {
                start: window_start,
                end: window_end,
            });
            window_start = window_end;
        }

        if windows.is_empty() {
            return Err(RetainlessError::EmptyTimeRange(format!(
                "nothing to query between '{}' and '{}' (logs available since {})",
                start.to_rfc3339_opts(SecondsFormat::Secs, true),
                end.to_rfc3339_opts(SecondsFormat::Secs, true),
                available_since
                    .map(|t| format!("'{}'", t.to_rfc3339_opts(SecondsFormat::Secs, true)))
                    .unwrap_or_else(|| "the beginning".to_string()),
            )));
        }

        Ok(windows)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' to '{}'",
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// Observed state of a running window query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState {
    Running,
    Complete {
        events: Vec<AccessLogEvent>,
        records_matched: u64,
    },
    /// Any terminal state other than complete (failed, cancelled, timed out)
    Failed(String),
}

/// A log store queried asynchronously, one window at a time
#[async_trait]
pub trait LogQueryBackend: Send + Sync {
    /// Earliest instant the backend still holds logs for
    async fn available_since(&self) -> Result<Option<DateTime<Utc>>>;

    /// Start a query over `window`, returning its id
    async fn start_query(&self, window: TimeWindow) -> Result<String>;

    async fn poll_query(&self, query_id: &str) -> Result<QueryState>;
}

/// Limits applied while querying windows
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub max_duration: Duration,
    pub concurrency: usize,
    pub poll_interval: std::time::Duration,
    /// Matched-record count at which a window is considered truncated
    pub max_records: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            max_duration: Duration::hours(2),
            concurrency: 5,
            poll_interval: std::time::Duration::from_millis(500),
            max_records: 9000,
        }
    }
}

impl IngestSettings {
    pub fn from_config(config: &RetainlessConfig) -> Self {
        Self {
            max_duration: config.log_max_duration(),
            concurrency: config.query_concurrency,
            poll_interval: config.poll_interval(),
            max_records: config.max_records_per_query,
        }
    }
}

/// Log source that fans windowed queries out over a backend
pub struct WindowedLogSource {
    backend: Arc<dyn LogQueryBackend>,
    settings: IngestSettings,
}

impl WindowedLogSource {
    pub fn new(backend: Arc<dyn LogQueryBackend>, settings: IngestSettings) -> Self {
        Self { backend, settings }
    }
}

async fn run_window(
    backend: Arc<dyn LogQueryBackend>,
    window: TimeWindow,
    settings: IngestSettings,
) -> Result<Vec<AccessLogEvent>> {
    info!("Running query ({})", window);
    let query_id = backend.start_query(window).await?;

    loop {
        tokio::time::sleep(settings.poll_interval).await;

        match backend.poll_query(&query_id).await? {
            QueryState::Running => continue,
            QueryState::Failed(status) => return Err(RetainlessError::QueryFailed(status)),
            QueryState::Complete {
                events,
                records_matched,
            } => {
                if records_matched >= settings.max_records {
                    return Err(RetainlessError::VolumeExceeded {
                        matched: records_matched,
                        start: window.start.to_rfc3339_opts(SecondsFormat::Secs, true),
                        end: window.end.to_rfc3339_opts(SecondsFormat::Secs, true),
                    });
                }
                debug!("Query {} returned {} events", query_id, events.len());
                return Ok(events);
            }
        }
    }
}

#[async_trait]
impl LogSource for WindowedLogSource {
    async fn fetch(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<AccessLogEvent>> {
        let available_since = self.backend.available_since().await?;
        let windows = TimeWindow::split(start, end, available_since, self.settings.max_duration)?;
        debug!("Querying {} windows", windows.len());

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, window) in windows.iter().copied().enumerate() {
            let backend = Arc::clone(&self.backend);
            let semaphore = Arc::clone(&semaphore);
            let settings = self.settings.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|e| {
                    RetainlessError::Other(format!("Query semaphore closed: {}", e))
                })?;
                let events = run_window(backend, window, settings).await?;
                Ok::<_, RetainlessError>((index, events))
            });
        }

        let mut results: Vec<Vec<AccessLogEvent>> = vec![Vec::new(); windows.len()];
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| RetainlessError::Other(format!("Query task panicked: {}", e)))
                .and_then(|result| result);
            match outcome {
                Ok((index, events)) => results[index] = events,
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        Ok(results.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 16, hour, 0, 0).unwrap()
    }

    /// Backend answering every window with one event per hour it covers
    struct ScriptedBackend {
        available_since: Option<DateTime<Utc>>,
        polls_before_done: usize,
        matched_override: Option<u64>,
        fail_with: Option<String>,
        queries: Mutex<HashMap<String, (TimeWindow, usize)>>,
        started: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                available_since: None,
                polls_before_done: 2,
                matched_override: None,
                fail_with: None,
                queries: Mutex::new(HashMap::new()),
                started: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LogQueryBackend for ScriptedBackend {
        async fn available_since(&self) -> Result<Option<DateTime<Utc>>> {
            Ok(self.available_since)
        }

        async fn start_query(&self, window: TimeWindow) -> Result<String> {
            let id = format!("q{}", self.started.fetch_add(1, Ordering::SeqCst));
            self.queries.lock().unwrap().insert(id.clone(), (window, 0));
            Ok(id)
        }

        async fn poll_query(&self, query_id: &str) -> Result<QueryState> {
            let mut queries = self.queries.lock().unwrap();
            let (window, polls) = queries.get_mut(query_id).unwrap();
            *polls += 1;
            if *polls < self.polls_before_done {
                return Ok(QueryState::Running);
            }
            if let Some(status) = &self.fail_with {
                return Ok(QueryState::Failed(status.clone()));
            }
            let mut events = Vec::new();
            let mut t = window.start;
            while t < window.end {
                events.push(AccessLogEvent::new("192.0.2.1", "curl", t, "/"));
                t += Duration::hours(1);
            }
            let records_matched = self.matched_override.unwrap_or(events.len() as u64);
            Ok(QueryState::Complete {
                events,
                records_matched,
            })
        }
    }

    fn settings() -> IngestSettings {
        IngestSettings {
            poll_interval: std::time::Duration::from_millis(1),
            ..IngestSettings::default()
        }
    }

    #[test]
    fn test_split_into_bounded_windows() {
        let windows = TimeWindow::split(at(0), at(5), None, Duration::hours(2)).unwrap();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0], TimeWindow { start: at(0), end: at(2) });
        assert_eq!(windows[2], TimeWindow { start: at(4), end: at(5) });
    }

    #[test]
    fn test_split_clamps_to_availability() {
        let windows = TimeWindow::split(at(0), at(5), Some(at(3)), Duration::hours(2)).unwrap();
        assert_eq!(windows, vec![TimeWindow { start: at(3), end: at(5) }]);

        let err = TimeWindow::split(at(0), at(5), Some(at(6)), Duration::hours(2)).unwrap_err();
        assert!(matches!(err, RetainlessError::EmptyTimeRange(_)));
    }

    #[test]
    fn test_split_rejects_non_positive_window_length() {
        for length in [Duration::zero(), Duration::minutes(-30)] {
            let err = TimeWindow::split(at(0), at(5), None, length).unwrap_err();
            assert!(matches!(err, RetainlessError::EmptyTimeRange(_)));
        }
    }

    #[tokio::test]
    async fn test_fetch_keeps_window_order() {
        let backend = Arc::new(ScriptedBackend::new());
        let source = WindowedLogSource::new(backend.clone(), settings());

        let events = source.fetch(at(0), at(6)).await.unwrap();
        let hours: Vec<DateTime<Utc>> = events.iter().map(|e| e.timestamp).collect();
        assert_eq!(hours, (0..6).map(at).collect::<Vec<_>>());
        assert_eq!(backend.started.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_volume_limit_aborts() {
        let mut backend = ScriptedBackend::new();
        backend.matched_override = Some(9000);
        let source = WindowedLogSource::new(Arc::new(backend), settings());

        let err = source.fetch(at(0), at(2)).await.unwrap_err();
        assert!(matches!(err, RetainlessError::VolumeExceeded { matched: 9000, .. }));
    }

    #[tokio::test]
    async fn test_failed_query_aborts() {
        let mut backend = ScriptedBackend::new();
        backend.fail_with = Some("Cancelled".to_string());
        let source = WindowedLogSource::new(Arc::new(backend), settings());

        let err = source.fetch(at(0), at(2)).await.unwrap_err();
        assert!(matches!(err, RetainlessError::QueryFailed(ref s) if s == "Cancelled"));
    }
}
