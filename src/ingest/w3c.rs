//! W3C extended access logs read from disk
//!
//! Understands the format written by CloudFront standard logging and IIS: a
//! `#Fields:` directive names the columns of the data lines that follow.
//! Only `date`, `time`, `c-ip`, `cs(User-Agent)` and `cs-uri-stem` are used;
//! the user agent is kept exactly as logged.

use crate::error::{RetainlessError, Result};
use crate::ingest::{LogQueryBackend, QueryState, TimeWindow};
use crate::types::AccessLogEvent;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

const FIELDS_DIRECTIVE: &str = "#Fields:";

struct Columns {
    date: usize,
    time: usize,
    address: usize,
    agent: usize,
    path: usize,
}

impl Columns {
    fn from_directive(directive: &str, source: &str) -> Result<Self> {
        let names: Vec<&str> = directive.split_whitespace().collect();
        let find = |name: &str| {
            names.iter().position(|n| *n == name).ok_or_else(|| {
                RetainlessError::LogParse(format!("{}: missing '{}' field", source, name))
            })
        };

        Ok(Self {
            date: find("date")?,
            time: find("time")?,
            address: find("c-ip")?,
            agent: find("cs(User-Agent)")?,
            path: find("cs-uri-stem")?,
        })
    }
}

/// Parse one W3C log file's text
///
/// Lines without a client address (`-`) are skipped.
pub fn parse_w3c(text: &str, source: &str) -> Result<Vec<AccessLogEvent>> {
    let mut columns: Option<Columns> = None;
    let mut events = Vec::new();

    for (number, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if let Some(directive) = line.strip_prefix(FIELDS_DIRECTIVE) {
            columns = Some(Columns::from_directive(directive, source)?);
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let columns = columns.as_ref().ok_or_else(|| {
            RetainlessError::LogParse(format!("{}:{}: data before #Fields", source, number + 1))
        })?;

        let values: Vec<&str> = if line.contains('\t') {
            line.split('\t').collect()
        } else {
            line.split_whitespace().collect()
        };
        let value = |index: usize| {
            values.get(index).copied().ok_or_else(|| {
                RetainlessError::LogParse(format!("{}:{}: truncated line", source, number + 1))
            })
        };

        let address = value(columns.address)?;
        if address == "-" || address.is_empty() {
            continue;
        }

        let date = NaiveDate::parse_from_str(value(columns.date)?, "%Y-%m-%d")
            .map_err(|e| RetainlessError::LogParse(format!("{}:{}: {}", source, number + 1, e)))?;
        let time = NaiveTime::parse_from_str(value(columns.time)?, "%H:%M:%S")
            .map_err(|e| RetainlessError::LogParse(format!("{}:{}: {}", source, number + 1, e)))?;

        events.push(AccessLogEvent::new(
            address,
            value(columns.agent)?,
            date.and_time(time).and_utc(),
            value(columns.path)?,
        ));
    }

    Ok(events)
}

/// Log backend over a W3C log file or a directory of them
///
/// Logs are read once when the backend is opened; each query then filters the
/// parsed events by its window.
pub struct W3cLogBackend {
    events: Vec<AccessLogEvent>,
    queries: Mutex<HashMap<String, QueryState>>,
}

impl W3cLogBackend {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let files = if tokio::fs::metadata(path).await?.is_dir() {
            let mut files = Vec::new();
            let mut entries = tokio::fs::read_dir(path).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_file() {
                    files.push(entry.path());
                }
            }
            files.sort();
            files
        } else {
            vec![PathBuf::from(path)]
        };

        let mut events = Vec::new();
        for file in &files {
            let text = tokio::fs::read_to_string(file).await?;
            let parsed = parse_w3c(&text, &file.display().to_string())?;
            debug!("Read {} events from {}", parsed.len(), file.display());
            events.extend(parsed);
        }
        events.sort_by_key(|e| e.timestamp);

        info!("Loaded {} access log lines from {}", events.len(), path.display());
        Ok(Self::from_events(events))
    }

    pub fn from_events(mut events: Vec<AccessLogEvent>) -> Self {
        events.sort_by_key(|e| e.timestamp);
        Self {
            events,
            queries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LogQueryBackend for W3cLogBackend {
    async fn available_since(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.events.first().map(|e| e.timestamp))
    }

    async fn start_query(&self, window: TimeWindow) -> Result<String> {
        let events: Vec<AccessLogEvent> = self
            .events
            .iter()
            .filter(|e| window.contains(e.timestamp))
            .cloned()
            .collect();
        let records_matched = events.len() as u64;

        let query_id = uuid::Uuid::new_v4().to_string();
        self.queries
            .lock()
            .map_err(|_| RetainlessError::Other("query table poisoned".to_string()))?
            .insert(
                query_id.clone(),
                QueryState::Complete {
                    events,
                    records_matched,
                },
            );
        Ok(query_id)
    }

    async fn poll_query(&self, query_id: &str) -> Result<QueryState> {
        let state = self
            .queries
            .lock()
            .map_err(|_| RetainlessError::Other("query table poisoned".to_string()))?
            .remove(query_id);
        Ok(state.unwrap_or_else(|| QueryState::Failed(format!("Unknown query {}", query_id))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{IngestSettings, LogSource, WindowedLogSource};
    use chrono::TimeZone;
    use std::sync::Arc;

    const CLOUDFRONT: &str = "#Version: 1.0\n\
#Fields: date time x-edge-location sc-bytes c-ip cs-method cs(Host) cs-uri-stem sc-status cs(Referer) cs(User-Agent)\n\
2025-10-16\t12:00:00\tORD52\t512\t203.0.113.7\tGET\texample.com\t/\t200\t-\tMozilla/5.0%20(X11)\n\
2025-10-16\t12:01:00\tORD52\t512\t203.0.113.7\tGET\texample.com\t/about\t200\t-\tMozilla/5.0%20(X11)\n\
2025-10-16\t13:00:00\tORD52\t512\t-\tGET\texample.com\t/\t200\t-\t-\n";

    #[test]
    fn test_parse_cloudfront_lines() {
        let events = parse_w3c(CLOUDFRONT, "cf.log").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].client_address, "203.0.113.7");
        assert_eq!(events[0].client_agent, "Mozilla/5.0%20(X11)");
        assert_eq!(events[1].path, "/about");
        assert_eq!(
            events[1].timestamp,
            Utc.with_ymd_and_hms(2025, 10, 16, 12, 1, 0).unwrap()
        );
    }

    #[test]
    fn test_missing_field_rejected() {
        let text = "#Fields: date time c-ip cs-uri-stem\n2025-10-16 12:00:00 192.0.2.1 /\n";
        let err = parse_w3c(text, "iis.log").unwrap_err();
        assert!(err.to_string().contains("cs(User-Agent)"));
    }

    #[test]
    fn test_data_before_fields_rejected() {
        let err = parse_w3c("2025-10-16 12:00:00\n", "bad.log").unwrap_err();
        assert!(matches!(err, RetainlessError::LogParse(_)));
    }

    #[tokio::test]
    async fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.log"), CLOUDFRONT).unwrap();

        let backend = W3cLogBackend::open(dir.path()).await.unwrap();
        let settings = IngestSettings {
            poll_interval: std::time::Duration::from_millis(1),
            ..IngestSettings::default()
        };
        let source = WindowedLogSource::new(Arc::new(backend), settings);

        let start = Utc.with_ymd_and_hms(2025, 10, 16, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 10, 17, 0, 0, 0).unwrap();
        let events = source.fetch(start, end).await.unwrap();
        assert_eq!(events.len(), 2);
    }
}
