//! SQLite period store
//!
//! Uses rusqlite behind a deadpool-sqlite connection pool:
//! - `periods`: one row per processed period, keyed by (application, end)
//! - `retention_rows`: one row per (period, user), chain stored as JSON
//!
//! Timestamps are stored as UTC RFC 3339 with millisecond precision so string
//! order equals chronological order.

use crate::error::{RetainlessError, Result};
use crate::storage::{PeriodStore, ReportPeriod};
use crate::types::{PeriodId, PeriodRecord, RetentionRow, UserId, VisitRecord};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use deadpool_sqlite::{Config, Pool, Runtime};
use rusqlite::{params, Connection};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS periods (
    application_id TEXT NOT NULL,
    period_end TEXT NOT NULL,
    period_id TEXT NOT NULL,
    period_expires TEXT NOT NULL,
    salt TEXT NOT NULL,
    secret_version TEXT NOT NULL,
    PRIMARY KEY (application_id, period_end)
);

CREATE TABLE IF NOT EXISTS retention_rows (
    period_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    period_end TEXT NOT NULL,
    visits_prior TEXT NOT NULL DEFAULT '[]',
    request_count INTEGER NOT NULL,
    session_length REAL NOT NULL,
    PRIMARY KEY (period_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_retention_rows_period_end
    ON retention_rows (period_end);
"#;

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

/// SQLite-backed period store
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`
    ///
    /// # Example
    /// ```ignore
    /// let store = SqliteStore::open("retainless.db")?;
    /// store.run_migrations().await?;
    /// ```
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!("Opening period store at: {}", path.display());

        let config = Config::new(path);
        let pool = config.create_pool(Runtime::Tokio1).map_err(|e| {
            RetainlessError::Database(format!("Failed to create connection pool: {}", e))
        })?;

        Ok(Self { pool })
    }

    /// Create tables and indexes; safe to call repeatedly
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running period store migrations...");
        self.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        info!("Period store migrations completed");
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.pool.get().await.map_err(|e| {
            RetainlessError::Database(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.interact(move |conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            f(conn)
        })
        .await
        .map_err(|e| RetainlessError::Database(format!("Pool interaction failed: {}", e)))?
    }
}

/// Columns of a stored retention row before timestamp and JSON decoding
struct StoredRow {
    period_id: String,
    user_id: String,
    period_end: String,
    visits_prior: String,
    request_count: i64,
    session_length: f64,
}

impl StoredRow {
    fn decode(self) -> Result<RetentionRow> {
        let visits_prior: Vec<VisitRecord> = serde_json::from_str(&self.visits_prior)?;
        Ok(RetentionRow {
            period_id: PeriodId(self.period_id),
            user_id: UserId(self.user_id),
            period_end: parse_time(&self.period_end)?,
            visits_prior,
            request_count: self.request_count.max(0) as u64,
            session_length: self.session_length,
        })
    }
}

#[async_trait]
impl PeriodStore for SqliteStore {
    async fn list_retained_periods(&self, application_id: &str) -> Result<Vec<PeriodRecord>> {
        let application_id = application_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT application_id, period_id, period_end, period_expires, salt, secret_version
                FROM periods
                WHERE application_id = ?1
                ORDER BY period_end DESC
                "#,
            )?;
            let raw = stmt
                .query_map(params![application_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            raw.into_iter()
                .map(|(application_id, period_id, end, expires, salt, secret_version)| {
                    Ok(PeriodRecord {
                        application_id,
                        period_id: PeriodId(period_id),
                        period_end: parse_time(&end)?,
                        period_expires: parse_time(&expires)?,
                        salt,
                        secret_version,
                    })
                })
                .collect()
        })
        .await
    }

    async fn load_retention_rows(&self, period_ids: &[PeriodId]) -> Result<Vec<RetentionRow>> {
        let period_ids = period_ids.to_vec();
        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT period_id, user_id, period_end, visits_prior, request_count, session_length
                    FROM retention_rows
                    WHERE period_id = ?1
                    "#,
                )?;

                let mut rows = Vec::new();
                for period_id in &period_ids {
                    let stored = stmt
                        .query_map(params![period_id.as_str()], |row| {
                            Ok(StoredRow {
                                period_id: row.get(0)?,
                                user_id: row.get(1)?,
                                period_end: row.get(2)?,
                                visits_prior: row.get(3)?,
                                request_count: row.get(4)?,
                                session_length: row.get(5)?,
                            })
                        })?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    for row in stored {
                        rows.push(row.decode()?);
                    }
                }
                Ok(rows)
            })
            .await?;

        info!("Loaded {} users from previous periods", rows.len());
        Ok(rows)
    }

    async fn append_period(&self, period: &PeriodRecord) -> Result<()> {
        debug!("Storing period: {}", period.period_id);
        let period = period.clone();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO periods (
                    application_id, period_end, period_id, period_expires, salt, secret_version
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    period.application_id,
                    format_time(period.period_end),
                    period.period_id.as_str(),
                    format_time(period.period_expires),
                    period.salt,
                    period.secret_version,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_retention_rows(&self, rows: &[RetentionRow]) -> Result<()> {
        let rows = rows.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    r#"
                    INSERT OR REPLACE INTO retention_rows (
                        period_id, user_id, period_end, visits_prior, request_count, session_length
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                )?;
                for row in &rows {
                    stmt.execute(params![
                        row.period_id.as_str(),
                        row.user_id.as_str(),
                        format_time(row.period_end),
                        serde_json::to_string(&row.visits_prior)?,
                        row.request_count as i64,
                        row.session_length,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_report_periods(&self) -> Result<Vec<ReportPeriod>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT period_id, MIN(period_end) AS period_end
                FROM retention_rows
                GROUP BY period_id
                ORDER BY period_end ASC
                "#,
            )?;
            let raw = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            raw.into_iter()
                .map(|(period_id, end)| {
                    Ok(ReportPeriod {
                        period_id: PeriodId(period_id),
                        period_end: parse_time(&end)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn purge_expired_periods(&self, now: DateTime<Utc>) -> Result<usize> {
        let purged = self
            .with_conn(move |conn| {
                let purged = conn.execute(
                    "DELETE FROM periods WHERE period_expires <= ?1",
                    params![format_time(now)],
                )?;
                Ok(purged)
            })
            .await?;

        if purged > 0 {
            info!("Purged {} expired periods", purged);
        }
        Ok(purged)
    }
}
