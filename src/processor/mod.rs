//! Per-period log processing
//!
//! Turns one period's raw access log into pseudonymous retention rows:
//! - **hasher**: identity digest for a (secret, salt) pair
//! - **aggregate**: one session per current identity
//! - **linker**: chronology guard and chain linking against retained periods
//! - **builder**: final rows and run counters

pub mod aggregate;
pub mod builder;
pub mod hasher;
pub mod linker;

pub use aggregate::{group_by_identity, VisitorSession};
pub use builder::{build_rows, PeriodOutput, RunCounters};
pub use hasher::hash_identity;
pub use linker::{validate_chronology, PeriodLinker};

use crate::error::Result;
use crate::secrets::HashSecret;
use crate::types::{AccessLogEvent, Period, PeriodId, RetentionRow};
use chrono::{DateTime, Duration, Utc};
use tracing::info;

/// Parameters of the period being processed
#[derive(Debug, Clone)]
pub struct PeriodContext<'a> {
    pub period_id: PeriodId,
    pub period_end: DateTime<Utc>,
    pub secret: &'a HashSecret,
    pub salt: &'a HashSecret,
    /// End of the newest stored period, linkable or not
    pub latest_period_end: Option<DateTime<Utc>>,
    /// Linkable periods, in the order they should be tried
    pub retained_periods: &'a [Period],
    pub period_length: Duration,
}

/// Process one period's access log against the retained rows
///
/// Fails only on a chronology violation, which is checked before any work.
pub fn process_logs(
    access_log: Vec<AccessLogEvent>,
    retained_rows: Vec<RetentionRow>,
    context: &PeriodContext<'_>,
    now: DateTime<Utc>,
) -> Result<PeriodOutput> {
    validate_chronology(
        context.period_end,
        now,
        context.latest_period_end,
        context.period_length,
    )?;

    let linker = PeriodLinker::new(context.retained_periods, retained_rows);

    let access_log_events = access_log.len();
    info!("Analyzing {} access log events", access_log_events);

    let sessions = group_by_identity(access_log, context.secret, context.salt);
    info!("Grouped {} unique visitors", sessions.len());

    let output = build_rows(
        &context.period_id,
        context.period_end,
        sessions,
        &linker,
        access_log_events,
    );
    info!("Linked {} returning visitors", output.counters.linked);

    Ok(output)
}
