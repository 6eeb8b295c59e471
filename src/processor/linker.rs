//! Linking current visitors to their identity in retained periods
//!
//! A visitor's hash changes every period, so continuity is found by
//! re-hashing the current request's client with each retained period's
//! retired secret and salt and looking the result up among that period's
//! rows. Rows from periods whose parameters are gone cannot be tested and
//! are dropped up front.

use crate::error::{RetainlessError, Result};
use crate::processor::hasher::hash_identity;
use crate::types::{AccessLogEvent, Period, PeriodId, RetentionRow, UserId, VisitRecord};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Allowed deviation from one period length between consecutive periods
pub const SPACING_TOLERANCE: f64 = 0.10;

/// Abort unless the new period follows the latest stored one by one period length
///
/// `period_end` may not lie in the future, and `latest_period_end`, the end of
/// the newest stored period whether or not it can still be linked, must lie
/// one period length (+/-10%) before it.
pub fn validate_chronology(
    period_end: DateTime<Utc>,
    now: DateTime<Utc>,
    latest_period_end: Option<DateTime<Utc>>,
    period_length: Duration,
) -> Result<()> {
    if period_end > now {
        return Err(RetainlessError::Chronology(format!(
            "Period end {} is later than now ({})",
            period_end.to_rfc3339(),
            now.to_rfc3339()
        )));
    }

    let Some(latest) = latest_period_end else {
        return Ok(());
    };

    let gap_ms = (period_end - latest).num_milliseconds();
    let expected_ms = period_length.num_milliseconds();
    let tolerance_ms = (expected_ms as f64 * SPACING_TOLERANCE).round() as i64;
    if (gap_ms - expected_ms).abs() > tolerance_ms {
        return Err(RetainlessError::Chronology(format!(
            "Latest retained period ends {} but the new period ends {}; expected a spacing of {}h (+/-{}%)",
            latest.to_rfc3339(),
            period_end.to_rfc3339(),
            period_length.num_hours(),
            (SPACING_TOLERANCE * 100.0) as u32
        )));
    }

    Ok(())
}

/// Retained rows indexed for lookup, restricted to linkable periods
pub struct PeriodLinker<'a> {
    retained_periods: &'a [Period],
    rows_by_user: HashMap<UserId, RetentionRow>,
    dropped_unlinkable: usize,
}

impl<'a> PeriodLinker<'a> {
    /// Index `retained_rows`, dropping rows of periods not in `retained_periods`
    pub fn new(retained_periods: &'a [Period], retained_rows: Vec<RetentionRow>) -> Self {
        let linkable: HashSet<&PeriodId> = retained_periods.iter().map(|p| &p.period_id).collect();

        let supplied = retained_rows.len();
        let mut rows_by_user = HashMap::new();
        let mut kept = 0usize;
        for row in retained_rows {
            if linkable.contains(&row.period_id) {
                kept += 1;
                rows_by_user.insert(row.user_id.clone(), row);
            }
        }

        let dropped_unlinkable = supplied - kept;
        info!("Dropping {} users as unhashable.", dropped_unlinkable);

        Self {
            retained_periods,
            rows_by_user,
            dropped_unlinkable,
        }
    }

    /// Retained rows that could not be linked because their period is gone
    pub fn dropped_unlinkable(&self) -> usize {
        self.dropped_unlinkable
    }

    /// Find the retained row of the same client
    ///
    /// Periods are tried in the order supplied; the first match wins.
    pub fn find_previous(&self, representative: &AccessLogEvent) -> Option<&RetentionRow> {
        self.retained_periods.iter().find_map(|period| {
            let previous_id = hash_identity(
                &representative.client_address,
                &representative.client_agent,
                &period.retired_secret,
                &period.retired_salt,
            );
            self.rows_by_user.get(&previous_id)
        })
    }

    /// Chain for a current visitor: previous chain plus the previous row, or empty
    pub fn chain_for(&self, representative: &AccessLogEvent) -> Option<Vec<VisitRecord>> {
        self.find_previous(representative).map(|previous| {
            let mut chain = previous.visits_prior.clone();
            chain.push(previous.as_visit_record());
            chain
        })
    }
}
