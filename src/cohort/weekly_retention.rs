//! Weekly retention: visitors returning N weeks after their first week
//!
//! Weeks already covered by a prior visit are suppressed so a visitor seen
//! in several periods of one week counts once for that week.

use super::bucket::{Bucketing, SlotVector};
use crate::types::RetentionRow;
use chrono::{DateTime, Utc};

pub const HEADER: &str = "CohortWeek,WeekOffset,UsersReturned,CohortSize";

pub(super) fn row_slots(row: &RetentionRow, cohort_start: DateTime<Utc>) -> SlotVector {
    let mut slots = SlotVector::new();

    for visit in &row.visits_prior {
        slots.suppress(Bucketing::Week.offset(cohort_start, visit.period_end));
    }

    slots.count_if_unset(Bucketing::Week.offset(cohort_start, row.period_end));
    slots
}

pub(super) fn format_line(cohort: &str, offset: usize, totals: &[u64]) -> String {
    format!("{},{},{},{}", cohort, offset, totals[offset], totals[0])
}
