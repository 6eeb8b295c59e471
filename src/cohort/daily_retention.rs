//! Daily retention: visitors active N days after their first visit
//!
//! Every row counts once at its own day offset; nothing is deduplicated
//! across a visitor's chain.

use super::bucket::{Bucketing, SlotVector};
use crate::types::RetentionRow;
use chrono::{DateTime, Utc};

pub const HEADER: &str = "CohortDay,DayOffset,UsersActive,CohortSize";

pub(super) fn row_slots(row: &RetentionRow, cohort_start: DateTime<Utc>) -> SlotVector {
    let mut slots = SlotVector::new();
    slots.count_if_unset(Bucketing::Day.offset(cohort_start, row.period_end));
    slots
}

pub(super) fn format_line(cohort: &str, offset: usize, totals: &[u64]) -> String {
    format!("{},{},{},{}", cohort, offset, totals[offset], totals[0])
}
