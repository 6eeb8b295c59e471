//! Daily survival: visitors still returning N days after their first visit
//!
//! A visitor survives through every day up to their latest visit. Each row
//! suppresses the offsets its chain already accounted for (day 0 through the
//! latest prior visit) and fills the gap since then, so a visitor is counted
//! once per surviving day however many periods they appear in.

use super::bucket::{Bucketing, SlotVector};
use crate::types::RetentionRow;
use chrono::{DateTime, Utc};

pub const HEADER: &str = "CohortDay,DayOffset,UsersSurviving,PoolSize,CohortSize";

/// Gap days between the last prior visit and this one count as survived
pub(super) const UNSET_WEIGHT: u64 = 1;

pub(super) fn row_slots(row: &RetentionRow, cohort_start: DateTime<Utc>) -> SlotVector {
    let mut slots = SlotVector::new();

    if let Some(latest_prior) = row.latest_prior_visit() {
        let prior_offset = Bucketing::Day.offset(cohort_start, latest_prior);
        for offset in 0..=prior_offset {
            slots.suppress(offset);
        }
    }

    slots.count_if_unset(Bucketing::Day.offset(cohort_start, row.period_end));
    slots
}

pub(super) fn format_line(cohort: &str, offset: usize, totals: &[u64]) -> String {
    format!(
        "{},{},{},{},{}",
        cohort,
        offset,
        totals[offset],
        totals[offset.saturating_sub(1)],
        totals[0]
    )
}
