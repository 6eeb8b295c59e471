//! Cohort buckets, offsets and per-row offset slots

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

/// Unit used to bucket cohorts and measure offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucketing {
    Day,
    /// ISO weeks, starting Monday
    Week,
}

impl Bucketing {
    fn unit(&self) -> Duration {
        match self {
            Bucketing::Day => Duration::days(1),
            Bucketing::Week => Duration::weeks(1),
        }
    }

    /// Calendar date of the bucket containing `at`, evaluated at `utc_offset`
    pub fn cohort_date(&self, at: DateTime<Utc>, utc_offset: FixedOffset) -> NaiveDate {
        let local = at.with_timezone(&utc_offset).date_naive();
        match self {
            Bucketing::Day => local,
            Bucketing::Week => {
                local - Duration::days(local.weekday().num_days_from_monday() as i64)
            }
        }
    }

    /// Instant at which the bucket starting on `cohort` begins
    pub fn cohort_start(&self, cohort: NaiveDate, utc_offset: FixedOffset) -> DateTime<Utc> {
        let midnight = cohort.and_time(NaiveTime::MIN);
        Utc.from_utc_datetime(&(midnight - Duration::seconds(utc_offset.local_minus_utc() as i64)))
    }

    /// Whole units elapsed from `cohort_start` to `at`, floored
    pub fn offset(&self, cohort_start: DateTime<Utc>, at: DateTime<Utc>) -> usize {
        let elapsed = (at - cohort_start).num_milliseconds();
        let unit = self.unit().num_milliseconds();
        elapsed.div_euclid(unit).max(0) as usize
    }
}

/// Accounting state of one offset for one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetSlot {
    /// Nothing recorded at this offset
    Unset,
    /// Already accounted by an earlier row of the same visitor
    Suppressed,
    /// This row counts the visitor here
    Counted,
}

/// Offset slots contributed by a single row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotVector(Vec<OffsetSlot>);

impl SlotVector {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    fn ensure(&mut self, offset: usize) {
        if self.0.len() <= offset {
            self.0.resize(offset + 1, OffsetSlot::Unset);
        }
    }

    pub fn get(&self, offset: usize) -> OffsetSlot {
        self.0.get(offset).copied().unwrap_or(OffsetSlot::Unset)
    }

    /// Mark an offset as accounted for by history
    pub fn suppress(&mut self, offset: usize) {
        self.ensure(offset);
        self.0[offset] = OffsetSlot::Suppressed;
    }

    /// Count an offset unless history already accounted for it
    pub fn count_if_unset(&mut self, offset: usize) {
        self.ensure(offset);
        if self.0[offset] == OffsetSlot::Unset {
            self.0[offset] = OffsetSlot::Counted;
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Add this row's contribution into a cohort's totals
    ///
    /// Slots still unset below the highest recorded one contribute `unset_weight`.
    pub fn add_into(&self, totals: &mut Vec<u64>, unset_weight: u64) {
        if totals.len() < self.0.len() {
            totals.resize(self.0.len(), 0);
        }
        for (total, slot) in totals.iter_mut().zip(&self.0) {
            *total += match slot {
                OffsetSlot::Unset => unset_weight,
                OffsetSlot::Suppressed => 0,
                OffsetSlot::Counted => 1,
            };
        }
    }
}
