//! Cohort reporting over persisted retention rows
//!
//! Every variant buckets a row by the first visit of its chain and turns the
//! row into a vector of offset slots; the variants differ only in how those
//! slots are filled (see `daily_retention`, `daily_survival`,
//! `weekly_retention`). Cohort totals are plain per-offset sums, so the
//! result does not depend on the order rows are supplied in.

pub mod bucket;
pub mod daily_retention;
pub mod daily_survival;
pub mod loader;
pub mod weekly_retention;

pub use bucket::{Bucketing, OffsetSlot, SlotVector};
pub use loader::load_report_rows;

use crate::types::RetentionRow;
use chrono::{FixedOffset, NaiveDate};
use std::collections::BTreeMap;
use std::io::{self, Write};

/// Which curve to compute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    DailyRetention,
    DailySurvival,
    WeeklyRetention,
}

impl ReportKind {
    pub fn bucketing(&self) -> Bucketing {
        match self {
            ReportKind::DailyRetention | ReportKind::DailySurvival => Bucketing::Day,
            ReportKind::WeeklyRetention => Bucketing::Week,
        }
    }

    /// CSV header line, an exact contract for consumers
    pub fn header(&self) -> &'static str {
        match self {
            ReportKind::DailyRetention => daily_retention::HEADER,
            ReportKind::DailySurvival => daily_survival::HEADER,
            ReportKind::WeeklyRetention => weekly_retention::HEADER,
        }
    }

    fn unset_weight(&self) -> u64 {
        match self {
            ReportKind::DailySurvival => daily_survival::UNSET_WEIGHT,
            ReportKind::DailyRetention | ReportKind::WeeklyRetention => 0,
        }
    }

    fn row_slots(&self, row: &RetentionRow, cohort_start: chrono::DateTime<chrono::Utc>) -> SlotVector {
        match self {
            ReportKind::DailyRetention => daily_retention::row_slots(row, cohort_start),
            ReportKind::DailySurvival => daily_survival::row_slots(row, cohort_start),
            ReportKind::WeeklyRetention => weekly_retention::row_slots(row, cohort_start),
        }
    }

    fn format_line(&self, cohort: &str, offset: usize, totals: &[u64]) -> String {
        match self {
            ReportKind::DailyRetention => daily_retention::format_line(cohort, offset, totals),
            ReportKind::DailySurvival => daily_survival::format_line(cohort, offset, totals),
            ReportKind::WeeklyRetention => weekly_retention::format_line(cohort, offset, totals),
        }
    }
}

/// Per-cohort totals by offset for one report kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortReport {
    kind: ReportKind,
    cohorts: BTreeMap<NaiveDate, Vec<u64>>,
}

impl CohortReport {
    /// Fold rows into cohort curves, bucketing at `utc_offset`
    pub fn fold(kind: ReportKind, rows: &[RetentionRow], utc_offset: FixedOffset) -> Self {
        let bucketing = kind.bucketing();
        let mut cohorts: BTreeMap<NaiveDate, Vec<u64>> = BTreeMap::new();

        for row in rows {
            let cohort = bucketing.cohort_date(row.first_visit(), utc_offset);
            let cohort_start = bucketing.cohort_start(cohort, utc_offset);
            let slots = kind.row_slots(row, cohort_start);

            slots.add_into(cohorts.entry(cohort).or_default(), kind.unset_weight());
        }

        Self { kind, cohorts }
    }

    pub fn kind(&self) -> ReportKind {
        self.kind
    }

    /// Totals by offset for a cohort keyed `YYYY-MM-DD`
    pub fn totals(&self, cohort: &str) -> Option<&[u64]> {
        let date = NaiveDate::parse_from_str(cohort, "%Y-%m-%d").ok()?;
        self.cohorts.get(&date).map(Vec::as_slice)
    }

    /// Cohort dates in chronological order
    pub fn cohorts(&self) -> impl Iterator<Item = &NaiveDate> {
        self.cohorts.keys()
    }

    /// Header followed by one line per (cohort, offset)
    fn csv_lines(&self) -> impl Iterator<Item = String> + '_ {
        let body = self.cohorts.iter().flat_map(move |(cohort, totals)| {
            let key = cohort.format("%Y-%m-%d").to_string();
            (0..totals.len()).map(move |offset| self.kind.format_line(&key, offset, totals))
        });
        std::iter::once(self.kind.header().to_string()).chain(body)
    }

    pub fn write_csv<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for line in self.csv_lines() {
            writeln!(writer, "{}", line)?;
        }
        writer.flush()
    }

    pub fn to_csv_string(&self) -> String {
        self.csv_lines().fold(String::new(), |mut csv, line| {
            csv.push_str(&line);
            csv.push('\n');
            csv
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{utc, visitor_chain};
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cohorts_sorted_chronologically() {
        let mut rows = visitor_chain("late", &[12]);
        rows.extend(visitor_chain("early", &[8, 9]));

        let report = CohortReport::fold(ReportKind::DailyRetention, &rows, utc());
        let keys: Vec<String> = report.cohorts().map(|d| d.to_string()).collect();
        assert_eq!(keys, vec!["2025-10-08", "2025-10-12"]);
    }

    #[test]
    fn test_empty_rows_write_header_only() {
        let report = CohortReport::fold(ReportKind::WeeklyRetention, &[], utc());
        assert_eq!(report.to_csv_string(), format!("{}\n", weekly_retention::HEADER));
    }

    #[test]
    fn test_written_csv_matches_string() {
        let mut rows = visitor_chain("late", &[12]);
        rows.extend(visitor_chain("early", &[8, 9]));
        let report = CohortReport::fold(ReportKind::DailySurvival, &rows, utc());

        let mut written = Vec::new();
        report.write_csv(&mut written).unwrap();
        assert_eq!(String::from_utf8(written).unwrap(), report.to_csv_string());
        assert_eq!(report.to_csv_string().lines().count(), 4);
    }

    fn arb_chains() -> impl Strategy<Value = Vec<RetentionRow>> {
        // Each visitor: a strictly increasing set of days in October
        prop::collection::vec(prop::collection::btree_set(1u32..28, 1..5), 1..12).prop_map(
            |visitors| {
                visitors
                    .into_iter()
                    .enumerate()
                    .flat_map(|(i, days)| {
                        let days: Vec<u32> = days.into_iter().collect();
                        visitor_chain(&format!("v{}", i), &days)
                    })
                    .collect()
            },
        )
    }

    fn arb_kind() -> impl Strategy<Value = ReportKind> {
        prop_oneof![
            Just(ReportKind::DailyRetention),
            Just(ReportKind::DailySurvival),
            Just(ReportKind::WeeklyRetention),
        ]
    }

    proptest! {
        #[test]
        fn fold_ignores_row_order(
            (rows, shuffled) in arb_chains().prop_flat_map(|rows| {
                let shuffled = Just(rows.clone()).prop_shuffle();
                (Just(rows), shuffled)
            }),
            kind in arb_kind(),
        ) {
            let a = CohortReport::fold(kind, &rows, utc());
            let b = CohortReport::fold(kind, &shuffled, utc());
            prop_assert_eq!(a.to_csv_string(), b.to_csv_string());
        }

        #[test]
        fn fold_is_idempotent(rows in arb_chains(), kind in arb_kind()) {
            let a = CohortReport::fold(kind, &rows, utc());
            let b = CohortReport::fold(kind, &rows, utc());
            prop_assert_eq!(a, b);
        }

        #[test]
        fn survival_pool_is_previous_offset(rows in arb_chains()) {
            let report = CohortReport::fold(ReportKind::DailySurvival, &rows, utc());
            for line in report.to_csv_string().lines().skip(1) {
                let cols: Vec<&str> = line.split(',').collect();
                let offset: usize = cols[1].parse().unwrap();
                let totals = report.totals(cols[0]).unwrap();
                let pool: u64 = cols[3].parse().unwrap();
                prop_assert_eq!(pool, totals[offset.saturating_sub(1)]);
                prop_assert_eq!(cols[4].parse::<u64>().unwrap(), totals[0]);
            }
        }

        #[test]
        fn survival_never_exceeds_cohort_size(rows in arb_chains()) {
            let report = CohortReport::fold(ReportKind::DailySurvival, &rows, utc());
            for cohort in report.cohorts() {
                let totals = report.totals(&cohort.to_string()).unwrap();
                for value in totals {
                    prop_assert!(*value <= totals[0]);
                }
            }
        }
    }
}
