//! Loading the rows a report needs

use crate::error::{RetainlessError, Result};
use crate::storage::PeriodStore;
use crate::types::{PeriodId, RetentionRow};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

fn start_of_day(date: NaiveDate, utc_offset: FixedOffset) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    Utc.from_utc_datetime(&(midnight - Duration::seconds(utc_offset.local_minus_utc() as i64)))
}

/// Load every row of the periods ending within `[start, end]`
///
/// `end` is inclusive: a period ending during the day after it still counts
/// only if it ends before that day starts. Periods referenced by the chains of
/// loaded rows are pulled in as well, so that earlier visits are available
/// even when they fall before `start`.
pub async fn load_report_rows(
    store: &dyn PeriodStore,
    start: NaiveDate,
    end: NaiveDate,
    utc_offset: FixedOffset,
) -> Result<Vec<RetentionRow>> {
    let range_start = start_of_day(start, utc_offset);
    let range_end = start_of_day(end + Duration::days(1), utc_offset);

    let mut loaded: BTreeMap<PeriodId, Vec<RetentionRow>> = BTreeMap::new();
    let mut pending: Vec<PeriodId> = store
        .list_report_periods()
        .await?
        .into_iter()
        .filter(|p| p.period_end >= range_start && p.period_end < range_end)
        .map(|p| p.period_id)
        .collect();

    if pending.is_empty() {
        return Err(RetainlessError::EmptyReportRange(format!(
            "{} to {}",
            start, end
        )));
    }

    info!("Loading {} periods", pending.len());

    let mut seen: HashSet<PeriodId> = pending.iter().cloned().collect();
    while !pending.is_empty() {
        let rows = store.load_retention_rows(&pending).await?;
        pending.clear();

        for row in rows {
            for visit in &row.visits_prior {
                if seen.insert(visit.period_id.clone()) {
                    debug!("Pulling in ancestor period {}", visit.period_id);
                    pending.push(visit.period_id.clone());
                }
            }
            loaded.entry(row.period_id.clone()).or_default().push(row);
        }
    }

    info!("Loaded {} periods for report", seen.len());
    Ok(loaded.into_values().flatten().collect())
}
