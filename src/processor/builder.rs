//! Assembly of the period's retention rows

use crate::processor::aggregate::VisitorSession;
use crate::processor::linker::PeriodLinker;
use crate::types::{PeriodId, RetentionRow, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Informational counters of one period run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCounters {
    pub access_log_events: usize,
    pub grouped_identities: usize,
    pub linked: usize,
    pub dropped_unlinkable: usize,
}

/// Rows produced for one period plus run counters
#[derive(Debug, Clone)]
pub struct PeriodOutput {
    pub rows: Vec<RetentionRow>,
    pub counters: RunCounters,
}

/// Combine grouped sessions with linking decisions
///
/// Rows are returned sorted by user id so output does not depend on map order.
pub fn build_rows(
    period_id: &PeriodId,
    period_end: DateTime<Utc>,
    sessions: HashMap<UserId, VisitorSession>,
    linker: &PeriodLinker<'_>,
    access_log_events: usize,
) -> PeriodOutput {
    let mut counters = RunCounters {
        access_log_events,
        grouped_identities: sessions.len(),
        linked: 0,
        dropped_unlinkable: linker.dropped_unlinkable(),
    };

    let mut rows: Vec<RetentionRow> = sessions
        .into_iter()
        .map(|(user_id, session)| {
            let visits_prior = match linker.chain_for(session.representative()) {
                Some(chain) => {
                    counters.linked += 1;
                    chain
                }
                None => Vec::new(),
            };

            RetentionRow {
                period_id: period_id.clone(),
                user_id,
                period_end,
                visits_prior,
                request_count: session.request_count(),
                session_length: session.session_length(),
            }
        })
        .collect();

    rows.sort_by(|a, b| a.user_id.cmp(&b.user_id));

    PeriodOutput { rows, counters }
}
