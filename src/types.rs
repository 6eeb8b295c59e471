//! Core data types for the Retainless pipeline
//!
//! This module defines the records that flow between ingestion, identity
//! linking, persistence and cohort reporting. Access log events are ephemeral;
//! everything else here is the persisted, pseudonymous shape of a visit.

use crate::secrets::HashSecret;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of one processing period
///
/// Formatted as `{application_id}-{period_end}` with the end in UTC RFC 3339,
/// so ids of one application sort chronologically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodId(pub String);

impl PeriodId {
    /// Build the id for a period of `application_id` ending at `period_end`
    pub fn for_period(application_id: &str, period_end: DateTime<Utc>) -> Self {
        Self(format!(
            "{}-{}",
            application_id,
            period_end.to_rfc3339_opts(SecondsFormat::Millis, true)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeriodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeriodId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Period-scoped pseudonymous visitor identifier (hex SHA-256)
///
/// Equal ids in two different periods mean nothing: the salt rotates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One raw access log line; never persisted
#[derive(Debug, Clone, PartialEq)]
pub struct AccessLogEvent {
    pub client_address: String,
    pub client_agent: String,
    pub timestamp: DateTime<Utc>,
    pub path: String,
}

impl AccessLogEvent {
    pub fn new(
        client_address: impl Into<String>,
        client_agent: impl Into<String>,
        timestamp: DateTime<Utc>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            client_address: client_address.into(),
            client_agent: client_agent.into(),
            timestamp,
            path: path.into(),
        }
    }
}

/// A past period whose secret and salt can still be used for linking
#[derive(Debug, Clone)]
pub struct Period {
    pub period_id: PeriodId,
    pub period_end: DateTime<Utc>,
    pub retired_secret: HashSecret,
    pub retired_salt: HashSecret,
}

/// Stored form of a period
///
/// Holds the salt and only the version label of the app secret; the secret
/// itself is resolved from the secret ring when the period is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodRecord {
    pub application_id: String,
    pub period_id: PeriodId,
    pub period_end: DateTime<Utc>,
    pub period_expires: DateTime<Utc>,
    pub salt: String,
    pub secret_version: String,
}

/// Frozen snapshot of one past period's activity for a visitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRecord {
    pub period_id: PeriodId,
    pub period_end: DateTime<Utc>,
    pub request_count: u64,
    /// Seconds between first and last request of that period
    pub session_length: f64,
}

/// Persisted per-visitor record for one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionRow {
    pub period_id: PeriodId,
    pub user_id: UserId,
    pub period_end: DateTime<Utc>,
    /// Earlier periods of the same visitor, oldest first
    #[serde(default)]
    pub visits_prior: Vec<VisitRecord>,
    pub request_count: u64,
    pub session_length: f64,
}

impl RetentionRow {
    /// This row's own stats packaged as a chain entry
    pub fn as_visit_record(&self) -> VisitRecord {
        VisitRecord {
            period_id: self.period_id.clone(),
            period_end: self.period_end,
            request_count: self.request_count,
            session_length: self.session_length,
        }
    }

    /// Earliest known activity across the whole chain
    pub fn first_visit(&self) -> DateTime<Utc> {
        self.visits_prior
            .iter()
            .map(|visit| visit.period_end)
            .fold(self.period_end, |first, end| first.min(end))
    }

    /// Latest period end among the prior visits, if any
    pub fn latest_prior_visit(&self) -> Option<DateTime<Utc>> {
        self.visits_prior.iter().map(|visit| visit.period_end).max()
    }

    /// Requests across the chain including this period
    pub fn total_requests(&self) -> u64 {
        self.visits_prior
            .iter()
            .map(|visit| visit.request_count)
            .sum::<u64>()
            + self.request_count
    }

    /// Session seconds across the chain including this period
    pub fn total_session_length(&self) -> f64 {
        self.visits_prior
            .iter()
            .map(|visit| visit.session_length)
            .sum::<f64>()
            + self.session_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, day, 5, 0, 0).unwrap()
    }

    fn visit(day: u32, requests: u64) -> VisitRecord {
        VisitRecord {
            period_id: PeriodId::for_period("app", at(day)),
            period_end: at(day),
            request_count: requests,
            session_length: 10.0,
        }
    }

    #[test]
    fn test_period_id_format() {
        let id = PeriodId::for_period("retainless-app", at(17));
        assert_eq!(id.as_str(), "retainless-app-2025-10-17T05:00:00.000Z");
    }

    #[test]
    fn test_chain_folds() {
        let row = RetentionRow {
            period_id: PeriodId::for_period("app", at(10)),
            user_id: UserId("abc".to_string()),
            period_end: at(10),
            visits_prior: vec![visit(8, 3), visit(9, 4)],
            request_count: 5,
            session_length: 30.5,
        };

        assert_eq!(row.first_visit(), at(8));
        assert_eq!(row.latest_prior_visit(), Some(at(9)));
        assert_eq!(row.total_requests(), 12);
        assert_eq!(row.total_session_length(), 50.5);
    }

    #[test]
    fn test_row_serializes_camel_case() {
        let row = RetentionRow {
            period_id: PeriodId::from("p"),
            user_id: UserId("u".to_string()),
            period_end: at(8),
            visits_prior: vec![],
            request_count: 1,
            session_length: 0.0,
        };

        let json = serde_json::to_value(&row).unwrap();
        assert!(json.get("visitsPrior").is_some());
        assert!(json.get("periodEnd").is_some());
        assert_eq!(json["userId"], "u");
    }
}
