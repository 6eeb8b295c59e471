//! Run notifications
//!
//! Every period run ends with exactly one published message: a result summary
//! on success, the error on failure.

use crate::error::{RetainlessError, Result};
use crate::processor::RunCounters;
use crate::types::PeriodId;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{error, info};

pub const SUCCESS_SUBJECT: &str = "Retainless Results";
pub const FAILURE_SUBJECT: &str = "Retainless Processing Error";

/// Outbound notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, subject: &str, body: &str) -> Result<()>;
}

/// What one successful period run did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub period_id: PeriodId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub counters: RunCounters,
    pub rows_written: usize,
}

impl RunSummary {
    pub fn success_body(&self) -> String {
        format!(
            "Successfully processed {} access logs:\n\
             - {} unique visitors\n\
             - {} are returning visitors\n\
             - {} rows written\n\
             / From: {}\n\
             / To: {}\n\n\
             Use Retainless to view your app analytics.",
            self.counters.access_log_events,
            self.counters.grouped_identities,
            self.counters.linked,
            self.rows_written,
            self.period_start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.period_end.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }
}

pub fn failure_body(error: &RetainlessError) -> String {
    format!(
        "An error occurred when processing access logs:\n{}\n\n\
         Please investigate before the next scheduled run.",
        error
    )
}

/// Publishes into the log stream only
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn publish(&self, subject: &str, body: &str) -> Result<()> {
        if subject == FAILURE_SUBJECT {
            error!("{}: {}", subject, body);
        } else {
            info!("{}: {}", subject, body);
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
}

/// POSTs `{"subject", "body"}` as JSON to a URL
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn publish(&self, subject: &str, body: &str) -> Result<()> {
        info!("Publishing '{}' notification", subject);
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { subject, body })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RetainlessError::Notify(format!(
                "webhook returned {}: {}",
                status, text
            )));
        }
        Ok(())
    }
}
