//! Grouping of one period's access log into per-visitor sessions

use crate::processor::hasher::hash_identity;
use crate::secrets::HashSecret;
use crate::types::{AccessLogEvent, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// All requests of one visitor within the current period
#[derive(Debug, Clone)]
pub struct VisitorSession {
    /// Events in the order they were received
    pub events: Vec<AccessLogEvent>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl VisitorSession {
    fn new(event: AccessLogEvent) -> Self {
        Self {
            first_seen: event.timestamp,
            last_seen: event.timestamp,
            events: vec![event],
        }
    }

    fn push(&mut self, event: AccessLogEvent) {
        self.first_seen = self.first_seen.min(event.timestamp);
        self.last_seen = self.last_seen.max(event.timestamp);
        self.events.push(event);
    }

    pub fn request_count(&self) -> u64 {
        self.events.len() as u64
    }

    /// Seconds between first and last request, millisecond precision
    pub fn session_length(&self) -> f64 {
        (self.last_seen - self.first_seen).num_milliseconds() as f64 / 1000.0
    }

    /// First log line of the session, used to recompute retired hashes
    pub fn representative(&self) -> &AccessLogEvent {
        // A session is only ever created from an event
        &self.events[0]
    }
}

/// Group events by their identity under the current (secret, salt)
pub fn group_by_identity(
    events: Vec<AccessLogEvent>,
    secret: &HashSecret,
    salt: &HashSecret,
) -> HashMap<UserId, VisitorSession> {
    let mut sessions: HashMap<UserId, VisitorSession> = HashMap::new();

    for event in events {
        let user_id = hash_identity(&event.client_address, &event.client_agent, secret, salt);
        match sessions.get_mut(&user_id) {
            Some(session) => session.push(event),
            None => {
                sessions.insert(user_id, VisitorSession::new(event));
            }
        }
    }

    sessions
}
