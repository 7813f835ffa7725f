//! Serializable failure snapshots for notifier backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::Result;
use crate::failure::Failure;
use crate::grouping::GroupingKey;

/// Everything a backend typically needs to render an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Unique id for this notification.
    pub incident_id: Uuid,
    /// Where the failure came from (`error`, `panic` or `cascade_pass`).
    pub source: String,
    /// The failure kind.
    pub kind: String,
    /// The failure message.
    pub message: String,
    /// Messages of underlying causes, outermost first.
    pub causes: Vec<String>,
    /// Originating code location, if known.
    pub location: Option<String>,
    /// The grouping fingerprint.
    pub grouping_key: GroupingKey,
    /// When the failure was observed.
    pub occurred_at: DateTime<Utc>,
    /// Request method, when there was a request.
    pub method: Option<String>,
    /// Request URI, when there was a request.
    pub uri: Option<String>,
    /// Request user agent, when present.
    pub user_agent: Option<String>,
}

impl FailureReport {
    /// Captures a report for a failure.
    #[must_use]
    pub fn capture(failure: &Failure<'_>, context: &RequestContext) -> Self {
        let request = context.request();

        Self {
            incident_id: Uuid::new_v4(),
            source: failure.source().as_str().to_string(),
            kind: failure.kind().to_string(),
            message: failure.message().to_string(),
            causes: failure.causes(),
            location: failure.location().map(ToString::to_string),
            grouping_key: GroupingKey::for_failure(failure),
            occurred_at: failure.occurred_at(),
            method: request.map(|r| r.method().to_string()),
            uri: request.map(|r| r.uri().to_string()),
            user_agent: context.user_agent().map(ToString::to_string),
        }
    }

    /// Serializes the report as JSON.
    ///
    /// # Errors
    ///
    /// Returns `FaultlineError::SerializationError` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// One-line summary suitable for chat messages or email subjects.
    #[must_use]
    pub fn summary(&self) -> String {
        match (&self.method, &self.uri) {
            (Some(method), Some(uri)) => format!("[{method} {uri}] {}: {}", self.kind, self.message),
            _ => format!("{}: {}", self.kind, self.message),
        }
    }
}
