//! Append-only, bounded event log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub at: DateTime<Utc>,
    pub kind: String,
    pub subject_id: String,
    pub message: String,
    pub severity: EventSeverity,
}

impl Event {
    pub fn new(kind: impl Into<String>, subject_id: impl Into<String>, message: impl Into<String>, severity: EventSeverity) -> Self {
        Self { at: Utc::now(), kind: kind.into(), subject_id: subject_id.into(), message: message.into(), severity }
    }

    pub fn info(kind: impl Into<String>, subject_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(kind, subject_id, message, EventSeverity::Info)
    }

    pub fn warn(kind: impl Into<String>, subject_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(kind, subject_id, message, EventSeverity::Warn)
    }

    pub fn error(kind: impl Into<String>, subject_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(kind, subject_id, message, EventSeverity::Error)
    }
}
