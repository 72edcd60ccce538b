use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventLevel {
    Info,
    Error,
}

/// One audit record on a linked service.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
}

/// Append-only, insertion-ordered audit trail.
///
/// Records cannot be removed or edited once appended.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct EventLog(Vec<Event>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, level: EventLevel, message: impl Into<String>) {
        self.0.push(Event {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&Event> {
        self.0.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.0.iter()
    }
}
