//! Presence tracker — who is on a board and how they are displayed.
//!
//! Records are keyed by session id. A session id is supplied by the client
//! and survives reconnects, so `join` with a known id overwrites the record
//! instead of adding a second one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type SessionId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub session_id: SessionId,
    pub name: String,
    pub color: String,
}

/// Partial presence update. Absent fields are untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl PresencePatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.color.is_none()
    }
}

#[derive(Debug, Default)]
pub struct PresenceTracker {
    records: BTreeMap<SessionId, Presence>,
}

impl PresenceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the record for `record.session_id`.
    pub fn join(&mut self, record: Presence) {
        self.records.insert(record.session_id.clone(), record);
    }

    /// Merge a partial update. Returns the updated record, or `None` if the
    /// session is unknown.
    pub fn update(&mut self, session_id: &str, patch: PresencePatch) -> Option<&Presence> {
        let record = self.records.get_mut(session_id)?;
        if let Some(name) = patch.name {
            record.name = name;
        }
        if let Some(color) = patch.color {
            record.color = color;
        }
        Some(record)
    }

    pub fn leave(&mut self, session_id: &str) -> Option<Presence> {
        self.records.remove(session_id)
    }

    #[cfg(test)]
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<&Presence> {
        self.records.get(session_id)
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Presence> {
        self.records.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
