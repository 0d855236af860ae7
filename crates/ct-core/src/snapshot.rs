//! Point-in-time session snapshot, the document that is persisted, exported
//! and pushed to subscribers.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Per-file statistics as they appear in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileActivity {
    pub language: String,
    pub time_spent: i64,
    pub edits: u64,
    pub folder_path: String,
    pub notes: Vec<String>,
}

/// Per-folder statistics as they appear in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderActivity {
    pub time_spent: i64,
    pub files: u64,
}

/// A complete, immutable copy of session state.
///
/// All durations are integer milliseconds. Maps are ordered so serialized
/// documents are stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub session_start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_end: Option<DateTime<Utc>>,
    pub total_session_time: i64,
    pub active_coding_time: i64,
    pub debugging_time: i64,
    pub idle_time: i64,
    pub file_activity: BTreeMap<String, FileActivity>,
    pub folder_activity: BTreeMap<String, FolderActivity>,
    pub language_usage: BTreeMap<String, i64>,
    pub custom_notes: Vec<String>,
}

impl Snapshot {
    /// An empty snapshot for a session starting at `start`.
    pub const fn empty(start: DateTime<Utc>) -> Self {
        Self {
            session_start: start,
            session_end: None,
            total_session_time: 0,
            active_coding_time: 0,
            debugging_time: 0,
            idle_time: 0,
            file_activity: BTreeMap::new(),
            folder_activity: BTreeMap::new(),
            language_usage: BTreeMap::new(),
            custom_notes: Vec::new(),
        }
    }

    /// Sum of per-file focused time.
    pub fn total_file_time(&self) -> i64 {
        self.file_activity.values().map(|f| f.time_spent).sum()
    }
}

/// Message pushed to subscribers.
///
/// Serializes as `{"type": "update", "data": <snapshot>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum UpdateMessage {
    Update(Snapshot),
}

/// Formats a note as `"<timestamp>: <text>"`.
pub fn format_note(at: DateTime<Utc>, text: &str) -> String {
    format!("{}: {text}", at.to_rfc3339_opts(SecondsFormat::Millis, true))
}
