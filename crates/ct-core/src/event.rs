//! Canonical activity events consumed by the aggregator.

use chrono::{DateTime, Utc};

use crate::types::{FilePath, NoteText};

/// A file reference with the attributes derived from its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub path: FilePath,
    /// Extension without the leading dot, empty when the file has none.
    pub language: String,
    /// Containing directory, keys the folder statistics.
    pub folder: String,
}

/// Where a note should be attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteScope {
    Session,
    File(FileRef),
}

/// A normalized activity event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Edit {
        file: FileRef,
        at: DateTime<Utc>,
    },
    /// Focus moved to a file, or away from every file when `file` is `None`.
    FocusChange {
        file: Option<FileRef>,
        at: DateTime<Utc>,
    },
    DebugStart {
        at: DateTime<Utc>,
    },
    DebugEnd {
        at: DateTime<Utc>,
    },
    NoteRequest {
        scope: NoteScope,
        text: NoteText,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// When the event happened.
    pub const fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Edit { at, .. }
            | Self::FocusChange { at, .. }
            | Self::DebugStart { at }
            | Self::DebugEnd { at }
            | Self::NoteRequest { at, .. } => *at,
        }
    }

    /// Whether the event brings an idle session back to active.
    ///
    /// Debug end and note requests count as activity for the idle clock but
    /// do not by themselves end an idle stretch.
    pub const fn resumes_activity(&self) -> bool {
        matches!(
            self,
            Self::Edit { .. } | Self::FocusChange { .. } | Self::DebugStart { .. }
        )
    }

    /// Short name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Edit { .. } => "edit",
            Self::FocusChange { .. } => "focus_change",
            Self::DebugStart { .. } => "debug_start",
            Self::DebugEnd { .. } => "debug_end",
            Self::NoteRequest { .. } => "note_request",
        }
    }
}
