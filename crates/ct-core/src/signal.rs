//! Raw signals as delivered by the host editor.
//!
//! `SignalKind` is the single source of truth for the signal type strings the
//! host may send, including the aliases older editor integrations used.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of raw signal the host can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Edit,
    Focus,
    DebugStart,
    DebugEnd,
    Note,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Edit => "edit",
            Self::Focus => "focus",
            Self::DebugStart => "debug_start",
            Self::DebugEnd => "debug_end",
            Self::Note => "note",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SignalKind {
    type Err = UnknownSignalKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edit" | "change" | "save" => Ok(Self::Edit),
            "focus" | "active_editor" => Ok(Self::Focus),
            "debug_start" => Ok(Self::DebugStart),
            "debug_end" | "debug_stop" | "debug_terminate" => Ok(Self::DebugEnd),
            "note" | "annotate" => Ok(Self::Note),
            _ => Err(UnknownSignalKind(s.to_string())),
        }
    }
}

impl Serialize for SignalKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SignalKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for unknown signal kind strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSignalKind(String);

impl fmt::Display for UnknownSignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown signal kind: {}", self.0)
    }
}

impl std::error::Error for UnknownSignalKind {}

/// A raw signal exactly as the host sent it.
///
/// Fields are loosely typed. Validation happens in the normalizer,
/// which rejects signals missing what their kind requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSignal {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    /// File the signal refers to. Absent for session-scoped signals and for
    /// a focus change to "no file".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Note body, only meaningful for `note` signals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// When the signal happened. Missing means "now" at normalization time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawSignal {
    /// Creates a signal of the given kind with no payload.
    pub const fn new(kind: SignalKind) -> Self {
        Self {
            kind,
            path: None,
            text: None,
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}
