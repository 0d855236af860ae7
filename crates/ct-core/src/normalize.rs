//! Translation of raw host signals into canonical events.
//!
//! Normalization is pure: no state is read or written. A signal that cannot be
//! translated is reported as [`MalformedEvent`] and the caller drops it.

use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::event::{Event, FileRef, NoteScope};
use crate::signal::{RawSignal, SignalKind};
use crate::types::{FilePath, NoteText, ValidationError};

/// A raw signal that could not be normalized.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedEvent {
    /// The input was not a valid signal document.
    #[error("invalid signal: {0}")]
    Parse(String),
    /// A field required by the signal kind was absent.
    #[error("{kind} signal requires a {field}")]
    MissingField {
        kind: SignalKind,
        field: &'static str,
    },
    /// A field was present but failed validation.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Builds a file reference, deriving language and folder from the path.
pub fn file_ref(path: FilePath) -> FileRef {
    let as_path = Path::new(path.as_str());
    let language = as_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_string();
    let folder = as_path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    FileRef {
        path,
        language,
        folder,
    }
}

fn required_file(signal: &RawSignal) -> Result<FileRef, MalformedEvent> {
    let path = signal.path.clone().ok_or(MalformedEvent::MissingField {
        kind: signal.kind,
        field: "path",
    })?;
    Ok(file_ref(FilePath::new(path)?))
}

/// Normalizes one raw signal.
///
/// `now` stamps signals that arrive without their own timestamp.
pub fn normalize(signal: &RawSignal, now: DateTime<Utc>) -> Result<Event, MalformedEvent> {
    let at = signal.timestamp.unwrap_or(now);

    let event = match signal.kind {
        SignalKind::Edit => Event::Edit {
            file: required_file(signal)?,
            at,
        },
        SignalKind::Focus => {
            let file = match &signal.path {
                Some(path) => Some(file_ref(FilePath::new(path.clone())?)),
                None => None,
            };
            Event::FocusChange { file, at }
        }
        SignalKind::DebugStart => Event::DebugStart { at },
        SignalKind::DebugEnd => Event::DebugEnd { at },
        SignalKind::Note => {
            let text = signal.text.clone().ok_or(MalformedEvent::MissingField {
                kind: signal.kind,
                field: "text",
            })?;
            let scope = match &signal.path {
                Some(path) => NoteScope::File(file_ref(FilePath::new(path.clone())?)),
                None => NoteScope::Session,
            };
            Event::NoteRequest {
                scope,
                text: NoteText::new(text)?,
                at,
            }
        }
    };

    Ok(event)
}

/// Parses and normalizes a JSON signal document.
pub fn normalize_json(value: serde_json::Value, now: DateTime<Utc>) -> Result<Event, MalformedEvent> {
    let signal: RawSignal =
        serde_json::from_value(value).map_err(|e| MalformedEvent::Parse(e.to_string()))?;
    normalize(&signal, now)
}

/// Parses and normalizes a single JSON line.
pub fn normalize_line(line: &str, now: DateTime<Utc>) -> Result<Event, MalformedEvent> {
    let signal: RawSignal =
        serde_json::from_str(line).map_err(|e| MalformedEvent::Parse(e.to_string()))?;
    normalize(&signal, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0)
            .single()
            .expect("valid test timestamp")
    }

    #[test]
    fn derives_language_and_folder() {
        let file = file_ref(FilePath::new("/repo/src/main.rs").unwrap());
        assert_eq!(file.language, "rs");
        assert_eq!(file.folder, "/repo/src");
    }

    #[test]
    fn file_without_extension_has_empty_language() {
        let file = file_ref(FilePath::new("/repo/Makefile").unwrap());
        assert_eq!(file.language, "");
        assert_eq!(file.folder, "/repo");

        // Leading-dot files have no extension either.
        let dotfile = file_ref(FilePath::new("/home/me/.bashrc").unwrap());
        assert_eq!(dotfile.language, "");
    }

    #[test]
    fn edit_without_path_is_malformed() {
        let result = normalize(&RawSignal::new(SignalKind::Edit), now());
        assert_eq!(
            result,
            Err(MalformedEvent::MissingField {
                kind: SignalKind::Edit,
                field: "path"
            })
        );
    }

    #[test]
    fn focus_without_path_clears_focus() {
        let event = normalize(&RawSignal::new(SignalKind::Focus), now()).unwrap();
        assert_eq!(
            event,
            Event::FocusChange {
                file: None,
                at: now()
            }
        );
    }

    #[test]
    fn note_scope_follows_path() {
        let session = normalize(
            &RawSignal::new(SignalKind::Note).with_text("standup notes"),
            now(),
        )
        .unwrap();
        assert!(matches!(
            session,
            Event::NoteRequest {
                scope: NoteScope::Session,
                ..
            }
        ));

        let file = normalize(
            &RawSignal::new(SignalKind::Note)
                .with_text("fixed bug")
                .with_path("/repo/a.py"),
            now(),
        )
        .unwrap();
        let Event::NoteRequest {
            scope: NoteScope::File(file),
            ..
        } = file
        else {
            panic!("expected file note");
        };
        assert_eq!(file.language, "py");
    }

    #[test]
    fn blank_note_text_is_malformed() {
        let result = normalize(&RawSignal::new(SignalKind::Note).with_text("  "), now());
        assert!(matches!(result, Err(MalformedEvent::Invalid(_))));
    }

    #[test]
    fn explicit_timestamp_wins_over_now() {
        let earlier = now() - chrono::Duration::seconds(30);
        let event = normalize(&RawSignal::new(SignalKind::DebugStart).at(earlier), now()).unwrap();
        assert_eq!(event.at(), earlier);
    }

    #[test]
    fn normalize_line_rejects_garbage() {
        assert!(matches!(
            normalize_line("not json", now()),
            Err(MalformedEvent::Parse(_))
        ));
        assert!(matches!(
            normalize_line(r#"{"type":"scroll"}"#, now()),
            Err(MalformedEvent::Parse(_))
        ));
    }

    #[test]
    fn normalize_line_accepts_host_alias() {
        let event = normalize_line(
            r#"{"type":"save","path":"/repo/lib.go","timestamp":"2025-01-15T09:00:00Z"}"#,
            now() + chrono::Duration::minutes(5),
        )
        .unwrap();
        let Event::Edit { file, at } = event else {
            panic!("expected edit");
        };
        assert_eq!(file.path.as_str(), "/repo/lib.go");
        assert_eq!(at, now());
    }
}
