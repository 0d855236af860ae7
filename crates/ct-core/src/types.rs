//! Core type definitions with validation.
//!
//! Values that arrive as free-form strings from the editor, such as file
//! paths and note text, are wrapped in [`NonBlank`] so that an empty or
//! whitespace-only value cannot reach the aggregator. The label parameter
//! keeps a file path from being passed where note text is expected.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },
}

/// Names the field a [`NonBlank`] value stands for in error messages.
pub trait Label {
    const FIELD: &'static str;
}

/// Marker for [`FilePath`].
#[derive(Debug)]
pub enum FilePathLabel {}

impl Label for FilePathLabel {
    const FIELD: &'static str = "file path";
}

/// Marker for [`NoteText`].
#[derive(Debug)]
pub enum NoteTextLabel {}

impl Label for NoteTextLabel {
    const FIELD: &'static str = "note text";
}

/// A string that is known to contain something other than whitespace.
///
/// The original text is kept as given, surrounding whitespace included.
pub struct NonBlank<L> {
    value: String,
    label: PhantomData<L>,
}

/// A validated file identifier.
///
/// File paths are stored exactly as the host editor reports them; they key
/// the per-file statistics.
pub type FilePath = NonBlank<FilePathLabel>;

/// Free-text note content supplied by the user.
pub type NoteText = NonBlank<NoteTextLabel>;

impl<L: Label> NonBlank<L> {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ValidationError::Empty { field: L::FIELD });
        }
        Ok(Self {
            value,
            label: PhantomData,
        })
    }
}

impl<L> NonBlank<L> {
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl<L> Clone for NonBlank<L> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            label: PhantomData,
        }
    }
}

impl<L> PartialEq for NonBlank<L> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<L> Eq for NonBlank<L> {}

// Must hash like `str` so lookups through `Borrow<str>` find the entry.
impl<L> Hash for NonBlank<L> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.as_str().hash(state);
    }
}

impl<L> PartialOrd for NonBlank<L> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<L> Ord for NonBlank<L> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl<L: Label> fmt::Debug for NonBlank<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", L::FIELD, self.value)
    }
}

impl<L> fmt::Display for NonBlank<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<L> Borrow<str> for NonBlank<L> {
    fn borrow(&self) -> &str {
        &self.value
    }
}

impl<L> AsRef<str> for NonBlank<L> {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl<L: Label> TryFrom<String> for NonBlank<L> {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<L> From<NonBlank<L>> for String {
    fn from(value: NonBlank<L>) -> Self {
        value.value
    }
}

impl<L> Serialize for NonBlank<L> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de, L: Label> Deserialize<'de> for NonBlank<L> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::new(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    #[test]
    fn file_path_rejects_empty_and_blank() {
        assert_eq!(
            FilePath::new(""),
            Err(ValidationError::Empty { field: "file path" })
        );
        assert!(FilePath::new("   ").is_err());
    }

    #[test]
    fn note_text_error_names_field() {
        let err = NoteText::new("").unwrap_err();
        assert_eq!(err.to_string(), "note text cannot be empty");
    }

    #[test]
    fn file_path_deserialize_validates() {
        let parsed: Result<FilePath, _> = serde_json::from_str(r#""""#);
        let err = parsed.unwrap_err();
        assert!(err.to_string().contains("file path cannot be empty"));

        let parsed: FilePath = serde_json::from_str(r#""/src/main.rs""#).unwrap();
        assert_eq!(parsed.as_str(), "/src/main.rs");
        assert_eq!(serde_json::to_string(&parsed).unwrap(), r#""/src/main.rs""#);
    }

    #[test]
    fn keeps_surrounding_whitespace() {
        let note = NoteText::new("  spaced  ").unwrap();
        assert_eq!(note.to_string(), "  spaced  ");
        assert_eq!(format!("{note:?}"), r#"note text("  spaced  ")"#);
    }

    #[test]
    fn map_keyed_by_path_is_found_by_str() {
        let mut seconds = HashMap::new();
        seconds.insert(FilePath::new("/repo/a.rs").unwrap(), 3);
        assert_eq!(seconds.get("/repo/a.rs"), Some(&3));
    }
}
