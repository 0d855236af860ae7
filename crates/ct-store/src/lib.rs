//! Storage layer for the coding time tracker.
//!
//! The whole session is persisted as one JSON document (see [`Snapshot`]).
//!
//! # Loading
//!
//! Loading never fails. A missing, unreadable or corrupt document yields an
//! empty snapshot, and documents written by older versions go through a
//! migration step that fills every absent field with its default before the
//! snapshot is built.
//!
//! # Saving
//!
//! A process that starts after a crash begins with empty note lists, so a save
//! must not clobber notes it never saw. Saves therefore merge note lists with
//! the document currently on disk: stored notes keep their order and notes
//! only present in memory are appended. File records that exist only on disk
//! are kept when they carry notes.
//!
//! Writes go to a sibling temp file that is renamed over the target, so a
//! reader sees either the previous complete document or the new one.
//!
//! # Thread Safety
//!
//! [`JsonStore`] is `Sync`. Saves from threads of one process are serialized by
//! an internal mutex; saves from different processes are serialized by an
//! advisory lock on a `.lock` file next to the document.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use ct_core::{FileActivity, FilePath, FolderActivity, Snapshot, SnapshotStore, file_ref};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading the document failed for a reason other than absence.
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The document exists but is not valid JSON for a snapshot.
    #[error("failed to parse {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// Serializing the snapshot failed.
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Writing, renaming or creating directories failed.
    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The cross-process lock could not be taken.
    #[error("failed to lock {}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ========== Schema Migration ==========

/// A stored document as it may exist on disk, with every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoredDocument {
    session_start: Option<DateTime<Utc>>,
    session_end: Option<DateTime<Utc>>,
    total_session_time: i64,
    active_coding_time: i64,
    debugging_time: i64,
    idle_time: i64,
    file_activity: BTreeMap<String, StoredFile>,
    folder_activity: BTreeMap<String, StoredFolder>,
    language_usage: BTreeMap<String, i64>,
    custom_notes: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoredFile {
    language: Option<String>,
    time_spent: i64,
    edits: u64,
    folder_path: Option<String>,
    notes: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoredFolder {
    time_spent: i64,
    files: u64,
}

/// Builds a snapshot from a possibly partial document.
///
/// Missing language and folder are derived from the file path; negative
/// durations are clamped to zero.
fn migrate(doc: StoredDocument, now: DateTime<Utc>) -> Snapshot {
    let file_activity = doc
        .file_activity
        .into_iter()
        .map(|(path, file)| {
            let derived = FilePath::new(path.clone()).ok().map(file_ref);
            let language = file
                .language
                .or_else(|| derived.as_ref().map(|d| d.language.clone()))
                .unwrap_or_default();
            let folder_path = file
                .folder_path
                .or_else(|| derived.as_ref().map(|d| d.folder.clone()))
                .unwrap_or_default();
            let activity = FileActivity {
                language,
                time_spent: file.time_spent.max(0),
                edits: file.edits,
                folder_path,
                notes: file.notes,
            };
            (path, activity)
        })
        .collect();

    let folder_activity = doc
        .folder_activity
        .into_iter()
        .map(|(folder, stored)| {
            (
                folder,
                FolderActivity {
                    time_spent: stored.time_spent.max(0),
                    files: stored.files,
                },
            )
        })
        .collect();

    Snapshot {
        session_start: doc.session_start.unwrap_or(now),
        session_end: doc.session_end,
        total_session_time: doc.total_session_time.max(0),
        active_coding_time: doc.active_coding_time.max(0),
        debugging_time: doc.debugging_time.max(0),
        idle_time: doc.idle_time.max(0),
        file_activity,
        folder_activity,
        language_usage: doc
            .language_usage
            .into_iter()
            .map(|(language, ms)| (language, ms.max(0)))
            .collect(),
        custom_notes: doc.custom_notes,
    }
}

// ========== Merge ==========

/// Stored notes first, then notes not yet stored, without duplicates.
fn merge_notes(stored: &[String], current: &[String]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    stored
        .iter()
        .chain(current)
        .filter(|note| seen.insert(note.as_str()))
        .cloned()
        .collect()
}

/// Merges the in-memory snapshot with the one already on disk.
fn merge(stored: Option<&Snapshot>, current: &Snapshot) -> Snapshot {
    let mut merged = current.clone();
    let Some(stored) = stored else {
        return merged;
    };

    merged.custom_notes = merge_notes(&stored.custom_notes, &current.custom_notes);

    for (path, stored_file) in &stored.file_activity {
        match merged.file_activity.get_mut(path) {
            Some(file) => file.notes = merge_notes(&stored_file.notes, &file.notes),
            // Earlier runs' time belongs to earlier sessions, so only the
            // notes carry over.
            None if !stored_file.notes.is_empty() => {
                merged.file_activity.insert(
                    path.clone(),
                    FileActivity {
                        language: stored_file.language.clone(),
                        time_spent: 0,
                        edits: 0,
                        folder_path: stored_file.folder_path.clone(),
                        notes: stored_file.notes.clone(),
                    },
                );
                merged
                    .folder_activity
                    .entry(stored_file.folder_path.clone())
                    .or_insert(FolderActivity {
                        time_spent: 0,
                        files: 0,
                    })
                    .files += 1;
            }
            None => {}
        }
    }

    merged
}

// ========== File Helpers ==========

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Writes `value` as pretty JSON via a temp file and rename.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StoreError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let content = serde_json::to_string_pretty(value)?;
    let tmp_path = sibling_with_suffix(path, ".tmp");

    fs::write(&tmp_path, content).map_err(|source| StoreError::Write {
        path: tmp_path.clone(),
        source,
    })?;

    if let Err(source) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::Write {
            path: path.to_path_buf(),
            source,
        });
    }

    Ok(())
}

// ========== Store ==========

/// A snapshot store backed by a single JSON file.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and migrates the stored document.
    ///
    /// Returns `Ok(None)` when no document exists.
    pub fn read(&self, now: DateTime<Utc>) -> Result<Option<Snapshot>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let doc: StoredDocument =
            serde_json::from_str(&content).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(migrate(doc, now)))
    }

    /// Loads the stored snapshot, substituting an empty one on any failure.
    pub fn load_at(&self, now: DateTime<Utc>) -> Snapshot {
        match self.read(now) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                tracing::debug!(path = %self.path.display(), "no stored snapshot, starting empty");
                Snapshot::empty(now)
            }
            Err(e) => {
                tracing::warn!(error = %e, "stored snapshot unusable, starting empty");
                Snapshot::empty(now)
            }
        }
    }

    /// Saves `snapshot`, merging notes with the stored document.
    ///
    /// Returns the document that was written.
    pub fn save_merged(&self, snapshot: &Snapshot) -> Result<Snapshot, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let lock_path = sibling_with_suffix(&self.path, ".lock");
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let lock_file = File::create(&lock_path).map_err(|source| StoreError::Lock {
            path: lock_path.clone(),
            source,
        })?;
        lock_file
            .lock_exclusive()
            .map_err(|source| StoreError::Lock {
                path: lock_path.clone(),
                source,
            })?;

        let stored = match self.read(snapshot.session_start) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable stored snapshot while saving");
                None
            }
        };

        let merged = merge(stored.as_ref(), snapshot);
        write_atomic(&self.path, &merged)?;
        tracing::debug!(
            path = %self.path.display(),
            notes = merged.custom_notes.len(),
            files = merged.file_activity.len(),
            "snapshot written"
        );
        Ok(merged)
    }
}

impl SnapshotStore for JsonStore {
    type Error = StoreError;

    fn load(&self) -> Snapshot {
        self.load_at(Utc::now())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.save_merged(snapshot).map(|_| ())
    }

    fn export(&self, snapshot: &Snapshot, destination: &Path) -> Result<(), StoreError> {
        write_atomic(destination, snapshot)
    }
}
