//! Note command: append a note to the saved session without a running engine.
//!
//! The note goes through the store's merge-on-save, so a tracker that is
//! running at the same time keeps it on its next save.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ct_core::{FileActivity, FilePath, FolderActivity, NoteText, file_ref, format_note};
use ct_store::JsonStore;

pub fn run<W: Write>(
    writer: &mut W,
    store: &JsonStore,
    text: &str,
    file: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let text = NoteText::new(text)?;
    let note = format_note(now, text.as_str());
    let mut snapshot = store.load_at(now);

    match file {
        None => snapshot.custom_notes.push(note.clone()),
        Some(path) => {
            let file = file_ref(FilePath::new(path)?);
            let folders = &mut snapshot.folder_activity;
            let record = snapshot
                .file_activity
                .entry(file.path.to_string())
                .or_insert_with(|| {
                    folders
                        .entry(file.folder.clone())
                        .or_insert(FolderActivity {
                            time_spent: 0,
                            files: 0,
                        })
                        .files += 1;
                    FileActivity {
                        language: file.language.clone(),
                        time_spent: 0,
                        edits: 0,
                        folder_path: file.folder.clone(),
                        notes: Vec::new(),
                    }
                });
            record.notes.push(note.clone());
        }
    }

    store
        .save_merged(&snapshot)
        .with_context(|| format!("failed to save {}", store.path().display()))?;

    match file {
        Some(path) => writeln!(writer, "Added note to {path}: {note}")?,
        None => writeln!(writer, "Added session note: {note}")?,
    }
    Ok(())
}
