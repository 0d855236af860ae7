//! Status command: where the session lives and what it holds.

use std::io::Write;

use anyhow::Result;
use chrono::Utc;
use ct_store::JsonStore;

pub fn run<W: Write>(writer: &mut W, store: &JsonStore) -> Result<()> {
    writeln!(writer, "Coding time tracker status")?;
    writeln!(writer, "Snapshot: {}", store.path().display())?;

    let snapshot = match store.read(Utc::now()) {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            writeln!(writer, "No session recorded.")?;
            return Ok(());
        }
        Err(e) => {
            writeln!(writer, "Snapshot unreadable: {e}")?;
            return Ok(());
        }
    };

    writeln!(writer, "Session started: {}", snapshot.session_start)?;
    match snapshot.session_end {
        Some(end) => writeln!(writer, "Last saved: {end}")?,
        None => writeln!(writer, "Last saved: unknown")?,
    }
    let file_notes: usize = snapshot.file_activity.values().map(|f| f.notes.len()).sum();
    writeln!(writer, "Files tracked: {}", snapshot.file_activity.len())?;
    writeln!(
        writer,
        "Notes: {} session, {file_notes} file",
        snapshot.custom_notes.len()
    )?;

    Ok(())
}
