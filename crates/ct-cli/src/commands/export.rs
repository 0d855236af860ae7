//! Export command: copy the saved session document to another location.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use ct_core::SnapshotStore;
use ct_store::JsonStore;

pub fn run<W: Write>(writer: &mut W, store: &JsonStore, destination: &Path) -> Result<()> {
    let Some(snapshot) = store.read(Utc::now())? else {
        bail!("no saved session at {}", store.path().display());
    };

    store
        .export(&snapshot, destination)
        .with_context(|| format!("failed to export to {}", destination.display()))?;

    writeln!(writer, "Exported session to {}", destination.display())?;
    Ok(())
}
