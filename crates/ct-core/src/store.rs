//! Durable storage seam.
//!
//! The engine only needs three things from storage, so it talks to this trait
//! and stays independent of the on-disk format.

use std::path::Path;

use crate::snapshot::Snapshot;

/// Durable snapshot storage.
///
/// Implementations are called from blocking worker threads, never from the
/// engine task itself.
pub trait SnapshotStore: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reads the stored snapshot. Missing or unreadable storage yields an
    /// empty snapshot rather than an error.
    fn load(&self) -> Snapshot;

    /// Persists `snapshot` atomically, merging with what storage already holds
    /// so notes written by earlier processes survive.
    fn save(&self, snapshot: &Snapshot) -> Result<(), Self::Error>;

    /// Writes `snapshot` verbatim to `destination`.
    fn export(&self, snapshot: &Snapshot, destination: &Path) -> Result<(), Self::Error>;
}
