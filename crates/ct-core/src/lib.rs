//! Core domain logic for the coding time tracker.
//!
//! This crate contains the fundamental types and logic for:
//! - Normalization: turning raw editor signals into canonical events
//! - Aggregation: the idle/active state machine and focus-time attribution
//! - Broadcast: pushing live snapshots to subscribers
//! - Engine: the single task that serializes events, ticks and persistence

pub mod broadcast;
pub mod clock;
pub mod engine;
pub mod event;
pub mod normalize;
pub mod session;
pub mod signal;
pub mod snapshot;
pub mod store;
pub mod types;

pub use broadcast::{Delivery, SubscriberHandle, SubscriberHub, SubscriberId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{Engine, EngineError, EngineHandle, Tick, TimerConfig};
pub use event::{Event, FileRef, NoteScope};
pub use normalize::{MalformedEvent, file_ref, normalize, normalize_json, normalize_line};
pub use session::{ActivityState, Aggregator, AggregatorConfig, FileRecord, Flush, FolderRecord};
pub use signal::{RawSignal, SignalKind, UnknownSignalKind};
pub use snapshot::{FileActivity, FolderActivity, Snapshot, UpdateMessage, format_note};
pub use store::SnapshotStore;
pub use types::{FilePath, Label, NonBlank, NoteText, ValidationError};
