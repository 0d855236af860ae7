//! Session state aggregation.
//!
//! The [`Aggregator`] owns every mutable accumulator of the session and is the
//! only place they change. It is synchronous and clock-free:
//! callers pass the instant each event or tick happened at, and the engine
//! serializes all calls through one task.
//!
//! # Rules
//!
//! 1. Idle detection is hysteretic. An idle-check tick whose gap since the last
//!    activity exceeds the idle threshold moves the session to idle and credits
//!    only the part of the gap beyond the threshold; later ticks while idle
//!    each credit one tick interval. Edits, focus changes and debug starts
//!    resume activity.
//! 2. Consecutive edits closer than the edit gap cap count as active coding.
//! 3. Focused time is credited to the file, its folder and its language on
//!    focus change, heartbeat and snapshot. Spans at or above the stale focus
//!    ceiling are dropped (the process was most likely suspended).
//! 4. Debug time runs from the most recent debug start to the next debug end.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{Event, FileRef, NoteScope};
use crate::snapshot::{FileActivity, FolderActivity, Snapshot, format_note};
use crate::types::FilePath;

/// Thresholds for the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Gap since last activity after which the session counts as idle.
    /// Default: 180000 (3 minutes).
    pub idle_threshold_ms: i64,

    /// Idle time credited by each idle-check tick while already idle.
    /// Must match the idle-check timer cadence. Default: 60000 (1 minute).
    pub idle_check_interval_ms: i64,

    /// Edits further apart than this are a break, not active coding.
    /// Default: 30000 (30 seconds).
    pub edit_gap_cap_ms: i64,

    /// Focus spans this long or longer are discarded on flush.
    /// Default: 300000 (5 minutes).
    pub stale_focus_ceiling_ms: i64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            idle_threshold_ms: 180_000,      // 3 minutes
            idle_check_interval_ms: 60_000,  // 1 minute
            edit_gap_cap_ms: 30_000,         // 30 seconds
            stale_focus_ceiling_ms: 300_000, // 5 minutes
        }
    }
}

/// Whether the user is currently considered present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    Active,
    Idle,
}

/// Session-wide accumulators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub start: DateTime<Utc>,
    pub active_coding_ms: i64,
    pub debugging_ms: i64,
    pub idle_ms: i64,
    /// Session notes, each formatted as `"<timestamp>: <text>"`.
    pub notes: Vec<String>,
}

/// Statistics for a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub language: String,
    pub folder: String,
    pub time_spent_ms: i64,
    pub edit_count: u64,
    pub notes: Vec<String>,
}

impl FileRecord {
    fn new(file: &FileRef) -> Self {
        Self {
            language: file.language.clone(),
            folder: file.folder.clone(),
            time_spent_ms: 0,
            edit_count: 0,
            notes: Vec::new(),
        }
    }
}

/// Statistics for a folder, derived from its files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderRecord {
    pub time_spent_ms: i64,
    pub file_count: u64,
}

/// Which file is in view and since when time was last credited to it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FocusCursor {
    file: FilePath,
    since: DateTime<Utc>,
}

/// Result of flushing the focus cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flush {
    /// No file is focused, or no time has passed.
    Nothing,
    /// Time was credited to the focused file.
    Credited { file: FilePath, elapsed_ms: i64 },
    /// The span exceeded the stale focus ceiling and was dropped.
    Discarded { file: FilePath, elapsed_ms: i64 },
}

/// The stateful aggregation engine.
#[derive(Debug, Clone)]
pub struct Aggregator {
    config: AggregatorConfig,
    session: Session,
    files: HashMap<FilePath, FileRecord>,
    folders: HashMap<String, FolderRecord>,
    languages: HashMap<String, i64>,
    state: ActivityState,
    last_activity: DateTime<Utc>,
    last_edit: Option<DateTime<Utc>>,
    debug_started: Option<DateTime<Utc>>,
    focus: Option<FocusCursor>,
    /// Latest instant up to which focused time has been accounted for.
    credited_until: DateTime<Utc>,
}

impl Aggregator {
    /// Starts a new, empty session at `start`.
    pub fn new(config: AggregatorConfig, start: DateTime<Utc>) -> Self {
        Self {
            config,
            session: Session {
                start,
                active_coding_ms: 0,
                debugging_ms: 0,
                idle_ms: 0,
                notes: Vec::new(),
            },
            files: HashMap::new(),
            folders: HashMap::new(),
            languages: HashMap::new(),
            state: ActivityState::Active,
            last_activity: start,
            last_edit: None,
            debug_started: None,
            focus: None,
            credited_until: start,
        }
    }

    pub const fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub const fn session(&self) -> &Session {
        &self.session
    }

    pub const fn state(&self) -> ActivityState {
        self.state
    }

    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn folder(&self, folder: &str) -> Option<&FolderRecord> {
        self.folders.get(folder)
    }

    /// Accumulated focused time for a language tag, zero if never seen.
    pub fn language_time(&self, language: &str) -> i64 {
        self.languages.get(language).copied().unwrap_or(0)
    }

    /// The currently focused file, if any.
    pub fn focused_file(&self) -> Option<&FilePath> {
        self.focus.as_ref().map(|cursor| &cursor.file)
    }

    /// Applies one normalized event.
    pub fn apply(&mut self, event: &Event) {
        let at = event.at();

        if event.resumes_activity() && self.state == ActivityState::Idle {
            tracing::debug!(event = event.name(), "activity resumed");
            self.state = ActivityState::Active;
        }
        self.last_activity = self.last_activity.max(at);

        match event {
            Event::Edit { file, at } => self.record_edit(file, *at),
            Event::FocusChange { file, at } => self.change_focus(file.as_ref(), *at),
            Event::DebugStart { at } => {
                if let Some(previous) = self.debug_started.replace(*at) {
                    tracing::debug!(%previous, "debug start overwrote an open debug session");
                }
            }
            Event::DebugEnd { at } => match self.debug_started.take() {
                Some(started) => {
                    self.session.debugging_ms += elapsed_ms(started, *at).max(0);
                }
                None => tracing::debug!("debug end without matching start"),
            },
            Event::NoteRequest { scope, text, at } => {
                let note = format_note(*at, text.as_str());
                match scope {
                    NoteScope::Session => self.session.notes.push(note),
                    NoteScope::File(file) => self.ensure_file(file).notes.push(note),
                }
            }
        }
    }

    fn record_edit(&mut self, file: &FileRef, at: DateTime<Utc>) {
        self.ensure_file(file).edit_count += 1;

        if let Some(previous) = self.last_edit {
            let gap = elapsed_ms(previous, at);
            if (0..self.config.edit_gap_cap_ms).contains(&gap) {
                self.session.active_coding_ms += gap;
            }
        }
        self.last_edit = Some(at);
    }

    fn change_focus(&mut self, file: Option<&FileRef>, at: DateTime<Utc>) {
        self.flush(at);

        let Some(file) = file else {
            self.focus = None;
            return;
        };
        self.ensure_file(file);
        self.focus = Some(FocusCursor {
            file: file.path.clone(),
            since: at.max(self.credited_until),
        });
    }

    fn ensure_file(&mut self, file: &FileRef) -> &mut FileRecord {
        let folders = &mut self.folders;
        self.files.entry(file.path.clone()).or_insert_with(|| {
            folders.entry(file.folder.clone()).or_default().file_count += 1;
            FileRecord::new(file)
        })
    }

    /// Credits time since the last flush to the focused file.
    ///
    /// The cursor restarts at `now` whether the span was credited or
    /// discarded, so repeated flushes accrue incrementally.
    pub fn flush(&mut self, now: DateTime<Utc>) -> Flush {
        let Some(cursor) = self.focus.as_mut() else {
            return Flush::Nothing;
        };

        let elapsed = elapsed_ms(cursor.since, now);
        if elapsed <= 0 {
            return Flush::Nothing;
        }
        cursor.since = now;
        self.credited_until = self.credited_until.max(now);
        let file = cursor.file.clone();

        if elapsed >= self.config.stale_focus_ceiling_ms {
            tracing::debug!(%file, elapsed_ms = elapsed, "discarding stale focus span");
            return Flush::Discarded {
                file,
                elapsed_ms: elapsed,
            };
        }

        if let Some(record) = self.files.get_mut(&file) {
            record.time_spent_ms += elapsed;
            self.folders
                .entry(record.folder.clone())
                .or_default()
                .time_spent_ms += elapsed;
            if !record.language.is_empty() {
                *self.languages.entry(record.language.clone()).or_insert(0) += elapsed;
            }
        }

        Flush::Credited {
            file,
            elapsed_ms: elapsed,
        }
    }

    /// Handles an idle-check tick. Returns the state after the check.
    pub fn idle_check(&mut self, now: DateTime<Utc>) -> ActivityState {
        match self.state {
            ActivityState::Active => {
                let gap = elapsed_ms(self.last_activity, now);
                if gap > self.config.idle_threshold_ms {
                    let excess = gap - self.config.idle_threshold_ms;
                    tracing::debug!(gap_ms = gap, credited_ms = excess, "session went idle");
                    self.session.idle_ms += excess;
                    self.state = ActivityState::Idle;
                }
            }
            ActivityState::Idle => {
                self.session.idle_ms += self.config.idle_check_interval_ms;
            }
        }
        self.state
    }

    /// Handles a heartbeat tick.
    pub fn heartbeat(&mut self, now: DateTime<Utc>) -> Flush {
        self.flush(now)
    }

    /// Flushes the focus cursor and captures the full session state.
    pub fn snapshot(&mut self, now: DateTime<Utc>) -> Snapshot {
        self.flush(now);

        let file_activity = self
            .files
            .iter()
            .map(|(path, record)| {
                (
                    path.to_string(),
                    FileActivity {
                        language: record.language.clone(),
                        time_spent: record.time_spent_ms,
                        edits: record.edit_count,
                        folder_path: record.folder.clone(),
                        notes: record.notes.clone(),
                    },
                )
            })
            .collect();

        let folder_activity = self
            .folders
            .iter()
            .map(|(folder, record)| {
                (
                    folder.clone(),
                    FolderActivity {
                        time_spent: record.time_spent_ms,
                        files: record.file_count,
                    },
                )
            })
            .collect();

        Snapshot {
            session_start: self.session.start,
            session_end: Some(now),
            total_session_time: elapsed_ms(self.session.start, now).max(0),
            active_coding_time: self.session.active_coding_ms,
            debugging_time: self.session.debugging_ms,
            idle_time: self.session.idle_ms,
            file_activity,
            folder_activity,
            language_usage: self.languages.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            custom_notes: self.session.notes.clone(),
        }
    }
}

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_milliseconds()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::file_ref;
    use crate::types::NoteText;
    use chrono::{Duration, TimeZone};

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::milliseconds(ms)
    }

    fn file(path: &str) -> FileRef {
        file_ref(FilePath::new(path).unwrap())
    }

    fn edit(path: &str, ms: i64) -> Event {
        Event::Edit {
            file: file(path),
            at: ts(ms),
        }
    }

    fn focus(path: Option<&str>, ms: i64) -> Event {
        Event::FocusChange {
            file: path.map(file),
            at: ts(ms),
        }
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(AggregatorConfig::default(), ts(0))
    }

    #[test]
    fn test_edits_accrue_active_time_without_focus_time() {
        let mut agg = aggregator();
        agg.apply(&edit("a.py", 0));
        agg.apply(&edit("a.py", 5000));

        let record = agg.file("a.py").expect("record should exist");
        assert_eq!(record.edit_count, 2);
        assert_eq!(record.time_spent_ms, 0);
        assert_eq!(agg.session().active_coding_ms, 5000);
    }

    #[test]
    fn test_edit_gaps_at_or_above_cap_contribute_nothing() {
        let mut agg = aggregator();
        // Gaps: 10s, 30s (cap), 29.999s, 2 minutes
        for ms in [0, 10_000, 40_000, 69_999, 189_999] {
            agg.apply(&edit("/repo/lib.rs", ms));
        }

        assert_eq!(agg.session().active_coding_ms, 10_000 + 29_999);
        assert_eq!(agg.file("/repo/lib.rs").unwrap().edit_count, 5);
    }

    #[test]
    fn test_edits_across_files_share_the_gap_clock() {
        let mut agg = aggregator();
        agg.apply(&edit("/repo/a.rs", 0));
        agg.apply(&edit("/repo/b.rs", 4000));

        assert_eq!(agg.session().active_coding_ms, 4000);
        assert_eq!(agg.file("/repo/a.rs").unwrap().edit_count, 1);
        assert_eq!(agg.file("/repo/b.rs").unwrap().edit_count, 1);
    }

    #[test]
    fn test_focus_change_credits_file_folder_and_language() {
        let mut agg = aggregator();
        agg.apply(&focus(Some("/repo/cmd/b.go"), 0));
        agg.apply(&focus(Some("/repo/cmd/c.go"), 10_000));

        assert_eq!(agg.file("/repo/cmd/b.go").unwrap().time_spent_ms, 10_000);
        assert_eq!(agg.folder("/repo/cmd").unwrap().time_spent_ms, 10_000);
        assert_eq!(agg.language_time("go"), 10_000);

        // The new cursor opens with nothing accrued yet.
        assert_eq!(agg.file("/repo/cmd/c.go").unwrap().time_spent_ms, 0);
        assert_eq!(agg.focused_file().unwrap().as_str(), "/repo/cmd/c.go");
        assert_eq!(agg.folder("/repo/cmd").unwrap().file_count, 2);
    }

    #[test]
    fn test_heartbeat_flushes_incrementally() {
        let mut agg = aggregator();
        agg.apply(&focus(Some("/repo/main.rs"), 0));

        for second in 1..=5 {
            let flush = agg.heartbeat(ts(second * 1000));
            assert!(matches!(flush, Flush::Credited { elapsed_ms: 1000, .. }));
        }

        assert_eq!(agg.file("/repo/main.rs").unwrap().time_spent_ms, 5000);
        assert_eq!(agg.language_time("rs"), 5000);
    }

    #[test]
    fn test_stale_focus_span_is_discarded() {
        let mut agg = aggregator();
        agg.apply(&focus(Some("/repo/main.rs"), 0));

        let flush = agg.heartbeat(ts(300_000));
        assert!(matches!(flush, Flush::Discarded { elapsed_ms: 300_000, .. }));
        assert_eq!(agg.file("/repo/main.rs").unwrap().time_spent_ms, 0);
        assert_eq!(agg.folder("/repo").unwrap().time_spent_ms, 0);
        assert_eq!(agg.language_time("rs"), 0);

        // Cursor restarted at the discarded flush, so accrual resumes.
        agg.heartbeat(ts(301_000));
        assert_eq!(agg.file("/repo/main.rs").unwrap().time_spent_ms, 1000);
    }

    #[test]
    fn test_focus_none_closes_cursor() {
        let mut agg = aggregator();
        agg.apply(&focus(Some("/repo/a.ts"), 0));
        agg.apply(&focus(None, 2000));

        assert!(agg.focused_file().is_none());
        assert_eq!(agg.heartbeat(ts(10_000)), Flush::Nothing);
        assert_eq!(agg.file("/repo/a.ts").unwrap().time_spent_ms, 2000);
    }

    #[test]
    fn test_file_without_extension_skips_language_usage() {
        let mut agg = aggregator();
        agg.apply(&focus(Some("/repo/Makefile"), 0));
        let snapshot = agg.snapshot(ts(3000));

        assert_eq!(snapshot.file_activity["/repo/Makefile"].time_spent, 3000);
        assert_eq!(snapshot.folder_activity["/repo"].time_spent, 3000);
        assert!(snapshot.language_usage.is_empty());
    }

    #[test]
    fn test_focus_accrual_never_exceeds_session_time() {
        let mut agg = aggregator();
        // Out-of-order and duplicate focus changes.
        agg.apply(&focus(Some("/repo/a.rs"), 1000));
        agg.apply(&focus(Some("/repo/b.rs"), 5000));
        agg.apply(&focus(Some("/repo/a.rs"), 3000));
        agg.apply(&focus(Some("/repo/a.rs"), 3000));
        agg.heartbeat(ts(6000));
        agg.apply(&focus(Some("/repo/c.rs"), 8000));

        let snapshot = agg.snapshot(ts(9000));
        assert!(snapshot.total_file_time() <= snapshot.total_session_time);
        assert_eq!(snapshot.total_file_time(), 8000);
    }

    #[test]
    fn test_idle_accrual_after_threshold_and_ticks() {
        let mut agg = aggregator();

        assert_eq!(agg.idle_check(ts(60_000)), ActivityState::Active);
        assert_eq!(agg.idle_check(ts(120_000)), ActivityState::Active);
        // Exactly at the threshold is not idle yet.
        assert_eq!(agg.idle_check(ts(180_000)), ActivityState::Active);
        assert_eq!(agg.session().idle_ms, 0);

        assert_eq!(agg.idle_check(ts(240_000)), ActivityState::Idle);
        let first_excess = 240_000 - 180_000;
        assert_eq!(agg.session().idle_ms, first_excess);

        agg.idle_check(ts(300_000));
        agg.idle_check(ts(360_000));
        assert_eq!(agg.session().idle_ms, first_excess + 2 * 60_000);
    }

    #[test]
    fn test_activity_ends_idle_without_removing_credit() {
        let mut agg = aggregator();
        agg.idle_check(ts(200_000));
        assert_eq!(agg.state(), ActivityState::Idle);
        assert_eq!(agg.session().idle_ms, 20_000);

        agg.apply(&edit("/repo/a.rs", 210_000));
        assert_eq!(agg.state(), ActivityState::Active);
        assert_eq!(agg.session().idle_ms, 20_000);

        // Fresh activity restarts the grace window.
        assert_eq!(agg.idle_check(ts(260_000)), ActivityState::Active);
        assert_eq!(agg.session().idle_ms, 20_000);
    }

    #[test]
    fn test_debug_end_does_not_resume_activity() {
        let mut agg = aggregator();
        agg.idle_check(ts(200_000));
        agg.apply(&Event::DebugEnd { at: ts(201_000) });

        assert_eq!(agg.state(), ActivityState::Idle);
        agg.idle_check(ts(260_000));
        assert_eq!(agg.session().idle_ms, 20_000 + 60_000);
    }

    #[test]
    fn test_debug_session_and_orphan_end() {
        let mut agg = aggregator();
        agg.apply(&Event::DebugStart { at: ts(0) });
        agg.apply(&Event::DebugEnd { at: ts(2000) });
        assert_eq!(agg.session().debugging_ms, 2000);

        agg.apply(&Event::DebugEnd { at: ts(3000) });
        assert_eq!(agg.session().debugging_ms, 2000);
    }

    #[test]
    fn test_duplicate_debug_start_keeps_latest() {
        let mut agg = aggregator();
        agg.apply(&Event::DebugStart { at: ts(0) });
        agg.apply(&Event::DebugStart { at: ts(5000) });
        agg.apply(&Event::DebugEnd { at: ts(6000) });

        assert_eq!(agg.session().debugging_ms, 1000);
    }

    #[test]
    fn test_file_note_creates_record() {
        let mut agg = aggregator();
        agg.apply(&Event::NoteRequest {
            scope: NoteScope::File(file("a.py")),
            text: NoteText::new("fixed bug").unwrap(),
            at: ts(0),
        });

        let record = agg.file("a.py").expect("record should exist");
        assert_eq!(record.notes, vec!["2025-01-15T09:00:00.000Z: fixed bug"]);
        assert_eq!(record.edit_count, 0);
        assert_eq!(agg.folder("").unwrap().file_count, 1);
    }

    #[test]
    fn test_session_note_appends_in_order() {
        let mut agg = aggregator();
        for (ms, text) in [(0, "start"), (1500, "lunch")] {
            agg.apply(&Event::NoteRequest {
                scope: NoteScope::Session,
                text: NoteText::new(text).unwrap(),
                at: ts(ms),
            });
        }

        assert_eq!(
            agg.session().notes,
            vec![
                "2025-01-15T09:00:00.000Z: start",
                "2025-01-15T09:00:01.500Z: lunch"
            ]
        );
    }

    #[test]
    fn test_snapshot_flushes_and_reports_totals() {
        let mut agg = aggregator();
        agg.apply(&focus(Some("/repo/src/lib.rs"), 0));
        agg.apply(&edit("/repo/src/lib.rs", 1000));
        agg.apply(&edit("/repo/src/lib.rs", 3000));

        let snapshot = agg.snapshot(ts(4000));
        assert_eq!(snapshot.session_end, Some(ts(4000)));
        assert_eq!(snapshot.total_session_time, 4000);
        assert_eq!(snapshot.active_coding_time, 2000);

        let lib = &snapshot.file_activity["/repo/src/lib.rs"];
        assert_eq!(lib.time_spent, 4000);
        assert_eq!(lib.edits, 2);
        assert_eq!(lib.folder_path, "/repo/src");
        assert_eq!(snapshot.folder_activity["/repo/src"].files, 1);
        assert_eq!(snapshot.language_usage["rs"], 4000);

        // A second snapshot at the same instant adds nothing.
        let again = agg.snapshot(ts(4000));
        assert_eq!(again, snapshot);
    }
}
