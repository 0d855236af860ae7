//! Report command: summarize the saved session.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use ct_core::Snapshot;
use ct_store::JsonStore;
use serde::Serialize;

/// Files listed in the text report.
const TOP_FILES: usize = 10;

// ========== Duration Formatting ==========

/// Formats milliseconds as duration string.
/// Returns "Xh Ym" if >= 1 hour, "Xm" if < 1 hour.
/// Negative durations are treated as 0m.
pub fn format_duration(ms: i64) -> String {
    if ms < 0 {
        return "0m".to_string();
    }
    let total_minutes = ms / 60_000;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours >= 1 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

// ========== Progress Bar ==========

/// Generates a 10-character bar for `value` relative to `max`.
/// Non-zero values below 5% still get a single block.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn progress_bar(value: i64, max: i64) -> String {
    if max <= 0 {
        return "░".repeat(10);
    }

    let ratio = value as f64 / max as f64;
    let filled = if ratio < 0.05 && value > 0 {
        1
    } else {
        (ratio * 10.0).round().clamp(0.0, 10.0) as usize
    };

    format!("{}{}", "█".repeat(filled), "░".repeat(10 - filled))
}

fn format_instant(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn plural(count: u64, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

/// Entries with time spent, largest first, ties by name.
fn ranked<'a, T>(
    entries: impl IntoIterator<Item = (&'a String, T)>,
    time: impl Fn(&T) -> i64,
) -> Vec<(&'a String, T)> {
    let mut ranked: Vec<_> = entries.into_iter().filter(|(_, e)| time(e) > 0).collect();
    ranked.sort_by(|a, b| time(&b.1).cmp(&time(&a.1)).then_with(|| a.0.cmp(b.0)));
    ranked
}

// ========== Text Report ==========

/// Formats a snapshot as a human-readable summary.
pub fn format_report(snapshot: &Snapshot) -> String {
    let mut out = String::new();

    let end = snapshot
        .session_end
        .map_or_else(|| "in progress".to_string(), format_instant);
    out.push_str(&format!(
        "Session: {} - {end}\n\n",
        format_instant(snapshot.session_start)
    ));

    for (label, ms) in [
        ("Total", snapshot.total_session_time),
        ("Coding", snapshot.active_coding_time),
        ("Debugging", snapshot.debugging_time),
        ("Idle", snapshot.idle_time),
        ("Focused", snapshot.total_file_time()),
    ] {
        out.push_str(&format!("{label:<11}{}\n", format_duration(ms)));
    }

    let languages = ranked(snapshot.language_usage.iter(), |ms| **ms);
    if let Some(&(_, max)) = languages.first() {
        let width = languages.iter().map(|(l, _)| l.len()).max().unwrap_or(0);
        out.push_str("\nLanguages\n");
        for (language, ms) in &languages {
            out.push_str(&format!(
                "  {language:<width$}  {}  {}\n",
                progress_bar(**ms, *max),
                format_duration(**ms)
            ));
        }
    }

    let folders = ranked(snapshot.folder_activity.iter(), |f| f.time_spent);
    if !folders.is_empty() {
        let width = folders.iter().map(|(p, _)| p.len()).max().unwrap_or(0);
        out.push_str("\nFolders\n");
        for (path, folder) in &folders {
            out.push_str(&format!(
                "  {path:<width$}  {}, {}\n",
                format_duration(folder.time_spent),
                plural(folder.files, "file")
            ));
        }
    }

    let mut files: Vec<_> = snapshot
        .file_activity
        .iter()
        .filter(|(_, f)| f.time_spent > 0 || f.edits > 0)
        .collect();
    files.sort_by(|a, b| {
        b.1.time_spent
            .cmp(&a.1.time_spent)
            .then_with(|| b.1.edits.cmp(&a.1.edits))
            .then_with(|| a.0.cmp(b.0))
    });
    if !files.is_empty() {
        let shown = &files[..files.len().min(TOP_FILES)];
        let width = shown.iter().map(|(p, _)| p.len()).max().unwrap_or(0);
        out.push_str("\nFiles\n");
        for (path, file) in shown {
            out.push_str(&format!(
                "  {path:<width$}  {}, {}\n",
                format_duration(file.time_spent),
                plural(file.edits, "edit")
            ));
        }
        if files.len() > TOP_FILES {
            out.push_str(&format!("  ... and {} more\n", files.len() - TOP_FILES));
        }
    }

    let file_notes: Vec<(&String, &String)> = snapshot
        .file_activity
        .iter()
        .flat_map(|(path, file)| file.notes.iter().map(move |note| (path, note)))
        .collect();
    if !snapshot.custom_notes.is_empty() || !file_notes.is_empty() {
        out.push_str("\nNotes\n");
        for note in &snapshot.custom_notes {
            out.push_str(&format!("  {note}\n"));
        }
        for (path, note) in file_notes {
            out.push_str(&format!("  [{path}] {note}\n"));
        }
    }

    out
}

// ========== JSON Report ==========

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    session_start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_end: Option<DateTime<Utc>>,
    totals: JsonTotals,
    languages: Vec<JsonLanguage<'a>>,
    folders: Vec<JsonFolder<'a>>,
    files: Vec<JsonFile<'a>>,
    notes: &'a [String],
}

#[derive(Debug, Serialize)]
struct JsonTotals {
    session_ms: i64,
    active_coding_ms: i64,
    debugging_ms: i64,
    idle_ms: i64,
    focused_ms: i64,
}

#[derive(Debug, Serialize)]
struct JsonLanguage<'a> {
    language: &'a str,
    time_ms: i64,
}

#[derive(Debug, Serialize)]
struct JsonFolder<'a> {
    path: &'a str,
    time_ms: i64,
    files: u64,
}

#[derive(Debug, Serialize)]
struct JsonFile<'a> {
    path: &'a str,
    language: &'a str,
    time_ms: i64,
    edits: u64,
    notes: &'a [String],
}

/// Formats a snapshot as a JSON summary with entries ranked by time.
pub fn format_report_json(snapshot: &Snapshot) -> Result<String> {
    let languages = ranked(snapshot.language_usage.iter(), |ms| **ms)
        .into_iter()
        .map(|(language, ms)| JsonLanguage {
            language,
            time_ms: *ms,
        })
        .collect();

    let folders = ranked(snapshot.folder_activity.iter(), |f| f.time_spent)
        .into_iter()
        .map(|(path, folder)| JsonFolder {
            path,
            time_ms: folder.time_spent,
            files: folder.files,
        })
        .collect();

    let mut files: Vec<JsonFile<'_>> = snapshot
        .file_activity
        .iter()
        .map(|(path, file)| JsonFile {
            path,
            language: &file.language,
            time_ms: file.time_spent,
            edits: file.edits,
            notes: &file.notes,
        })
        .collect();
    files.sort_by(|a, b| b.time_ms.cmp(&a.time_ms).then_with(|| a.path.cmp(b.path)));

    let report = JsonReport {
        session_start: snapshot.session_start,
        session_end: snapshot.session_end,
        totals: JsonTotals {
            session_ms: snapshot.total_session_time,
            active_coding_ms: snapshot.active_coding_time,
            debugging_ms: snapshot.debugging_time,
            idle_ms: snapshot.idle_time,
            focused_ms: snapshot.total_file_time(),
        },
        languages,
        folders,
        files,
        notes: &snapshot.custom_notes,
    };

    Ok(serde_json::to_string_pretty(&report)?)
}

// ========== Public Interface ==========

/// Runs the report command.
pub fn run<W: Write>(writer: &mut W, store: &JsonStore, json: bool) -> Result<()> {
    let snapshot = store.load_at(Utc::now());

    if json {
        writeln!(writer, "{}", format_report_json(&snapshot)?)?;
    } else {
        write!(writer, "{}", format_report(&snapshot))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ct_core::{FileActivity, FolderActivity};
    use insta::assert_snapshot;

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0)
            .single()
            .expect("valid test timestamp")
            + chrono::Duration::minutes(minutes)
    }

    fn file(language: &str, folder: &str, minutes: i64, edits: u64) -> FileActivity {
        FileActivity {
            language: language.to_string(),
            time_spent: minutes * 60_000,
            edits,
            folder_path: folder.to_string(),
            notes: vec![],
        }
    }

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::empty(ts(0));
        snapshot.session_end = Some(ts(90));
        snapshot.total_session_time = 90 * 60_000;
        snapshot.active_coding_time = 45 * 60_000;
        snapshot.debugging_time = 10 * 60_000;
        snapshot.idle_time = 5 * 60_000;

        let mut main = file("rs", "/repo/src", 60, 12);
        main.notes.push("2025-01-15T09:30:00.000Z: split parser".to_string());
        snapshot
            .file_activity
            .insert("/repo/src/main.rs".to_string(), main);
        snapshot
            .file_activity
            .insert("/repo/tools/gen.py".to_string(), file("py", "/repo/tools", 20, 1));
        snapshot
            .file_activity
            .insert("/repo/README".to_string(), file("", "/repo", 0, 0));

        snapshot.folder_activity.insert(
            "/repo/src".to_string(),
            FolderActivity {
                time_spent: 60 * 60_000,
                files: 1,
            },
        );
        snapshot.folder_activity.insert(
            "/repo/tools".to_string(),
            FolderActivity {
                time_spent: 20 * 60_000,
                files: 1,
            },
        );
        snapshot.folder_activity.insert(
            "/repo".to_string(),
            FolderActivity {
                time_spent: 0,
                files: 1,
            },
        );
        snapshot.language_usage.insert("rs".to_string(), 60 * 60_000);
        snapshot.language_usage.insert("py".to_string(), 20 * 60_000);
        snapshot
            .custom_notes
            .push("2025-01-15T09:05:00.000Z: started on the lexer".to_string());
        snapshot
    }

    #[test]
    fn test_format_duration_hours_and_minutes() {
        assert_eq!(format_duration(5_400_000), "1h 30m");
    }

    #[test]
    fn test_format_duration_minutes_only() {
        assert_eq!(format_duration(2_700_000), "45m");
    }

    #[test]
    fn test_format_duration_floors_seconds() {
        assert_eq!(format_duration(119_999), "1m");
    }

    #[test]
    fn test_format_duration_negative_is_zero() {
        assert_eq!(format_duration(-1), "0m");
    }

    #[test]
    fn test_progress_bar_partial_and_minimum() {
        assert_eq!(progress_bar(20, 60), "███░░░░░░░");
        assert_eq!(progress_bar(1, 100), "█░░░░░░░░░");
        assert_eq!(progress_bar(0, 0), "░░░░░░░░░░");
    }

    #[test]
    fn test_report_empty_session() {
        let output = format_report(&Snapshot::empty(ts(0)));
        assert_snapshot!(output, @r"
        Session: 2025-01-15 09:00 UTC - in progress

        Total      0m
        Coding     0m
        Debugging  0m
        Idle       0m
        Focused    0m
        ");
    }

    #[test]
    fn test_report_full_session() {
        let output = format_report(&sample());
        assert_snapshot!(output, @r"
        Session: 2025-01-15 09:00 UTC - 2025-01-15 10:30 UTC

        Total      1h 30m
        Coding     45m
        Debugging  10m
        Idle       5m
        Focused    1h 20m

        Languages
          rs  ██████████  1h 0m
          py  ███░░░░░░░  20m

        Folders
          /repo/src    1h 0m, 1 file
          /repo/tools  20m, 1 file

        Files
          /repo/src/main.rs   1h 0m, 12 edits
          /repo/tools/gen.py  20m, 1 edit

        Notes
          2025-01-15T09:05:00.000Z: started on the lexer
          [/repo/src/main.rs] 2025-01-15T09:30:00.000Z: split parser
        ");
    }

    #[test]
    fn test_report_truncates_file_list() {
        let mut snapshot = Snapshot::empty(ts(0));
        for i in 0..12 {
            snapshot
                .file_activity
                .insert(format!("/r/f{i:02}.rs"), file("rs", "/r", 1, 1));
        }

        let output = format_report(&snapshot);
        assert!(output.contains("  ... and 2 more\n"));
        assert!(output.contains("/r/f00.rs"));
        assert!(!output.contains("/r/f11.rs"));
    }

    #[test]
    fn test_report_json_ranks_entries() {
        let output = format_report_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(value["totals"]["focused_ms"], 80 * 60_000);
        assert_eq!(value["languages"][0]["language"], "rs");
        assert_eq!(value["languages"][1]["language"], "py");
        assert_eq!(value["folders"].as_array().unwrap().len(), 2);
        assert_eq!(value["files"][0]["path"], "/repo/src/main.rs");
        assert_eq!(value["files"][0]["notes"][0], "2025-01-15T09:30:00.000Z: split parser");
        assert_eq!(value["files"][2]["path"], "/repo/README");
        assert_eq!(value["session_end"], "2025-01-15T10:30:00Z");
        assert_eq!(value["notes"].as_array().unwrap().len(), 1);
    }
}
