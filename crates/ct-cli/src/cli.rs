//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Coding session time tracker.
///
/// Turns editor activity signals into per-file, per-folder and per-language
/// time with idle detection, and keeps the session on disk across restarts.
#[derive(Debug, Parser)]
#[command(name = "ct", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the tracker.
    ///
    /// Reads one JSON signal per line from stdin and writes live
    /// `{"type":"update"}` lines to stdout. Stops on end of input or Ctrl-C
    /// after a final save.
    Run,

    /// Add a note to the saved session.
    Note {
        /// The note text.
        text: String,

        /// Attach the note to this file instead of the session.
        #[arg(long)]
        file: Option<String>,
    },

    /// Write the saved session to another file.
    Export {
        /// Destination path for the snapshot document.
        destination: PathBuf,
    },

    /// Summarize the saved session.
    Report {
        /// Output as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Show where the session is stored and whether one exists.
    Status,
}
