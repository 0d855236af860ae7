//! CLI subcommand implementations.

pub mod export;
pub mod note;
pub mod report;
pub mod run;
pub mod status;
