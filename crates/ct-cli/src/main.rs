use std::io;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ct_cli::commands::{export, note, report, run, status};
use ct_cli::{Cli, Commands, Config};
use ct_store::JsonStore;

fn load_config(cli: &Cli) -> Result<Config> {
    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    Ok(config)
}

/// Load config and open the snapshot store.
fn open_store(cli: &Cli) -> Result<JsonStore> {
    let config = load_config(cli)?;
    Ok(JsonStore::new(config.snapshot_path))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // stdout carries update lines in `ct run`, so logs go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let mut stdout = io::stdout();

    match &cli.command {
        Some(Commands::Run) => {
            let config = load_config(&cli)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(run::run(&config))?;
        }
        Some(Commands::Note { text, file }) => {
            let store = open_store(&cli)?;
            note::run(&mut stdout, &store, text, file.as_deref(), Utc::now())?;
        }
        Some(Commands::Export { destination }) => {
            let store = open_store(&cli)?;
            export::run(&mut stdout, &store, destination)?;
        }
        Some(Commands::Report { json }) => {
            let store = open_store(&cli)?;
            report::run(&mut stdout, &store, *json)?;
        }
        Some(Commands::Status) => {
            let store = open_store(&cli)?;
            status::run(&mut stdout, &store)?;
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
