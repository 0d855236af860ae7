//! Engine host: stdin signals in, live updates out.
//!
//! Each input line is either a raw editor signal or a host control message:
//!
//! ```text
//! {"type":"focus","path":"/repo/src/main.rs"}
//! {"type":"edit","path":"/repo/src/main.rs","timestamp":"2025-01-15T09:00:00Z"}
//! {"type":"note","text":"fixed bug","path":"/repo/src/main.rs"}
//! {"type":"export","destination":"/tmp/session.json"}
//! {"type":"visibility","visible":false}
//! ```
//!
//! Lines that cannot be understood are logged and dropped. While the output
//! is visible every broadcast is written as one `{"type":"update"}` line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ct_core::{
    Aggregator, Engine, EngineHandle, Event, MalformedEvent, SnapshotStore, SubscriberHandle,
    SubscriberId, normalize_json,
};
use ct_store::JsonStore;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::Config;

/// Message types handled by the host rather than the aggregator.
const CONTROL_TYPES: [&str; 2] = ["export", "visibility"];

/// Host control message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Control {
    Export { destination: PathBuf },
    Visibility { visible: bool },
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Event(Event),
    Control(Control),
}

/// Parses one input line into an event or a control message.
pub fn parse_input(line: &str, now: DateTime<Utc>) -> Result<Input, MalformedEvent> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| MalformedEvent::Parse(e.to_string()))?;

    let is_control = value
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|kind| CONTROL_TYPES.contains(&kind));
    if is_control {
        return serde_json::from_value(value)
            .map(Input::Control)
            .map_err(|e| MalformedEvent::Parse(e.to_string()));
    }

    normalize_json(value, now).map(Input::Event)
}

/// Runs the tracker on the process's stdin and stdout until end of input or
/// Ctrl-C.
pub async fn run(config: &Config) -> Result<()> {
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    run_with(config, input, tokio::io::stdout()).await?;
    Ok(())
}

/// Runs the tracker on arbitrary streams. Returns the output writer once
/// every update has been written.
pub async fn run_with<R, W>(config: &Config, input: R, output: W) -> Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let store = Arc::new(JsonStore::new(&config.snapshot_path));

    let previous = {
        let store = Arc::clone(&store);
        tokio::task::spawn_blocking(move || store.load())
            .await
            .context("failed to load stored session")?
    };
    tracing::info!(
        path = %config.snapshot_path.display(),
        stored_notes = previous.custom_notes.len(),
        "starting new session"
    );

    let aggregator = Aggregator::new(config.effective_aggregator(), Utc::now());
    let (handle, engine) = Engine::new(aggregator, store, config.timers.clone()).spawn();

    let updates = handle.subscribe();
    let dashboard = updates.id();
    let printer = tokio::spawn(print_updates(updates, output));

    let read_result = read_input(&handle, dashboard, input).await;

    handle
        .shutdown()
        .await
        .context("engine stopped before shutdown")?;
    engine.await.context("engine task failed")?;

    handle.unsubscribe(dashboard);
    let output = printer.await.context("output task failed")??;

    read_result?;
    Ok(output)
}

async fn read_input<R>(handle: &EngineHandle, dashboard: SubscriberId, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read input")?,
            _ = &mut ctrl_c => {
                tracing::info!("interrupted, shutting down");
                return Ok(());
            }
        };
        let Some(line) = line else {
            tracing::info!("end of input, shutting down");
            return Ok(());
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_input(line, Utc::now()) {
            Ok(Input::Event(event)) => handle.submit(event).await?,
            Ok(Input::Control(Control::Visibility { visible })) => {
                tracing::debug!(visible, "dashboard visibility changed");
                handle.set_visible(dashboard, visible);
            }
            Ok(Input::Control(Control::Export { destination })) => {
                if let Err(e) = handle.export(destination).await {
                    tracing::warn!(error = %e, "export failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "dropping malformed input"),
        }
    }
}

async fn print_updates<W>(mut updates: SubscriberHandle, mut output: W) -> Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = updates.recv().await {
        let mut line = serde_json::to_vec(message.as_ref())?;
        line.push(b'\n');
        output
            .write_all(&line)
            .await
            .context("failed to write update")?;
        output.flush().await?;
    }
    Ok(output)
}
