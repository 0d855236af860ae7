//! Engine runtime: the single task that owns the aggregator.
//!
//! Every mutation goes through one command queue. User events, the three
//! periodic ticks, snapshot and export requests, and shutdown are all
//! commands, so they are processed strictly one at a time and no tick can
//! observe a half-applied event.
//!
//! Persistence never runs on the engine task. Persist ticks publish the
//! latest snapshot on a `watch` channel; a writer task saves whatever is newest
//! on a blocking thread. A failed save is logged and the next persist tick
//! tries again with fresher state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::broadcast::{Delivery, SubscriberHandle, SubscriberHub, SubscriberId};
use crate::clock::{Clock, SystemClock};
use crate::event::Event;
use crate::session::Aggregator;
use crate::snapshot::{Snapshot, UpdateMessage};
use crate::store::SnapshotStore;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Depth of the engine command queue.
const COMMAND_QUEUE_DEPTH: usize = 256;

/// Timer cadences. A value of zero disables that timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Flush and broadcast cadence. Default: 1000 (1 second).
    pub heartbeat_interval_ms: u64,
    /// Idle-check cadence. Default: 60000 (1 minute).
    pub idle_check_interval_ms: u64,
    /// Periodic save cadence. Default: 30000 (30 seconds).
    pub persist_interval_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1_000,
            idle_check_interval_ms: 60_000,
            persist_interval_ms: 30_000,
        }
    }
}

impl TimerConfig {
    /// No timers at all; ticks must be sent through [`EngineHandle::tick`].
    pub const fn disabled() -> Self {
        Self {
            heartbeat_interval_ms: 0,
            idle_check_interval_ms: 0,
            persist_interval_ms: 0,
        }
    }
}

/// Periodic ticks fed into the command queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    IdleCheck,
    Heartbeat,
    Persist,
}

/// Engine errors surfaced to the host.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine task has exited.
    #[error("engine is not running")]
    Stopped,
    /// Writing an export failed.
    #[error("export to {destination} failed")]
    Export {
        destination: String,
        #[source]
        source: BoxError,
    },
}

#[derive(Debug)]
enum Command {
    Event(Event),
    /// A tick stamped with the instant it was sent, not dequeued.
    Tick {
        tick: Tick,
        at: DateTime<Utc>,
    },
    Snapshot {
        at: DateTime<Utc>,
        reply: oneshot::Sender<Snapshot>,
    },
    Export {
        destination: PathBuf,
        at: DateTime<Utc>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle for talking to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    hub: Arc<SubscriberHub>,
    clock: Arc<dyn Clock>,
}

impl EngineHandle {
    async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.tx.send(command).await.map_err(|_| EngineError::Stopped)
    }

    /// Queues a normalized event.
    pub async fn submit(&self, event: Event) -> Result<(), EngineError> {
        self.send(Command::Event(event)).await
    }

    /// Queues a tick by hand, stamped with the engine clock's current time.
    pub async fn tick(&self, tick: Tick) -> Result<(), EngineError> {
        let at = self.clock.now();
        self.send(Command::Tick { tick, at }).await
    }

    /// Captures a snapshot after everything queued before it is applied.
    pub async fn snapshot(&self) -> Result<Snapshot, EngineError> {
        let (reply, rx) = oneshot::channel();
        let at = self.clock.now();
        self.send(Command::Snapshot { at, reply }).await?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Flushes, snapshots and writes the snapshot to `destination`.
    pub async fn export(&self, destination: impl Into<PathBuf>) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Export {
            destination: destination.into(),
            at: self.clock.now(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }

    /// Stops timers, performs the final save and waits for the engine to exit.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown(reply)).await?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    pub fn subscribe(&self) -> SubscriberHandle {
        self.hub.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.hub.unsubscribe(id)
    }

    pub fn set_visible(&self, id: SubscriberId, visible: bool) -> bool {
        self.hub.set_visible(id, visible)
    }
}

/// The aggregation engine before it is started.
pub struct Engine<S: SnapshotStore> {
    aggregator: Aggregator,
    store: Arc<S>,
    hub: Arc<SubscriberHub>,
    clock: Arc<dyn Clock>,
    timers: TimerConfig,
}

impl<S: SnapshotStore> Engine<S> {
    pub fn new(aggregator: Aggregator, store: Arc<S>, timers: TimerConfig) -> Self {
        Self {
            aggregator,
            store,
            hub: Arc::new(SubscriberHub::default()),
            clock: Arc::new(SystemClock),
            timers,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_hub(mut self, hub: Arc<SubscriberHub>) -> Self {
        self.hub = hub;
        self
    }

    /// Starts the engine, its timers and its writer on the current runtime.
    pub fn spawn(self) -> (EngineHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let handle = EngineHandle {
            tx: tx.clone(),
            hub: Arc::clone(&self.hub),
            clock: Arc::clone(&self.clock),
        };

        let timers: Vec<JoinHandle<()>> = [
            (Tick::Heartbeat, self.timers.heartbeat_interval_ms),
            (Tick::IdleCheck, self.timers.idle_check_interval_ms),
            (Tick::Persist, self.timers.persist_interval_ms),
        ]
        .into_iter()
        .filter_map(|(tick, every_ms)| {
            spawn_timer(tx.clone(), Arc::clone(&self.clock), tick, every_ms)
        })
        .collect();

        let task = tokio::spawn(self.run(rx, timers));
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>, timers: Vec<JoinHandle<()>>) {
        let (latest_tx, latest_rx) = watch::channel(None);
        let writer = tokio::spawn(write_snapshots(Arc::clone(&self.store), latest_rx));
        let mut shutdown_reply = None;

        tracing::info!(session_start = %self.aggregator.session().start, "engine started");

        while let Some(command) = rx.recv().await {
            match command {
                Command::Event(event) => {
                    tracing::trace!(event = event.name(), "applying event");
                    self.aggregator.apply(&event);
                    self.broadcast(self.clock.now());
                }
                Command::Tick {
                    tick: Tick::Heartbeat,
                    at,
                } => {
                    self.broadcast(at);
                }
                Command::Tick {
                    tick: Tick::IdleCheck,
                    at,
                } => {
                    self.aggregator.idle_check(at);
                }
                Command::Tick {
                    tick: Tick::Persist,
                    at,
                } => {
                    let snapshot = self.aggregator.snapshot(at);
                    latest_tx.send_replace(Some(Arc::new(snapshot)));
                }
                Command::Snapshot { at, reply } => {
                    if reply.send(self.aggregator.snapshot(at)).is_err() {
                        tracing::debug!("snapshot requester went away");
                    }
                }
                Command::Export {
                    destination,
                    at,
                    reply,
                } => {
                    let snapshot = self.aggregator.snapshot(at);
                    let store = Arc::clone(&self.store);
                    tokio::spawn(async move {
                        if reply.send(export(store, snapshot, destination).await).is_err() {
                            tracing::debug!("export requester went away");
                        }
                    });
                }
                Command::Shutdown(reply) => {
                    shutdown_reply = Some(reply);
                    break;
                }
            }
        }

        for timer in &timers {
            timer.abort();
        }

        // The writer must finish before the final save so that save is last.
        drop(latest_tx);
        if let Err(e) = writer.await {
            tracing::warn!(error = %e, "snapshot writer task failed");
        }

        let snapshot = self.aggregator.snapshot(self.clock.now());
        match save(Arc::clone(&self.store), Arc::new(snapshot)).await {
            Ok(()) => tracing::info!("final snapshot saved"),
            Err(e) => tracing::warn!(error = %e, "failed to save final snapshot"),
        }

        tracing::info!("engine stopped");
        if let Some(reply) = shutdown_reply {
            if reply.send(()).is_err() {
                tracing::debug!("shutdown requester went away");
            }
        }
    }

    /// Flushes and pushes a snapshot to visible subscribers.
    fn broadcast(&mut self, now: DateTime<Utc>) -> Delivery {
        if self.hub.is_empty() {
            self.aggregator.heartbeat(now);
            return Delivery::default();
        }

        let message = Arc::new(UpdateMessage::Update(self.aggregator.snapshot(now)));
        let delivery = self.hub.broadcast(&message);
        if delivery.lagging > 0 {
            tracing::debug!(lagging = delivery.lagging, "some subscribers missed an update");
        }
        delivery
    }
}

fn spawn_timer(
    tx: mpsc::Sender<Command>,
    clock: Arc<dyn Clock>,
    tick: Tick,
    every_ms: u64,
) -> Option<JoinHandle<()>> {
    if every_ms == 0 {
        return None;
    }

    Some(tokio::spawn(async move {
        let period = Duration::from_millis(every_ms);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let at = clock.now();
            if tx.send(Command::Tick { tick, at }).await.is_err() {
                break;
            }
        }
    }))
}

async fn write_snapshots<S: SnapshotStore>(
    store: Arc<S>,
    mut latest: watch::Receiver<Option<Arc<Snapshot>>>,
) {
    while latest.changed().await.is_ok() {
        let Some(snapshot) = latest.borrow_and_update().clone() else {
            continue;
        };
        match save(Arc::clone(&store), snapshot).await {
            Ok(()) => tracing::debug!("snapshot saved"),
            Err(e) => {
                tracing::warn!(error = %e, "failed to save snapshot, will retry on next persist tick");
            }
        }
    }
}

async fn save<S: SnapshotStore>(store: Arc<S>, snapshot: Arc<Snapshot>) -> Result<(), BoxError> {
    match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(BoxError::from(e)),
        Err(e) => Err(BoxError::from(e)),
    }
}

async fn export<S: SnapshotStore>(
    store: Arc<S>,
    snapshot: Snapshot,
    destination: PathBuf,
) -> Result<(), EngineError> {
    let shown = destination.display().to_string();
    let result = tokio::task::spawn_blocking(move || store.export(&snapshot, &destination)).await;

    let source = match result {
        Ok(Ok(())) => {
            tracing::info!(destination = %shown, "snapshot exported");
            return Ok(());
        }
        Ok(Err(e)) => BoxError::from(e),
        Err(e) => BoxError::from(e),
    };
    Err(EngineError::Export {
        destination: shown,
        source,
    })
}
