//! Connector runtime for managing the lifecycle of sink connectors.
//!
//! The `ConnectorRuntime` spawns each sink connector as a background tokio
//! task that pulls record batches from a generic record source, hands them
//! to `put()`, and calls `flush()` on every commit interval. It supports
//! pause, resume and stop control signals.
//!
//! Any error from `put()` or `flush()` is fatal: the task logs it, moves
//! the connector to `Failed` and exits without a final flush, so records
//! that were never acknowledged are not reported as committed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing;

use crate::config::{ConnectorConfig, ConnectorState};
use crate::error::{Result, SinkError};
use crate::traits::{SinkConnector, SinkRecord};

/// Control signals sent from the runtime to a running connector task.
#[derive(Debug)]
enum ControlSignal {
    Pause,
    Resume,
    Stop,
}

/// Handle to a running connector task.
struct ConnectorHandle {
    /// Tokio task handle for the connector loop.
    join_handle: JoinHandle<Result<()>>,
    /// Channel to send control signals.
    control_tx: mpsc::Sender<ControlSignal>,
    /// Current state, written by both the runtime and the task.
    state: Arc<watch::Sender<ConnectorState>>,
}

/// A factory function that produces batches of sink records.
///
/// The runtime calls this function repeatedly to obtain records for the sink.
/// `Some(vec![])` means no records are currently available; `None` means the
/// source is exhausted and the connector should commit and stop. An error is
/// logged and the poll retried after the backoff.
pub type RecordSourceFn = Box<
    dyn Fn() -> Pin<Box<dyn Future<Output = Result<Option<Vec<SinkRecord>>>> + Send>>
        + Send
        + Sync,
>;

/// Timing knobs for the connector loop.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Interval between commit barriers (`flush()` calls).
    pub commit_interval: Duration,
    /// Sleep when the source is idle, paused, or failed to poll.
    pub poll_backoff: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            commit_interval: Duration::from_secs(5),
            poll_backoff: Duration::from_millis(100),
        }
    }
}

/// Runtime that manages the lifecycle of connector instances.
///
/// # Example
///
/// ```ignore
/// use pubsub_sink::runtime::{ConnectorRuntime, RuntimeOptions};
///
/// let mut runtime = ConnectorRuntime::new();
/// runtime.start_sink(config, sink, record_source, RuntimeOptions::default()).await?;
/// runtime.pause("my-sink")?;
/// runtime.resume("my-sink")?;
/// runtime.stop("my-sink").await?;
/// ```
pub struct ConnectorRuntime {
    connectors: HashMap<String, ConnectorHandle>,
}

impl ConnectorRuntime {
    /// Create a new empty runtime.
    pub fn new() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    /// Start a sink connector as a background task.
    ///
    /// The connector is initialized via `start()`, then enters a loop that
    /// polls the record source, passes records to the sink via `put()`, and
    /// calls `flush()` every `options.commit_interval`.
    pub async fn start_sink(
        &mut self,
        config: ConnectorConfig,
        mut sink: Box<dyn SinkConnector>,
        record_source: RecordSourceFn,
        options: RuntimeOptions,
    ) -> Result<()> {
        let name = config.name.clone();

        if self.connectors.contains_key(&name) {
            return Err(SinkError::RuntimeError(format!(
                "connector '{}' is already running",
                name
            )));
        }

        sink.start().await?;

        let (control_tx, control_rx) = mpsc::channel::<ControlSignal>(16);
        let state = Arc::new(watch::Sender::new(ConnectorState::Running));

        let join_handle = tokio::spawn(run_sink(
            name.clone(),
            sink,
            record_source,
            options,
            control_rx,
            state.clone(),
        ));

        tracing::info!(connector = %name, class = %config.connector_class, "connector started");

        self.connectors.insert(
            name,
            ConnectorHandle {
                join_handle,
                control_tx,
                state,
            },
        );

        Ok(())
    }

    /// Send a pause signal to a running connector.
    pub fn pause(&mut self, name: &str) -> Result<()> {
        self.transition(name, ControlSignal::Pause, ConnectorState::Running, ConnectorState::Paused)
    }

    /// Send a resume signal to a paused connector.
    pub fn resume(&mut self, name: &str) -> Result<()> {
        self.transition(name, ControlSignal::Resume, ConnectorState::Paused, ConnectorState::Running)
    }

    fn transition(
        &mut self,
        name: &str,
        signal: ControlSignal,
        from: ConnectorState,
        to: ConnectorState,
    ) -> Result<()> {
        let handle = self
            .connectors
            .get_mut(name)
            .ok_or_else(|| SinkError::RuntimeError(format!("connector '{}' not found", name)))?;

        let current = *handle.state.borrow();
        if current != from {
            return Err(SinkError::RuntimeError(format!(
                "connector '{}' is not {} (state: {})",
                name,
                from.to_string().to_lowercase(),
                current
            )));
        }

        handle
            .control_tx
            .try_send(signal)
            .map_err(|e| SinkError::RuntimeError(format!("failed to send {:?}: {}", to, e)))?;

        handle.state.send_replace(to);
        Ok(())
    }

    /// Stop a connector and wait for its task to finish.
    ///
    /// Returns the task's outcome: the fatal error if the connector failed,
    /// or the error of its final flush.
    pub async fn stop(&mut self, name: &str) -> Result<()> {
        let handle = self
            .connectors
            .remove(name)
            .ok_or_else(|| SinkError::RuntimeError(format!("connector '{}' not found", name)))?;

        // The task may already have exited on its own.
        let _ = handle.control_tx.send(ControlSignal::Stop).await;
        let mut join_handle = handle.join_handle;
        join(name, &mut join_handle).await
    }

    /// Wait for a connector to finish on its own, without stopping it.
    ///
    /// Cancel-safe: if the returned future is dropped early the connector
    /// keeps running and stays registered.
    pub async fn wait(&mut self, name: &str) -> Result<()> {
        let handle = self
            .connectors
            .get_mut(name)
            .ok_or_else(|| SinkError::RuntimeError(format!("connector '{}' not found", name)))?;

        let result = join(name, &mut handle.join_handle).await;
        self.connectors.remove(name);
        result
    }

    /// Return the current state of a connector, or None if not found.
    pub fn state(&self, name: &str) -> Option<ConnectorState> {
        self.connectors.get(name).map(|h| *h.state.borrow())
    }

    /// Return the names of all managed connectors.
    pub fn connector_names(&self) -> Vec<&str> {
        self.connectors.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ConnectorRuntime {
    fn default() -> Self {
        Self::new()
    }
}

async fn join(name: &str, join_handle: &mut JoinHandle<Result<()>>) -> Result<()> {
    join_handle.await.map_err(|e| {
        SinkError::RuntimeError(format!("connector '{}' task panicked: {}", name, e))
    })?
}

/// Flush and stop the sink, recording the final state.
async fn shutdown(
    name: &str,
    sink: &mut Box<dyn SinkConnector>,
    state: &watch::Sender<ConnectorState>,
) -> Result<()> {
    let result = match sink.flush().await {
        Ok(()) => sink.stop().await,
        Err(e) => Err(e),
    };
    match &result {
        Ok(()) => {
            tracing::info!(connector = %name, "connector stopped");
            state.send_replace(ConnectorState::Stopped);
        }
        Err(e) => {
            tracing::error!(connector = %name, error = %e, "error stopping connector");
            state.send_replace(ConnectorState::Failed);
        }
    }
    result
}

/// One pending poll of the record source, kept across loop turns.
type SourcePoll<'a> = Pin<Box<dyn Future<Output = Result<Option<Vec<SinkRecord>>>> + Send + 'a>>;

/// What woke the connector loop.
enum Event {
    Control(Option<ControlSignal>),
    Commit,
    Polled(Result<Option<Vec<SinkRecord>>>),
}

/// Poll the source, after `delay` when the previous poll came back idle.
fn poll_source(record_source: &RecordSourceFn, delay: Option<Duration>) -> SourcePoll<'_> {
    match delay {
        None => record_source(),
        Some(delay) => Box::pin(async move {
            tokio::time::sleep(delay).await;
            record_source().await
        }),
    }
}

/// Connector loop.
///
/// Control signals and commit ticks are served while a source poll is
/// pending, so an idle source never holds up `stop()` or a commit. A pending
/// poll survives commit ticks and is only dropped on shutdown.
async fn run_sink(
    name: String,
    mut sink: Box<dyn SinkConnector>,
    record_source: RecordSourceFn,
    options: RuntimeOptions,
    mut control_rx: mpsc::Receiver<ControlSignal>,
    state: Arc<watch::Sender<ConnectorState>>,
) -> Result<()> {
    let mut paused = false;
    let mut commit = tokio::time::interval_at(
        Instant::now() + options.commit_interval,
        options.commit_interval,
    );
    commit.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut pending: Option<SourcePoll<'_>> = None;
    let mut backoff: Option<Duration> = None;

    loop {
        let event = if paused {
            tokio::select! {
                biased;
                signal = control_rx.recv() => Event::Control(signal),
                _ = commit.tick() => Event::Commit,
            }
        } else {
            let poll = pending.get_or_insert_with(|| poll_source(&record_source, backoff.take()));
            tokio::select! {
                biased;
                signal = control_rx.recv() => Event::Control(signal),
                _ = commit.tick() => Event::Commit,
                outcome = poll => Event::Polled(outcome),
            }
        };

        match event {
            Event::Control(Some(ControlSignal::Stop)) => {
                tracing::info!(connector = %name, "stopping connector");
                return shutdown(&name, &mut sink, &state).await;
            }
            Event::Control(Some(ControlSignal::Pause)) => {
                tracing::info!(connector = %name, "pausing connector");
                paused = true;
            }
            Event::Control(Some(ControlSignal::Resume)) => {
                tracing::info!(connector = %name, "resuming connector");
                paused = false;
            }
            Event::Control(None) => {
                tracing::warn!(connector = %name, "control channel closed, stopping");
                return shutdown(&name, &mut sink, &state).await;
            }
            Event::Commit => {
                if let Err(e) = sink.flush().await {
                    tracing::error!(connector = %name, error = %e, "commit failed, connector halted");
                    state.send_replace(ConnectorState::Failed);
                    return Err(e);
                }
                tracing::debug!(connector = %name, "committed");
            }
            Event::Polled(outcome) => {
                pending = None;
                match outcome {
                    Ok(None) => {
                        tracing::info!(connector = %name, "record source exhausted");
                        return shutdown(&name, &mut sink, &state).await;
                    }
                    Ok(Some(records)) if records.is_empty() => {
                        backoff = Some(options.poll_backoff);
                    }
                    Ok(Some(records)) => {
                        if let Err(e) = sink.put(&records).await {
                            tracing::error!(
                                connector = %name,
                                records = records.len(),
                                error = %e,
                                "error putting records to sink, connector halted"
                            );
                            state.send_replace(ConnectorState::Failed);
                            return Err(e);
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            connector = %name,
                            error = %e,
                            "error polling record source"
                        );
                        backoff = Some(options.poll_backoff);
                    }
                }
            }
        }
    }
}
