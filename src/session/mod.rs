//! Session controller: transport → assembler → store.
//!
//! One session records one insole side into one file:
//!
//! ```text
//! Transport ──TransportEvent (bounded)──▶ decode loop ──Vec<Sample> (bounded)──▶ store writer
//!                                          (async)                               (blocking)
//! ```
//!
//! The decode loop is the only caller of the assembler. It ends on the
//! configured duration (counted from subscription), on cancellation, on end
//! of stream or on disconnection. Every exit path runs the same close
//! sequence: unsubscribe, report trailing bytes, close the writer queue, wait
//! for the store to flush and close.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{AppResult, DaqError};
use crate::protocol::{Clock, Sample, StreamAssembler, SyncEvent, SystemClock};
use crate::storage::{TimeSeriesStore, FILE_EXTENSION};
use crate::transport::{Transport, TransportEvent};

mod shutdown;
mod state;
mod writer;

pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
pub use state::SessionState;

use writer::{spawn_store_writer, WriterOutcome};

/// Timestamp format used in session file names.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Which insole is being recorded.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Left foot.
    Left,
    /// Right foot.
    #[default]
    Right,
}

impl Side {
    /// Tag used in file names.
    pub fn tag(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    /// Dataset name inside the session file.
    pub fn dataset_name(&self) -> &'static str {
        match self {
            Side::Left => "sensor_left",
            Side::Right => "sensor_right",
        }
    }

    /// Sensor-cell position table for this side, used by visualization
    /// tools. The logger only names it in the session report.
    pub fn calibration_resource(&self) -> PathBuf {
        PathBuf::from(format!("config/foil_sensor_positions_{}.csv", self.tag()))
    }

    /// `<side>_<YYYY-MM-DD-HH-MM-SS>.h5`
    pub fn file_name(&self, started: DateTime<Local>) -> String {
        format!(
            "{}_{}.{FILE_EXTENSION}",
            self.tag(),
            started.format(FILE_TIMESTAMP_FORMAT),
        )
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Everything a session needs to run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Device to subscribe to.
    pub endpoint: String,
    /// Insole side being recorded.
    pub side: Side,
    /// Recording time after subscription; `None` runs until the stream ends
    /// or the session is cancelled.
    pub duration: Option<Duration>,
    /// Samples per flush.
    pub batch_rows: usize,
    /// Capacity of the transport and writer queues.
    pub queue_capacity: usize,
    /// Directory for generated file names.
    pub output_dir: PathBuf,
    /// Exact output file; overrides the generated name when set.
    pub output_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "FootSole-C3".into(),
            side: Side::Right,
            duration: Some(Duration::from_secs(60)),
            batch_rows: 1,
            queue_capacity: 256,
            output_dir: PathBuf::from("."),
            output_path: None,
        }
    }
}

impl SessionConfig {
    /// File this session writes when started at `started`.
    pub fn resolve_output_path(&self, started: DateTime<Local>) -> PathBuf {
        match &self.output_path {
            Some(path) => path.clone(),
            None => self.output_dir.join(self.side.file_name(started)),
        }
    }

    fn validate(&self) -> AppResult<()> {
        if self.batch_rows == 0 {
            return Err(DaqError::Configuration("batch_rows must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(DaqError::Configuration(
                "queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The configured duration elapsed.
    DurationElapsed,
    /// Cancelled through the [`ShutdownTrigger`].
    Cancelled,
    /// The source ran out of data.
    EndOfStream,
    /// The link was lost.
    Disconnected {
        /// Cause reported by the transport.
        reason: String,
    },
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::DurationElapsed => f.write_str("duration elapsed"),
            EndReason::Cancelled => f.write_str("cancelled"),
            EndReason::EndOfStream => f.write_str("end of stream"),
            EndReason::Disconnected { reason } => write!(f, "disconnected ({reason})"),
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    /// File written.
    pub path: PathBuf,
    /// Dataset written.
    pub dataset: String,
    /// Sensor-position table matching the recorded side.
    pub calibration: PathBuf,
    /// Why the session stopped.
    pub end_reason: EndReason,
    /// Samples persisted by this session.
    pub samples_written: u64,
    /// Rows in the dataset afterwards, including earlier sessions.
    pub rows_total: usize,
    /// Bytes received from the transport.
    pub bytes_received: u64,
    /// Bytes dropped while resynchronizing.
    pub bytes_discarded: u64,
    /// Number of resync runs.
    pub resync_events: u64,
    /// Partial-frame bytes dropped at the end.
    pub trailing_discarded: usize,
    /// Store flushes.
    pub flushes: u64,
}

impl SessionReport {
    /// `Err` when the session ended because the link was lost, so callers
    /// can print the report and still fail.
    pub fn ensure_clean(&self) -> AppResult<()> {
        match &self.end_reason {
            EndReason::Disconnected { reason } => {
                Err(DaqError::TransportDisconnected(reason.clone()))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "file:        {}", self.path.display())?;
        writeln!(f, "dataset:     {} ({} rows total)", self.dataset, self.rows_total)?;
        writeln!(f, "positions:   {}", self.calibration.display())?;
        writeln!(f, "ended:       {}", self.end_reason)?;
        writeln!(f, "samples:     {}", self.samples_written)?;
        writeln!(
            f,
            "bytes:       {} received, {} discarded in {} resyncs, {} trailing",
            self.bytes_received, self.bytes_discarded, self.resync_events, self.trailing_discarded
        )?;
        write!(f, "flushes:     {}", self.flushes)
    }
}

/// Counters the decode loop keeps beside the assembler's own.
#[derive(Debug, Default)]
struct SyncTally {
    resync_events: u64,
    trailing_discarded: usize,
}

impl SyncTally {
    fn record(&mut self, events: Vec<SyncEvent>) {
        for event in events {
            match &event {
                SyncEvent::Resync {
                    discarded,
                    cause,
                    head_hex,
                } => {
                    self.resync_events += 1;
                    warn!(discarded, cause = cause.kind(), "{event}");
                    debug!(head = %head_hex, "Buffer head when sync was lost");
                }
                SyncEvent::TrailingUnconsumedBytes { len } => {
                    self.trailing_discarded += len;
                    warn!(len, "{event}");
                }
            }
        }
    }
}

enum LoopExit {
    Ended(EndReason),
    WriterGone,
}

/// Runs one recording session.
pub struct SessionController {
    config: SessionConfig,
    state: watch::Sender<SessionState>,
}

impl SessionController {
    /// Controller in the `Idle` state.
    pub fn new(config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self { config, state }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Follow state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn transition(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else if current.can_transition_to(next) {
                debug!(from = %current, to = %next, "Session state");
                *current = next;
                true
            } else {
                warn!(from = %current, to = %next, "Ignoring illegal session transition");
                false
            }
        });
    }

    /// Run with wall-clock timestamps.
    pub async fn run<T: Transport>(
        &self,
        transport: T,
        shutdown: ShutdownSignal,
    ) -> AppResult<SessionReport> {
        self.run_with_clock(transport, shutdown, SystemClock::new())
            .await
    }

    /// Run with timestamps from `clock`, creating or reopening the session
    /// file named by the configuration.
    #[instrument(
        name = "session",
        skip_all,
        fields(endpoint = %self.config.endpoint, side = %self.config.side)
    )]
    pub async fn run_with_clock<T: Transport, C: Clock>(
        &self,
        transport: T,
        shutdown: ShutdownSignal,
        clock: C,
    ) -> AppResult<SessionReport> {
        self.config.validate()?;
        let path = self.config.resolve_output_path(Local::now());
        let dataset = self.config.side.dataset_name();

        let store = match open_store(&self.config, &path, dataset).await {
            Ok(store) => store,
            Err(err) => {
                error!(path = %path.display(), error = %err, "Cannot open session store");
                self.transition(SessionState::Closing);
                self.transition(SessionState::Closed);
                return Err(err);
            }
        };
        self.drive(transport, shutdown, clock, store).await
    }

    /// Run into an already open store, for callers that own the storage
    /// side (custom backends, shared files).
    #[instrument(
        name = "session",
        skip_all,
        fields(endpoint = %self.config.endpoint, side = %self.config.side)
    )]
    pub async fn run_with_store<T: Transport, C: Clock>(
        &self,
        transport: T,
        shutdown: ShutdownSignal,
        clock: C,
        store: TimeSeriesStore,
    ) -> AppResult<SessionReport> {
        if let Err(err) = self.config.validate() {
            self.transition(SessionState::Closing);
            self.transition(SessionState::Closed);
            return Err(err);
        }
        self.drive(transport, shutdown, clock, store).await
    }

    async fn drive<T: Transport, C: Clock>(
        &self,
        mut transport: T,
        mut shutdown: ShutdownSignal,
        clock: C,
        store: TimeSeriesStore,
    ) -> AppResult<SessionReport> {
        let config = &self.config;
        let path = store.path().to_path_buf();
        let dataset = store.dataset().to_owned();
        info!(path = %path.display(), dataset = %dataset, "Session store ready");
        let (samples_tx, writer) = spawn_store_writer(store, config.queue_capacity);
        let mut assembler = StreamAssembler::with_clock(clock);
        let mut tally = SyncTally::default();

        let exit = if shutdown.is_triggered() {
            info!("Cancelled before subscribing");
            LoopExit::Ended(EndReason::Cancelled)
        } else if config.duration == Some(Duration::ZERO) {
            info!("Zero duration, not subscribing");
            LoopExit::Ended(EndReason::DurationElapsed)
        } else {
            let (events_tx, mut events_rx) = mpsc::channel(config.queue_capacity);
            if let Err(err) = transport.subscribe(&config.endpoint, events_tx).await {
                error!(transport = %transport.describe(), error = %err, "Subscription failed");
                self.transition(SessionState::Closing);
                drop(samples_tx);
                if let Ok(WriterOutcome {
                    result: Err(close_err),
                    ..
                }) = finish_writer(writer).await
                {
                    warn!(path = %path.display(), error = %close_err, "Store close failed after subscription failure");
                }
                self.transition(SessionState::Closed);
                return Err(err);
            }
            self.transition(SessionState::Connected);
            info!(transport = %transport.describe(), duration = ?config.duration, "Subscribed");

            let deadline = config.duration.map(|d| Instant::now() + d);
            let exit = self
                .decode_loop(
                    &mut events_rx,
                    &mut assembler,
                    &mut tally,
                    &samples_tx,
                    &mut shutdown,
                    deadline,
                )
                .await;

            self.transition(SessionState::Closing);
            if let Err(err) = transport.unsubscribe().await {
                warn!(error = %err, "Unsubscribe failed");
            }
            exit
        };
        self.transition(SessionState::Closing);

        assembler.finish();
        tally.record(assembler.drain_events());

        drop(samples_tx);
        let outcome = finish_writer(writer).await;
        self.transition(SessionState::Closed);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(path = %path.display(), error = %err, "Session aborted");
                return Err(err);
            }
        };
        if let Err(err) = outcome.result {
            error!(path = %path.display(), error = %err, "Session aborted");
            return Err(err);
        }
        let end_reason = match exit {
            LoopExit::Ended(reason) => reason,
            LoopExit::WriterGone => {
                // The writer reported success yet stopped taking samples.
                error!(path = %path.display(), "Store writer stopped early");
                return Err(DaqError::WriterStopped);
            }
        };

        let report = SessionReport {
            path,
            dataset,
            calibration: config.side.calibration_resource(),
            end_reason,
            samples_written: outcome.stats.samples_appended,
            rows_total: outcome.stats.rows_on_disk,
            bytes_received: assembler.bytes_received(),
            bytes_discarded: assembler.bytes_discarded(),
            resync_events: tally.resync_events,
            trailing_discarded: tally.trailing_discarded,
            flushes: outcome.stats.flush_count,
        };
        match &report.end_reason {
            EndReason::Disconnected { reason } => {
                warn!(reason = %reason, samples = report.samples_written, "Session ended by disconnection")
            }
            reason => info!(%reason, samples = report.samples_written, "Session finished"),
        }
        Ok(report)
    }

    async fn decode_loop<C: Clock>(
        &self,
        events: &mut mpsc::Receiver<TransportEvent>,
        assembler: &mut StreamAssembler<C>,
        tally: &mut SyncTally,
        samples_tx: &mpsc::Sender<Vec<Sample>>,
        shutdown: &mut ShutdownSignal,
        deadline: Option<Instant>,
    ) -> LoopExit {
        let expiry = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    info!("Cancellation requested");
                    return LoopExit::Ended(EndReason::Cancelled);
                }
                _ = &mut expiry => {
                    return LoopExit::Ended(EndReason::DurationElapsed);
                }
                _ = samples_tx.closed() => {
                    return LoopExit::WriterGone;
                }
                event = events.recv() => match event {
                    Some(TransportEvent::Chunk(bytes)) => {
                        if self.state() == SessionState::Connected {
                            self.transition(SessionState::Logging);
                        }
                        let samples = assembler.ingest(&bytes);
                        tally.record(assembler.drain_events());
                        if samples.is_empty() {
                            continue;
                        }
                        if samples_tx.send(samples).await.is_err() {
                            return LoopExit::WriterGone;
                        }
                    }
                    Some(TransportEvent::EndOfStream) => {
                        return LoopExit::Ended(EndReason::EndOfStream);
                    }
                    Some(TransportEvent::Disconnected { reason }) => {
                        return LoopExit::Ended(EndReason::Disconnected { reason });
                    }
                    None => {
                        return LoopExit::Ended(EndReason::Disconnected {
                            reason: "transport stopped delivering".into(),
                        });
                    }
                },
            }
        }
    }
}

async fn open_store(
    config: &SessionConfig,
    path: &Path,
    dataset: &str,
) -> AppResult<TimeSeriesStore> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DaqError::store_io("create directory", dir, e))?;
    }
    let path = path.to_path_buf();
    let dataset = dataset.to_owned();
    let batch_rows = config.batch_rows;
    tokio::task::spawn_blocking(move || TimeSeriesStore::open_with(&path, &dataset, batch_rows))
    .await
    .map_err(|_| DaqError::WriterStopped)?
}

async fn finish_writer(
    writer: tokio::task::JoinHandle<WriterOutcome>,
) -> AppResult<WriterOutcome> {
    writer.await.map_err(|e| {
        error!(error = %e, "Store writer panicked");
        DaqError::WriterStopped
    })
}
