//! Acquisition loop
//!
//! Owns the transport for a session. A background task polls the transport,
//! reassembles lines, extracts readings and appends them to the ledger,
//! writing a checkpoint after every accepted reading.
//!
//! State machine: `Disconnected -> Connecting -> Connected -> Disconnected`,
//! passing through `Faulted` when the stream ends or errors. There is no
//! automatic reconnect.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointStore, SessionState};
use crate::config::LoggerConfig;
use crate::export::{self, ExportError};
use crate::extract::extract;
use crate::frame::{FrameReassembler, DEFAULT_MAX_FRAME_BYTES};
use crate::ledger::{EditableField, Ledger, Measurement, MeasurementKey};
use crate::transport::{
    self, ReadOutcome, Transport, TransportConfig, TransportError, TransportKind, DEFAULT_POLL_MS,
};

/// Capacity of the accepted-measurement broadcast
const MEASUREMENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the status transition broadcast
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No transport open
    Disconnected,
    /// Transport being opened
    Connecting,
    /// Reading from the balance
    Connected,
    /// Stream lost; resolves to `Disconnected` immediately
    Faulted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Presentation hint for a status message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusTone {
    /// Informational
    Neutral,
    /// Operation succeeded
    Success,
    /// Something went wrong
    Error,
}

/// What observers see of the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Connection state
    pub state: ConnectionState,
    /// Active transport, if any
    pub transport: Option<TransportKind>,
    /// Operator-facing message
    pub message: String,
    /// How the message should be shown
    pub tone: StatusTone,
}

impl StatusReport {
    fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            transport: None,
            message: "Not connected".to_string(),
            tone: StatusTone::Neutral,
        }
    }
}

/// Loop tuning taken from the logger configuration
#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    /// Read timeout per poll; bounds disconnect latency
    pub poll_interval: Duration,
    /// Cap on buffered bytes without a line delimiter
    pub max_frame_bytes: usize,
    /// Initial operator label, stamped on readings ahead of the last known one
    pub device_label: Option<String>,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            device_label: None,
        }
    }
}

impl From<&LoggerConfig> for AcquisitionSettings {
    fn from(config: &LoggerConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_frame_bytes: config.max_frame_bytes,
            device_label: config.device_label.clone().filter(|l| !l.is_empty()),
        }
    }
}

/// State shared between the control side and the read task
struct Shared {
    ledger: Mutex<Ledger>,
    /// Operator-selected label, read for every accepted reading
    device_label: Mutex<Option<String>>,
    checkpoint: CheckpointStore,
    status: watch::Sender<StatusReport>,
    /// Every status change in order; the watch only keeps the latest
    transitions: broadcast::Sender<StatusReport>,
    measurements: broadcast::Sender<Measurement>,
}

impl Shared {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        // A panic while holding the lock cannot leave the ledger half-written
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn device_label(&self) -> Option<String> {
        self.device_label
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Persist while the ledger lock is held so saves are ordered with mutations
    fn save(&self, ledger: &Ledger) {
        if let Err(e) = self.checkpoint.save(&ledger.to_state()) {
            warn!("checkpoint write failed, continuing: {e}");
        }
    }

    fn publish(
        &self,
        state: ConnectionState,
        transport: Option<TransportKind>,
        message: impl Into<String>,
        tone: StatusTone,
    ) {
        let report = StatusReport {
            state,
            transport,
            message: message.into(),
            tone,
        };
        debug!(state = %report.state, message = %report.message, "status");
        let _ = self.transitions.send(report.clone());
        self.status.send_replace(report);
    }

    fn accept_line(&self, line: &str) -> Option<Measurement> {
        let reading = extract(line)?;
        let device_label = self.device_label();
        let measurement = {
            let mut ledger = self.ledger();
            let measurement = ledger.append(reading.weight, reading.unit, device_label.as_deref());
            self.save(&ledger);
            measurement
        };
        debug!(
            sample_id = measurement.sample_id,
            weight = measurement.weight,
            unit = %measurement.unit,
            "reading accepted"
        );
        // Nobody listening is fine
        let _ = self.measurements.send(measurement.clone());
        Some(measurement)
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Faulted (token cancelled by the task) or ended without cleanup
    fn stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.handle.is_finished()
    }
}

/// A scale acquisition session
pub struct Acquisition {
    shared: Arc<Shared>,
    settings: AcquisitionSettings,
    worker: Option<Worker>,
}

impl Acquisition {
    /// Create an idle session with an empty ledger
    pub fn new(checkpoint: CheckpointStore, settings: AcquisitionSettings) -> Self {
        let (status, _) = watch::channel(StatusReport::disconnected());
        let (transitions, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let (measurements, _) = broadcast::channel(MEASUREMENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                ledger: Mutex::new(Ledger::new()),
                device_label: Mutex::new(settings.device_label.clone().filter(|l| !l.is_empty())),
                checkpoint,
                status,
                transitions,
                measurements,
            }),
            settings,
            worker: None,
        }
    }

    /// Create a session from a logger configuration
    pub fn from_config(config: &LoggerConfig) -> Self {
        Self::new(
            CheckpointStore::new(config.checkpoint_path.clone()),
            AcquisitionSettings::from(config),
        )
    }

    /// Open the transport and start reading.
    ///
    /// Open failures are returned here and leave the session disconnected.
    pub async fn connect(&mut self, config: &TransportConfig) -> Result<(), TransportError> {
        self.reap_finished().await;
        if self.worker.is_some() {
            return Err(TransportError::AlreadyConnected);
        }

        let kind = config.kind();
        self.shared.publish(
            ConnectionState::Connecting,
            Some(kind),
            "Connecting...",
            StatusTone::Neutral,
        );

        match transport::open(config).await {
            Ok(transport) => {
                self.start(transport);
                Ok(())
            }
            Err(e) => {
                warn!(transport = %kind, "connect failed: {e}");
                self.shared.publish(
                    ConnectionState::Disconnected,
                    None,
                    format!("Error: {e}"),
                    StatusTone::Error,
                );
                Err(e)
            }
        }
    }

    /// Start reading from an already open transport
    pub async fn connect_with(&mut self, transport: Box<dyn Transport>) -> Result<(), TransportError> {
        self.reap_finished().await;
        if self.worker.is_some() {
            return Err(TransportError::AlreadyConnected);
        }
        self.start(transport);
        Ok(())
    }

    fn start(&mut self, transport: Box<dyn Transport>) {
        let kind = transport.kind();
        let endpoint = transport.describe();
        info!(transport = %kind, %endpoint, "connected");

        let message = match kind {
            TransportKind::Tcp => "Connected (Ethernet)".to_string(),
            TransportKind::Serial => "Connected".to_string(),
            TransportKind::Demo => "Connected (demo)".to_string(),
        };
        self.shared
            .publish(ConnectionState::Connected, Some(kind), message, StatusTone::Success);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(read_loop(
            Arc::clone(&self.shared),
            transport,
            self.settings.clone(),
            cancel.clone(),
        ));
        self.worker = Some(Worker { cancel, handle });
    }

    /// Join a read task that already stopped on its own (after a fault)
    async fn reap_finished(&mut self) {
        if !self.worker.as_ref().is_some_and(Worker::stopped) {
            return;
        }
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.handle.await {
                // A panicked task never got to report the fault itself
                warn!("read task ended abnormally: {e}");
                self.shared.publish(
                    ConnectionState::Disconnected,
                    None,
                    "Connection Lost",
                    StatusTone::Error,
                );
            }
        }
    }

    /// Stop reading and close the transport. Safe to call when not connected.
    pub async fn disconnect(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let already_stopped = worker.cancel.is_cancelled();
        worker.cancel.cancel();
        if let Err(e) = worker.handle.await {
            warn!("read task ended abnormally: {e}");
        }
        // A faulted loop already reported why it stopped
        if !already_stopped {
            info!("disconnected");
            self.shared.publish(
                ConnectionState::Disconnected,
                None,
                "Not connected",
                StatusTone::Neutral,
            );
        }
    }

    /// Whether the read task is running
    pub fn is_connected(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.stopped())
    }

    /// Current status
    pub fn status(&self) -> StatusReport {
        self.shared.status.borrow().clone()
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<StatusReport> {
        self.shared.status.subscribe()
    }

    /// Receive every status change from now on, including the transient
    /// `Faulted` state a watch receiver may never observe
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StatusReport> {
        self.shared.transitions.subscribe()
    }

    /// Receive every measurement accepted from now on
    pub fn subscribe_measurements(&self) -> broadcast::Receiver<Measurement> {
        self.shared.measurements.subscribe()
    }

    /// Ledger rows in insertion order
    pub fn snapshot(&self) -> Vec<Measurement> {
        self.shared.ledger().snapshot()
    }

    /// Most recent measurement
    pub fn latest(&self) -> Option<Measurement> {
        self.shared.ledger().latest().cloned()
    }

    /// Next sample id to be assigned
    pub fn cursor(&self) -> u64 {
        self.shared.ledger().cursor()
    }

    /// Label stamped on the most recent reading
    pub fn last_device_label(&self) -> String {
        self.shared.ledger().last_device_label().to_string()
    }

    /// Operator-selected device label for subsequent readings, including
    /// those from an already running session
    pub fn set_device_label(&self, label: Option<String>) {
        let label = label.filter(|l| !l.is_empty());
        debug!(label = ?label, "device label set");
        *self
            .shared
            .device_label
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = label;
    }

    /// Accept a line as if it had arrived from the transport
    pub fn ingest_line(&self, line: &str) -> Option<Measurement> {
        self.shared.accept_line(line)
    }

    /// Edit a measurement's name or comment and checkpoint the change.
    /// Unknown keys are ignored.
    pub fn update(&self, key: MeasurementKey, field: EditableField, value: &str) -> bool {
        let mut ledger = self.shared.ledger();
        let applied = ledger.update(key, field, value);
        if applied {
            self.shared.save(&ledger);
        } else {
            debug!(%key, "update for unknown measurement ignored");
        }
        applied
    }

    /// Clear every measurement, restart numbering and drop the checkpoint
    pub fn reset(&self) {
        let mut ledger = self.shared.ledger();
        ledger.clear();
        if let Err(e) = self.shared.checkpoint.delete() {
            warn!("failed to delete checkpoint: {e}");
        }
        info!("ledger reset");
    }

    /// Checkpoint left behind by a previous run, if any
    pub fn pending_recovery(&self) -> Option<SessionState> {
        self.shared.checkpoint.load()
    }

    /// Replace the ledger with the checkpoint, keeping the file.
    /// Returns false when there is nothing to restore.
    pub fn restore(&self) -> bool {
        let Some(state) = self.shared.checkpoint.load() else {
            return false;
        };
        let rows = state.data.len();
        *self.shared.ledger() = Ledger::from_state(state);
        info!(rows, "session restored from checkpoint");
        let current = self.status();
        self.shared.publish(
            current.state,
            current.transport,
            "Session restored from crash recovery.",
            StatusTone::Success,
        );
        true
    }

    /// Delete the checkpoint without restoring it
    pub fn discard(&self) {
        if let Err(e) = self.shared.checkpoint.delete() {
            warn!("failed to delete checkpoint: {e}");
        }
    }

    /// Append the ledger to a CSV file
    pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<usize, ExportError> {
        let rows = self.snapshot();
        let count = export::append_csv(path.as_ref(), &rows)?;
        info!(rows = count, path = %path.as_ref().display(), "ledger exported");
        Ok(count)
    }

    /// Checkpoint file backing this session
    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.shared.checkpoint
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        if let Some(worker) = &self.worker {
            worker.cancel.cancel();
        }
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut transport: Box<dyn Transport>,
    settings: AcquisitionSettings,
    cancel: CancellationToken,
) {
    let kind = transport.kind();
    let mut frames = FrameReassembler::new(settings.max_frame_bytes);

    let fault = loop {
        if cancel.is_cancelled() {
            break None;
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break None,
            outcome = transport.read_available(settings.poll_interval) => outcome,
        };

        match outcome {
            Ok(ReadOutcome::Data(bytes)) => {
                if bytes.is_empty() {
                    continue;
                }
                let out = frames.push(&bytes);
                if let Some(discarded) = out.discarded {
                    shared.publish(
                        ConnectionState::Connected,
                        Some(kind),
                        format!("Discarded {discarded} bytes without a line break"),
                        StatusTone::Error,
                    );
                }
                for line in out.lines {
                    shared.accept_line(&line);
                }
            }
            Ok(ReadOutcome::Eof) => break Some("stream closed by device".to_string()),
            Err(e) => break Some(e.to_string()),
        }
    };

    transport.close().await;

    if let Some(reason) = fault {
        // Marks the session stopped before observers see the fault
        cancel.cancel();
        warn!(transport = %kind, "connection lost: {reason}");
        shared.publish(
            ConnectionState::Faulted,
            Some(kind),
            "Connection Lost",
            StatusTone::Error,
        );
        shared.publish(
            ConnectionState::Disconnected,
            None,
            "Connection Lost",
            StatusTone::Error,
        );
    } else {
        debug!(transport = %kind, "read loop stopped");
    }
}
