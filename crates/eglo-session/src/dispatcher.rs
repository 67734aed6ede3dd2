//! Single-worker command dispatch for one device.
//!
//! Every operation on a device runs on its own worker thread, one at a time,
//! in submission order. Callers enqueue work through a [`DeviceHandle`] and
//! receive a [`Pending`] they may wait on or drop.
//!
//! ## Key Types
//!
//! - [`DeviceHandle`]: submits work and forwards connection events
//! - `DeviceCommand`: messages consumed by the worker
//! - [`Pending`]: reply slot for one submitted operation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use eglo_packet::{
    decode_notification, encode_light_command, Characteristic, DeviceAddress, LightCommand,
    MeshCredentials, Notification,
};
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::events::{EventSink, SessionEvent};
use crate::metrics::{device_labels, labels_with, metric_defs};
use crate::session::{SessionConfig, SessionManager};
use crate::state::{CommandState, CommandTracker};
use crate::transport::{ConnectionEvent, Transport};

type Reply<T> = Sender<Result<T>>;

// ============================================================================
// Device Commands (Handle → Worker)
// ============================================================================

/// Work items consumed by the device worker.
#[derive(Debug)]
pub(crate) enum DeviceCommand {
    /// Run the pairing handshake.
    Pair {
        /// Reply slot, absent for pairings triggered by connection events.
        reply: Option<Reply<()>>,
    },

    /// Encrypt and write one light command.
    Light {
        /// Command to send.
        command: LightCommand,
        /// Reply slot.
        reply: Reply<()>,
    },

    /// Read and decode the status notification.
    ReadStatus {
        /// Reply slot.
        reply: Reply<Notification>,
    },

    /// Move the device onto new mesh credentials.
    UpdateMesh {
        /// New name and password.
        credentials: MeshCredentials,
        /// New long-term key.
        long_term_key: Vec<u8>,
        /// Reply slot.
        reply: Reply<()>,
    },

    /// A connection event forwarded from the transport.
    Connection(ConnectionEvent),

    /// Stop the worker.
    Shutdown,
}

// ============================================================================
// Pending Reply
// ============================================================================

/// Reply to one submitted operation.
#[derive(Debug)]
pub struct Pending<T> {
    rx: Receiver<Result<T>>,
}

impl<T> Pending<T> {
    fn channel() -> (Reply<T>, Self) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (tx, Pending { rx })
    }

    fn ready(result: Result<T>) -> Self {
        let (tx, pending) = Self::channel();
        let _ = tx.send(result);
        pending
    }

    /// Block until the worker answers.
    ///
    /// Returns `WorkerStopped` if the worker exited before answering.
    pub fn wait(self) -> Result<T> {
        self.rx.recv().map_err(|_| SessionError::WorkerStopped)?
    }

    /// Block for at most `timeout`; `None` if no answer arrived yet.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(SessionError::WorkerStopped)),
        }
    }

    /// The answer if it already arrived.
    ///
    /// Returns `WorkerStopped` if the worker exited without answering.
    pub fn try_get(&self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(SessionError::WorkerStopped)),
        }
    }
}

// ============================================================================
// Device Worker
// ============================================================================

/// State owned by the worker thread.
struct DeviceWorker {
    session: SessionManager,
    tracker: Arc<CommandTracker>,
    sink: Arc<dyn EventSink>,
    mesh_id: u16,
    pair_queued: Arc<AtomicBool>,
}

impl DeviceWorker {
    /// Handle one command. Returns false when the worker should exit.
    fn handle_command(&mut self, cmd: DeviceCommand) -> bool {
        if self.tracker.is_cancelled() {
            return false;
        }

        match cmd {
            DeviceCommand::Pair { reply } => {
                self.pair_queued.store(false, Ordering::SeqCst);
                let result = self.session.pair();
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            DeviceCommand::Light { command, reply } => {
                let _ = reply.send(self.write_command(&command));
            }
            DeviceCommand::ReadStatus { reply } => {
                let _ = reply.send(self.read_status());
            }
            DeviceCommand::UpdateMesh {
                credentials,
                long_term_key,
                reply,
            } => {
                let _ = reply.send(self.session.update_mesh(credentials, &long_term_key));
            }
            DeviceCommand::Connection(event) => {
                debug!(device = %self.session.address(), ?event, "Connection event");
                self.pair_queued.store(false, Ordering::SeqCst);
                if event.is_ready() && !self.session.is_established() {
                    // Already logged and emitted; nobody waits on this pairing.
                    if let Err(err) = self.session.pair() {
                        debug!(
                            device = %self.session.address(),
                            error = %err,
                            "Connection pairing failed"
                        );
                    }
                }
            }
            DeviceCommand::Shutdown => {
                debug!(device = %self.session.address(), "Worker shutting down");
                return false;
            }
        }
        true
    }

    fn write_command(&mut self, command: &LightCommand) -> Result<()> {
        let address = *self.session.address();
        let opcode = command.opcode();

        let result = self.session.require_key().and_then(|key| {
            let seq = self.session.next_sequence();
            let frame = encode_light_command(&key, &address, seq, self.mesh_id, command)?;
            self.session
                .steps()
                .write("command", Characteristic::Command, &frame)
        });

        match &result {
            Ok(()) => {
                metrics::counter!(
                    metric_defs::COMMANDS_SENT.name,
                    &labels_with(&address, "opcode", format!("0x{opcode:02x}"))
                )
                .increment(1);
                debug!(device = %address, ?command, "Command sent");
                self.sink.emit(&address, SessionEvent::CommandSent { opcode });
            }
            Err(err) => {
                metrics::counter!(
                    metric_defs::COMMANDS_FAILED.name,
                    &labels_with(&address, "reason", err.reason())
                )
                .increment(1);
                warn!(device = %address, ?command, error = %err, "Command failed");
                self.sink.emit(
                    &address,
                    SessionEvent::CommandFailed {
                        opcode,
                        reason: err.reason(),
                    },
                );
                self.session.abort(err);
            }
        }
        result
    }

    fn read_status(&mut self) -> Result<Notification> {
        let address = *self.session.address();
        let result = self.session.require_key().and_then(|key| {
            let frame = self.session.steps().read("status", Characteristic::Status)?;
            Ok(decode_notification(&key, &address, &frame)?)
        });

        match &result {
            Ok(notification) => {
                metrics::counter!(metric_defs::STATUS_READS.name, &device_labels(&address))
                    .increment(1);
                self.sink.emit(
                    &address,
                    SessionEvent::StatusReceived {
                        src: notification.src,
                        payload: notification.payload.clone(),
                    },
                );
            }
            Err(err) => {
                warn!(device = %address, error = %err, "Status read failed");
                self.session.abort(err);
            }
        }
        result
    }
}

// ============================================================================
// Device Handle
// ============================================================================

/// Handle to a running device worker.
///
/// Dropping the handle cancels any blocked wait, wipes the key and joins the
/// worker.
pub struct DeviceHandle {
    address: DeviceAddress,
    cmd_tx: Sender<DeviceCommand>,
    tracker: Arc<CommandTracker>,
    sink: Arc<dyn EventSink>,
    pair_queued: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceHandle {
    /// Device address.
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Whether a session key is installed.
    pub fn is_established(&self) -> bool {
        self.tracker.has_key()
    }

    /// Current command state.
    pub fn command_state(&self) -> CommandState {
        self.tracker.state()
    }

    /// Tracker shared with the transport completions.
    pub fn tracker(&self) -> &Arc<CommandTracker> {
        &self.tracker
    }

    /// Forward a connection event from the transport.
    ///
    /// A disconnect wipes the key before returning, so no command frame is
    /// built for a dead link. It also fails the step in flight, and a pairing
    /// still running on the old link cannot install its key. A ready link
    /// enqueues one pairing.
    pub fn on_connection_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Disconnected => {
                if self.tracker.link_lost() {
                    let labels = device_labels(&self.address);
                    metrics::counter!(metric_defs::DISCONNECTS.name, &labels).increment(1);
                    self.sink.emit(&self.address, SessionEvent::Disconnected);
                }
                info!(device = %self.address, "Device disconnected");
            }
            event if event.is_ready() => {
                if !self.pair_queued.swap(true, Ordering::SeqCst) {
                    let _ = self.cmd_tx.send(DeviceCommand::Connection(event));
                }
            }
            event => {
                debug!(device = %self.address, ?event, "Waiting for services");
            }
        }
    }

    /// Run the pairing handshake.
    pub fn pair(&self) -> Pending<()> {
        let (reply, pending) = Pending::channel();
        self.submit(DeviceCommand::Pair { reply: Some(reply) }, pending)
    }

    /// Send a light command.
    pub fn send(&self, command: LightCommand) -> Pending<()> {
        let (reply, pending) = Pending::channel();
        self.submit(DeviceCommand::Light { command, reply }, pending)
    }

    /// Switch the light on.
    pub fn turn_on(&self) -> Pending<()> {
        self.send(LightCommand::Power(true))
    }

    /// Switch the light off.
    pub fn turn_off(&self) -> Pending<()> {
        self.send(LightCommand::Power(false))
    }

    /// Set an RGB color.
    pub fn set_color(&self, red: u8, green: u8, blue: u8) -> Pending<()> {
        self.send(LightCommand::Color { red, green, blue })
    }

    /// Set color brightness from a percentage.
    pub fn set_color_brightness(&self, percent: u8) -> Pending<()> {
        self.send(LightCommand::color_brightness_percent(percent))
    }

    /// Set white brightness from a percentage.
    pub fn set_white_brightness(&self, percent: u8) -> Pending<()> {
        self.send(LightCommand::white_brightness_percent(percent))
    }

    /// Set white temperature from a percentage.
    pub fn set_white_temperature(&self, percent: u8) -> Pending<()> {
        self.send(LightCommand::white_temperature_percent(percent))
    }

    /// Read the status notification.
    pub fn read_status(&self) -> Pending<Notification> {
        let (reply, pending) = Pending::channel();
        self.submit(DeviceCommand::ReadStatus { reply }, pending)
    }

    /// Move the device onto new mesh credentials.
    pub fn update_mesh(&self, credentials: MeshCredentials, long_term_key: &[u8]) -> Pending<()> {
        let (reply, pending) = Pending::channel();
        self.submit(
            DeviceCommand::UpdateMesh {
                credentials,
                long_term_key: long_term_key.to_vec(),
                reply,
            },
            pending,
        )
    }

    fn submit<T>(&self, cmd: DeviceCommand, pending: Pending<T>) -> Pending<T> {
        match self.cmd_tx.send(cmd) {
            Ok(()) => pending,
            Err(_) => Pending::ready(Err(SessionError::WorkerStopped)),
        }
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.tracker.cancel();
        let _ = self.cmd_tx.send(DeviceCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(device = %self.address, "Device worker panicked");
            }
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("address", &self.address)
            .field("established", &self.is_established())
            .field("state", &self.command_state())
            .finish()
    }
}

/// Spawn the worker for one device.
///
/// The worker starts without a session; pair explicitly or forward a ready
/// [`ConnectionEvent`] through [`DeviceHandle::on_connection_event`].
pub fn spawn_device_worker(
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
) -> Result<DeviceHandle> {
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    let tracker = Arc::new(CommandTracker::new());
    let pair_queued = Arc::new(AtomicBool::new(false));
    let address = config.address;

    let mut worker = DeviceWorker {
        session: SessionManager::new(
            &config,
            Arc::clone(&tracker),
            transport,
            Arc::clone(&sink),
        ),
        tracker: Arc::clone(&tracker),
        sink: Arc::clone(&sink),
        mesh_id: config.mesh_id,
        pair_queued: Arc::clone(&pair_queued),
    };

    let thread = thread::Builder::new()
        .name(format!("eglo-{address}"))
        .spawn(move || worker_main(&mut worker, cmd_rx))
        .map_err(|e| SessionError::Spawn(e.to_string()))?;

    Ok(DeviceHandle {
        address,
        cmd_tx,
        tracker,
        sink,
        pair_queued,
        thread: Some(thread),
    })
}

/// Blocks on the command channel until shutdown or until every handle is gone.
fn worker_main(worker: &mut DeviceWorker, cmd_rx: Receiver<DeviceCommand>) {
    while let Ok(cmd) = cmd_rx.recv() {
        if !worker.handle_command(cmd) {
            break;
        }
    }
}
