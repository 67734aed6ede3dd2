//! Structured session events.
//!
//! The engine reports every observable transition to an [`EventSink`]
//! supplied by the host. [`TracingSink`] forwards events to `tracing`;
//! [`MemorySink`] keeps them for inspection in tests.

use eglo_packet::DeviceAddress;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::session::PairingOutcome;

/// Something that happened on a device session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A pairing handshake started.
    PairingStarted,
    /// A pairing handshake reached a terminal outcome.
    PairingFinished {
        /// How the handshake ended.
        outcome: PairingOutcome,
    },
    /// The session key was dropped because the link went away.
    Disconnected,
    /// A command frame was acknowledged by the transport.
    CommandSent {
        /// Opcode of the command.
        opcode: u8,
    },
    /// A command could not be delivered.
    CommandFailed {
        /// Opcode of the command.
        opcode: u8,
        /// Short failure label.
        reason: &'static str,
    },
    /// A status notification was decoded.
    StatusReceived {
        /// Mesh address of the reporting light.
        src: u16,
        /// Decrypted notification payload.
        payload: Vec<u8>,
    },
    /// The device accepted new mesh credentials.
    MeshUpdated {
        /// New mesh name.
        name: String,
    },
}

impl SessionEvent {
    /// Stable event name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::PairingStarted => "pairing_started",
            SessionEvent::PairingFinished { .. } => "pairing_finished",
            SessionEvent::Disconnected => "disconnected",
            SessionEvent::CommandSent { .. } => "command_sent",
            SessionEvent::CommandFailed { .. } => "command_failed",
            SessionEvent::StatusReceived { .. } => "status_received",
            SessionEvent::MeshUpdated { .. } => "mesh_updated",
        }
    }
}

/// Receiver of session events. Called from the worker and transport threads.
pub trait EventSink: Send + Sync {
    /// Handle one event for a device.
    fn emit(&self, device: &DeviceAddress, event: SessionEvent);
}

/// Sink that logs each event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, device: &DeviceAddress, event: SessionEvent) {
        let device = device.to_string();
        match &event {
            SessionEvent::PairingFinished { outcome }
                if *outcome != PairingOutcome::Established =>
            {
                warn!(
                    device = %device,
                    event = event.name(),
                    outcome = ?outcome,
                    "Pairing failed"
                );
            }
            SessionEvent::CommandFailed { opcode, reason } => {
                warn!(
                    device = %device,
                    event = event.name(),
                    opcode = %format!("0x{opcode:02x}"),
                    reason = *reason,
                    "Command failed"
                );
            }
            SessionEvent::StatusReceived { src, payload } => {
                info!(
                    device = %device,
                    event = event.name(),
                    src = *src,
                    payload = %hex::encode(payload),
                    "Status received"
                );
            }
            _ => {
                info!(device = %device, event = event.name(), detail = ?event, "Session event");
            }
        }
    }
}

/// Sink that records events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<(DeviceAddress, SessionEvent)>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded event.
    pub fn events(&self) -> Vec<(DeviceAddress, SessionEvent)> {
        self.events.lock().clone()
    }

    /// Recorded events without the device address.
    pub fn kinds(&self) -> Vec<SessionEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Forget every recorded event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, device: &DeviceAddress, event: SessionEvent) {
        self.events.lock().push((*device, event));
    }
}
