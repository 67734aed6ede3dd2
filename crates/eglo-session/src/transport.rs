//! Transport seam between the engine and a BLE stack.
//!
//! Implementations are asynchronous: they accept an operation, return
//! immediately, and later report the outcome through the supplied
//! [`Completion`]. The engine never issues a second operation before the
//! first one completed or its wait gave up.

use eglo_packet::Characteristic;
use thiserror::Error;

use crate::state::Completion;

/// Failure reported by the BLE stack for a single operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    /// Create a transport error from a message.
    pub fn new(msg: impl Into<String>) -> Self {
        TransportError(msg.into())
    }
}

/// Connection state changes reported by the BLE stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Link established; services may or may not be resolved yet.
    Connected {
        /// Whether GATT services are already resolved.
        services_resolved: bool,
    },
    /// GATT services finished resolving on an existing link.
    ServicesResolved,
    /// Link lost or closed.
    Disconnected,
}

impl ConnectionEvent {
    /// Whether the characteristics can be used after this event.
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            ConnectionEvent::Connected {
                services_resolved: true
            } | ConnectionEvent::ServicesResolved
        )
    }
}

/// Asynchronous access to the three protocol characteristics.
pub trait Transport: Send + Sync {
    /// Write `value` to a characteristic and report through `completion`.
    fn write_characteristic(
        &self,
        characteristic: Characteristic,
        value: &[u8],
        completion: Completion,
    );

    /// Read a characteristic and report the bytes through `completion`.
    fn read_characteristic(&self, characteristic: Characteristic, completion: Completion);

    /// Drop the link. Must not block on pending operations.
    fn disconnect(&self);
}
