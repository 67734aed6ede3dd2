//! Error types for eglo-session.

use std::time::Duration;

use eglo_packet::{DeviceAddress, PacketError};
use thiserror::Error;

/// Errors surfaced by session and dispatcher operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The device answered the pair request with a rejection.
    #[error("Authentication rejected by {address}: mesh name or password mismatch")]
    Authentication {
        /// Device that rejected the pairing.
        address: DeviceAddress,
    },

    /// The device answered with something the protocol does not allow.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The transport reported a failed write or read.
    #[error("Transport error during {step}: {reason}")]
    Transport {
        /// Step that was running.
        step: &'static str,
        /// Failure reported by the transport.
        reason: String,
    },

    /// No completion arrived within the step bound.
    #[error("Timed out after {timeout:?} waiting for {step}")]
    Timeout {
        /// Step that was running.
        step: &'static str,
        /// Bound that elapsed.
        timeout: Duration,
    },

    /// The link went away while a step was running.
    #[error("Link lost during {step}")]
    LinkLost {
        /// Step that was running.
        step: &'static str,
    },

    /// A command was issued before a session key was installed.
    #[error("No session established with {address}")]
    NotEstablished {
        /// Target device.
        address: DeviceAddress,
    },

    /// Credentials or mesh values were rejected before any I/O.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(PacketError),

    /// A frame could not be built or failed validation.
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    /// The worker was torn down while the operation was waiting.
    #[error("Operation cancelled")]
    Cancelled,

    /// The worker thread is gone; the request was never answered.
    #[error("Device worker stopped")]
    WorkerStopped,

    /// The worker thread could not be started.
    #[error("Failed to spawn device worker: {0}")]
    Spawn(String),
}

impl SessionError {
    /// Short label used for metrics and events.
    pub fn reason(&self) -> &'static str {
        match self {
            SessionError::Authentication { .. } => "auth_failed",
            SessionError::Protocol(_) => "protocol",
            SessionError::Transport { .. } => "transport",
            SessionError::Timeout { .. } => "timeout",
            SessionError::LinkLost { .. } => "link_lost",
            SessionError::NotEstablished { .. } => "not_established",
            SessionError::InvalidCredentials(_) => "invalid_credentials",
            SessionError::Packet(_) => "packet",
            SessionError::Cancelled => "cancelled",
            SessionError::WorkerStopped => "worker_stopped",
            SessionError::Spawn(_) => "spawn",
        }
    }

    /// Whether the error tears the connection down.
    ///
    /// Rejections that happen before any I/O leave the link alone, a lost
    /// link is already gone, and a cancelled worker leaves the link to the
    /// owner tearing it down.
    pub fn requires_disconnect(&self) -> bool {
        matches!(
            self,
            SessionError::Authentication { .. }
                | SessionError::Protocol(_)
                | SessionError::Transport { .. }
                | SessionError::Timeout { .. }
                | SessionError::Packet(_)
        )
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
