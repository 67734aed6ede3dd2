//! Error types for eglo-packet.

use thiserror::Error;

/// Errors that can occur while building or parsing frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Frame length does not match what the layout requires.
    #[error("{what} frame has invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Kind of frame being parsed.
        what: &'static str,
        /// Required length (exact or minimum, depending on the frame).
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// A mesh credential field exceeds the 16 bytes the device can store.
    #[error("{field} is {len} bytes long (max {max})")]
    CredentialTooLong {
        /// Which field was rejected.
        field: &'static str,
        /// Actual length in bytes.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// Device address could not be parsed.
    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    /// Command data does not fit in the frame.
    #[error("Command data too long: {len} bytes (max {max})")]
    DataTooLong {
        /// Actual size.
        len: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Frame failed validation against the expected key and address.
    #[error("Integrity check failed: expected {expected}, got {actual}")]
    Integrity {
        /// Check bytes computed locally.
        expected: String,
        /// Check bytes carried by the frame.
        actual: String,
    },

    /// Opcode does not map to a known light command.
    #[error("Unknown opcode: 0x{0:02X}")]
    UnknownOpcode(u8),

    /// Frame content is structurally wrong.
    #[error("Invalid frame format: {0}")]
    InvalidFormat(String),
}

impl PacketError {
    /// Create an invalid length error.
    pub fn length(what: &'static str, expected: usize, actual: usize) -> Self {
        PacketError::InvalidLength {
            what,
            expected,
            actual,
        }
    }

    /// Create an integrity error from the two check values.
    pub fn integrity(expected: &[u8], actual: &[u8]) -> Self {
        PacketError::Integrity {
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        }
    }

    /// Create an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        PacketError::InvalidFormat(message.into())
    }
}
