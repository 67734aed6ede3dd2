//! # eglo-session
//!
//! Session engine for EGLO/AwoX BLE mesh lights.
//!
//! The engine drives an asynchronous, one-operation-at-a-time BLE transport
//! from a synchronous command issuer:
//!
//! - [`CommandTracker`] holds the per-device command state and session key
//!   behind one lock, with bounded blocking waits.
//! - [`SessionManager`] runs the pairing handshake and owns the key lifecycle.
//! - [`spawn_device_worker`] starts the serialized worker and returns a
//!   [`DeviceHandle`] for submitting commands.
//! - [`Transport`] is the seam a BLE stack implements.
//!
//! Events go to an [`EventSink`]; counters go through the `metrics` facade.

pub mod config;
mod dispatcher;
mod error;
mod events;
pub mod metrics;
mod operation;
mod session;
mod state;
mod transport;

#[cfg(test)]
mod testing;

pub use config::{load_config, ConfigError, DeviceConfig};
pub use dispatcher::{spawn_device_worker, DeviceHandle, Pending};
pub use error::{Result, SessionError};
pub use events::{EventSink, MemorySink, SessionEvent, TracingSink};
pub use session::{PairingOutcome, SessionConfig, SessionManager};
pub use state::{CommandState, CommandTracker, Completion, WaitOutcome, DEFAULT_STEP_TIMEOUT};
pub use transport::{ConnectionEvent, Transport, TransportError};
