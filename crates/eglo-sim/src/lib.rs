//! # eglo-sim
//!
//! In-process simulated light for exercising the session engine without a
//! BLE adapter.
//!
//! [`SimulatedBulb`] implements [`eglo_session::Transport`] and plays the
//! device side of the protocol: it verifies pair requests, derives the same
//! session key as the controller, decrypts command frames into a
//! [`LightStatus`](eglo_packet::LightStatus) and answers status reads with
//! encrypted notifications. Completions are delivered from a background
//! thread after a configurable latency, and [`Faults`] inject the failure
//! modes the engine must survive.

mod bulb;
mod faults;

pub use bulb::{BulbConfig, BulbStats, SimulatedBulb};
pub use faults::Faults;
