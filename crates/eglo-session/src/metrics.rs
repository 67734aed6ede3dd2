//! Metric declarations for the session engine.
//!
//! Counters are recorded through the `metrics` facade. Nothing is stored
//! unless the host installs a recorder; [`describe_metrics`] registers the
//! descriptions with whichever recorder is active.
//!
//! ```rust
//! use eglo_packet::DeviceAddress;
//! use eglo_session::metrics::{device_labels, metric_defs};
//!
//! let address: DeviceAddress = "A4:C1:38:46:10:4E".parse().unwrap();
//! metrics::counter!(metric_defs::PAIRING_ATTEMPTS.name, &device_labels(&address)).increment(1);
//! ```

use eglo_packet::DeviceAddress;
use metrics::{describe_counter, Unit};

/// A counter declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// Metric name as recorded.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Unit of measurement.
    pub unit: Option<Unit>,
    /// Label keys attached when recording.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Declare a counter.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Set the description.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Set the unit.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Set the expected label keys.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Register this metric's description with the active recorder.
    pub fn describe(&self) {
        match self.unit {
            Some(unit) => {
                describe_counter!(self.name, unit, self.description);
            }
            None => {
                describe_counter!(self.name, self.description);
            }
        }
    }
}

/// Every counter the engine records.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Pairing
    // ========================================================================

    /// Pairing handshakes started.
    pub const PAIRING_ATTEMPTS: Metric = Metric::counter("eglo.session.pairing.attempts")
        .with_description("Pairing handshakes started")
        .with_unit(Unit::Count)
        .with_labels(&["device"]);

    /// Pairing handshakes that installed a session key.
    pub const PAIRING_ESTABLISHED: Metric = Metric::counter("eglo.session.pairing.established")
        .with_description("Pairing handshakes that installed a session key")
        .with_unit(Unit::Count)
        .with_labels(&["device"]);

    /// Pairing handshakes that failed.
    ///
    /// Labels: device, reason (auth_failed, protocol, transport, timeout, ...)
    pub const PAIRING_FAILURES: Metric = Metric::counter("eglo.session.pairing.failures")
        .with_description("Pairing handshakes that failed")
        .with_unit(Unit::Count)
        .with_labels(&["device", "reason"]);

    // ========================================================================
    // Commands
    // ========================================================================

    /// Command frames acknowledged by the transport.
    pub const COMMANDS_SENT: Metric = Metric::counter("eglo.session.commands.sent")
        .with_description("Command frames acknowledged by the transport")
        .with_unit(Unit::Count)
        .with_labels(&["device", "opcode"]);

    /// Commands that failed, including ones rejected before any I/O.
    pub const COMMANDS_FAILED: Metric = Metric::counter("eglo.session.commands.failed")
        .with_description("Commands that failed")
        .with_unit(Unit::Count)
        .with_labels(&["device", "reason"]);

    /// Status notifications read and decoded.
    pub const STATUS_READS: Metric = Metric::counter("eglo.session.status.reads")
        .with_description("Status notifications read and decoded")
        .with_unit(Unit::Count)
        .with_labels(&["device"]);

    // ========================================================================
    // Link
    // ========================================================================

    /// Step waits that hit their bound.
    pub const STEP_TIMEOUTS: Metric = Metric::counter("eglo.session.step.timeouts")
        .with_description("Step waits that hit their bound")
        .with_unit(Unit::Count)
        .with_labels(&["device", "step"]);

    /// Session keys dropped because the link went away or was torn down.
    pub const DISCONNECTS: Metric = Metric::counter("eglo.session.disconnects")
        .with_description("Session keys dropped on disconnect")
        .with_unit(Unit::Count)
        .with_labels(&["device"]);

    /// All metrics, for bulk registration.
    pub const ALL: &[&Metric] = &[
        &PAIRING_ATTEMPTS,
        &PAIRING_ESTABLISHED,
        &PAIRING_FAILURES,
        &COMMANDS_SENT,
        &COMMANDS_FAILED,
        &STATUS_READS,
        &STEP_TIMEOUTS,
        &DISCONNECTS,
    ];
}

/// Label set identifying a device.
pub fn device_labels(address: &DeviceAddress) -> Vec<(&'static str, String)> {
    vec![("device", address.to_string())]
}

/// Labels for a device plus one extra key.
pub fn labels_with(
    address: &DeviceAddress,
    key: &'static str,
    value: impl Into<String>,
) -> Vec<(&'static str, String)> {
    let mut labels = device_labels(address);
    labels.push((key, value.into()));
    labels
}

/// Register descriptions for every metric.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
