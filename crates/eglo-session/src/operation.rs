//! One bounded transport step: reset, queue, issue, wait, reset.

use std::sync::Arc;
use std::time::Duration;

use eglo_packet::{Characteristic, DeviceAddress};
use tracing::{debug, trace};

use crate::error::{Result, SessionError};
use crate::metrics::{labels_with, metric_defs};
use crate::state::{CommandState, CommandTracker, WaitOutcome};
use crate::transport::Transport;

/// Runs single transport operations against the command tracker.
pub(crate) struct StepRunner {
    address: DeviceAddress,
    tracker: Arc<CommandTracker>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl StepRunner {
    pub(crate) fn new(
        address: DeviceAddress,
        tracker: Arc<CommandTracker>,
        transport: Arc<dyn Transport>,
        timeout: Duration,
    ) -> Self {
        StepRunner {
            address,
            tracker,
            transport,
            timeout,
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Write `value` and wait for the transport to report it sent.
    pub(crate) fn write(
        &self,
        step: &'static str,
        characteristic: Characteristic,
        value: &[u8],
    ) -> Result<()> {
        self.tracker.reset();
        let epoch = self.tracker.link_epoch();
        let completion = self.tracker.queue();
        trace!(
            device = %self.address,
            step,
            %characteristic,
            len = value.len(),
            "Writing characteristic"
        );
        self.transport
            .write_characteristic(characteristic, value, completion);

        let outcome = self.wait(step, epoch, &[CommandState::Sent, CommandState::Fail]);
        self.tracker.reset();
        outcome.map(|_| ())
    }

    /// Read a characteristic and return the bytes the transport delivered.
    pub(crate) fn read(
        &self,
        step: &'static str,
        characteristic: Characteristic,
    ) -> Result<Vec<u8>> {
        self.tracker.reset();
        let epoch = self.tracker.link_epoch();
        let completion = self.tracker.queue();
        trace!(device = %self.address, step, %characteristic, "Reading characteristic");
        self.transport.read_characteristic(characteristic, completion);

        let outcome = self.wait(step, epoch, &[CommandState::Success, CommandState::Fail]);
        let response = self.tracker.take_response();
        self.tracker.reset();
        outcome?;
        response.ok_or_else(|| SessionError::Protocol(format!("{step}: no response data")))
    }

    fn wait(
        &self,
        step: &'static str,
        epoch: u64,
        targets: &[CommandState],
    ) -> Result<CommandState> {
        match self.tracker.await_any(targets, self.timeout) {
            WaitOutcome::Reached(CommandState::Fail) if self.tracker.link_epoch() != epoch => {
                self.tracker.take_error();
                debug!(device = %self.address, step, "Link lost during step");
                Err(SessionError::LinkLost { step })
            }
            WaitOutcome::Reached(CommandState::Fail) => {
                let reason = self
                    .tracker
                    .take_error()
                    .map(|e| e.0)
                    .unwrap_or_else(|| "operation failed".to_string());
                debug!(device = %self.address, step, %reason, "Step failed");
                Err(SessionError::Transport { step, reason })
            }
            WaitOutcome::Reached(state) => Ok(state),
            WaitOutcome::TimedOut => {
                self.tracker.set_state(CommandState::Fail);
                metrics::counter!(
                    metric_defs::STEP_TIMEOUTS.name,
                    &labels_with(&self.address, "step", step)
                )
                .increment(1);
                debug!(device = %self.address, step, timeout = ?self.timeout, "Step timed out");
                Err(SessionError::Timeout {
                    step,
                    timeout: self.timeout,
                })
            }
            WaitOutcome::Cancelled => Err(SessionError::Cancelled),
        }
    }
}
