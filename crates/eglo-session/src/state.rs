//! Per-device command state machine with bounded blocking waits.
//!
//! The worker thread issues one transport operation at a time and blocks in
//! [`CommandTracker::await_any`] until the transport's completion callback
//! moves the state forward. Each operation runs in a numbered cycle; a
//! [`Completion`] only applies to the cycle it was handed out for, so a
//! callback arriving after its wait gave up cannot advance a later operation.
//!
//! The session key shares the same lock so a disconnect observed on a
//! transport thread is visible to the worker before its next frame is built.
//! Every lost link bumps a link epoch; a key derived on an earlier epoch is
//! never installed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use eglo_packet::SessionKey;
use parking_lot::{Condvar, Mutex};

use crate::transport::TransportError;

/// Bound applied to every wait unless configured otherwise.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(3);

/// Lifecycle of a single transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandState {
    /// Idle, ready for the next operation.
    New,
    /// Frame handed to the transport, no completion yet.
    Queued,
    /// Write completed successfully.
    Sent,
    /// Read completed with a response.
    Success,
    /// Operation failed or was aborted.
    Fail,
}

/// Result of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// One of the target states was observed.
    Reached(CommandState),
    /// The bound elapsed first.
    TimedOut,
    /// The tracker was cancelled while waiting.
    Cancelled,
}

#[derive(Debug)]
struct Slot {
    state: CommandState,
    cycle: u64,
    link_epoch: u64,
    key: Option<SessionKey>,
    response: Option<Vec<u8>>,
    error: Option<TransportError>,
    cancelled: bool,
}

/// Command state, session key slot and last response under one lock.
#[derive(Debug)]
pub struct CommandTracker {
    slot: Mutex<Slot>,
    changed: Condvar,
}

impl Default for CommandTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTracker {
    /// Create an idle tracker with no session key.
    pub fn new() -> Self {
        CommandTracker {
            slot: Mutex::new(Slot {
                state: CommandState::New,
                cycle: 0,
                link_epoch: 0,
                key: None,
                response: None,
                error: None,
                cancelled: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> CommandState {
        self.slot.lock().state
    }

    /// Current cycle number.
    pub fn cycle(&self) -> u64 {
        self.slot.lock().cycle
    }

    /// Store a state and wake every waiter.
    pub fn set_state(&self, state: CommandState) {
        let mut slot = self.slot.lock();
        slot.state = state;
        self.changed.notify_all();
    }

    /// Block until the state is one of `targets`, the bound elapses or the
    /// tracker is cancelled.
    pub fn await_any(&self, targets: &[CommandState], timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if slot.cancelled {
                return WaitOutcome::Cancelled;
            }
            if targets.contains(&slot.state) {
                return WaitOutcome::Reached(slot.state);
            }
            if self.changed.wait_until(&mut slot, deadline).timed_out() {
                // A completion may have landed right at the deadline.
                if slot.cancelled {
                    return WaitOutcome::Cancelled;
                }
                if targets.contains(&slot.state) {
                    return WaitOutcome::Reached(slot.state);
                }
                return WaitOutcome::TimedOut;
            }
        }
    }

    /// Return to `New` and start a fresh cycle, discarding any leftover
    /// response. Completions from earlier cycles become stale.
    pub fn reset(&self) {
        let mut slot = self.slot.lock();
        slot.state = CommandState::New;
        slot.cycle += 1;
        slot.response = None;
        slot.error = None;
        self.changed.notify_all();
    }

    /// Mark the current cycle as handed to the transport.
    ///
    /// The returned [`Completion`] is the only way for the transport to move
    /// this cycle forward.
    pub fn queue(self: &Arc<Self>) -> Completion {
        let mut slot = self.slot.lock();
        slot.state = CommandState::Queued;
        self.changed.notify_all();
        Completion {
            tracker: Arc::clone(self),
            cycle: slot.cycle,
        }
    }

    /// Take the response stored by the last successful read.
    pub fn take_response(&self) -> Option<Vec<u8>> {
        self.slot.lock().response.take()
    }

    /// Take the error stored by the last failed completion.
    pub fn take_error(&self) -> Option<TransportError> {
        self.slot.lock().error.take()
    }

    // ------------------------------------------------------------------------
    // Session key slot
    // ------------------------------------------------------------------------

    /// Installed session key, if any.
    pub fn session_key(&self) -> Option<SessionKey> {
        self.slot.lock().key
    }

    /// Whether a session key is installed.
    pub fn has_key(&self) -> bool {
        self.slot.lock().key.is_some()
    }

    /// Install a key derived while the link was at `epoch`.
    ///
    /// Refused, returning false, if the link was lost since or the tracker
    /// was cancelled.
    pub fn install_key(&self, key: SessionKey, epoch: u64) -> bool {
        let mut slot = self.slot.lock();
        if slot.cancelled || slot.link_epoch != epoch {
            return false;
        }
        slot.key = Some(key);
        true
    }

    /// Drop the session key. Returns whether one was installed.
    pub fn clear_key(&self) -> bool {
        self.slot.lock().key.take().is_some()
    }

    // ------------------------------------------------------------------------
    // Link epoch
    // ------------------------------------------------------------------------

    /// Number of link losses observed so far.
    pub fn link_epoch(&self) -> u64 {
        self.slot.lock().link_epoch
    }

    /// Record that the link went away.
    ///
    /// Drops the key, starts a new epoch and fails an operation still waiting
    /// on the transport. Returns whether a key was installed.
    pub fn link_lost(&self) -> bool {
        let mut slot = self.slot.lock();
        slot.link_epoch += 1;
        if slot.state == CommandState::Queued {
            slot.state = CommandState::Fail;
            slot.error = Some(TransportError::new("link lost"));
        }
        self.changed.notify_all();
        slot.key.take().is_some()
    }

    // ------------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------------

    /// Interrupt every wait, wipe the key and refuse further keys.
    pub fn cancel(&self) {
        let mut slot = self.slot.lock();
        slot.cancelled = true;
        slot.key = None;
        slot.response = None;
        self.changed.notify_all();
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.slot.lock().cancelled
    }

    fn complete(
        &self,
        cycle: u64,
        from: &[CommandState],
        state: CommandState,
        response: Option<Vec<u8>>,
        error: Option<TransportError>,
    ) -> bool {
        let mut slot = self.slot.lock();
        if slot.cycle != cycle || !from.contains(&slot.state) {
            return false;
        }
        slot.state = state;
        slot.response = response;
        slot.error = error;
        self.changed.notify_all();
        true
    }
}

// ============================================================================
// Completion
// ============================================================================

/// One-shot completion callback for a queued transport operation.
///
/// Transports call exactly one of the methods, from any thread.
#[derive(Debug)]
pub struct Completion {
    tracker: Arc<CommandTracker>,
    cycle: u64,
}

impl Completion {
    /// Cycle this completion belongs to.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Report the outcome of a write. Returns false if the cycle was abandoned.
    pub fn write_done(self, result: Result<(), TransportError>) -> bool {
        let (state, error) = match result {
            Ok(()) => (CommandState::Sent, None),
            Err(e) => (CommandState::Fail, Some(e)),
        };
        self.tracker
            .complete(self.cycle, &[CommandState::Queued], state, None, error)
    }

    /// Report the outcome of a read. Returns false if the cycle was abandoned.
    pub fn read_done(self, result: Result<Vec<u8>, TransportError>) -> bool {
        let (state, response, error) = match result {
            Ok(bytes) => (CommandState::Success, Some(bytes), None),
            Err(e) => (CommandState::Fail, None, Some(e)),
        };
        self.tracker.complete(
            self.cycle,
            &[CommandState::Queued, CommandState::Sent],
            state,
            response,
            error,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_await_returns_on_completion() {
        let tracker = Arc::new(CommandTracker::new());
        tracker.reset();
        let completion = tracker.queue();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completion.write_done(Ok(()))
        });

        let outcome = tracker.await_any(
            &[CommandState::Sent, CommandState::Fail],
            Duration::from_secs(2),
        );
        assert_eq!(outcome, WaitOutcome::Reached(CommandState::Sent));
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_await_times_out_without_completion() {
        let tracker = Arc::new(CommandTracker::new());
        tracker.reset();
        let _completion = tracker.queue();

        let start = Instant::now();
        let outcome = tracker.await_any(
            &[CommandState::Sent, CommandState::Fail],
            Duration::from_millis(50),
        );
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_target_already_reached() {
        let tracker = CommandTracker::new();
        tracker.set_state(CommandState::Fail);
        assert_eq!(
            tracker.await_any(&[CommandState::Fail], Duration::from_millis(1)),
            WaitOutcome::Reached(CommandState::Fail)
        );
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let tracker = Arc::new(CommandTracker::new());
        tracker.reset();
        let stale = tracker.queue();

        // The wait gave up; the next operation starts a new cycle.
        tracker.reset();
        let fresh = tracker.queue();

        assert!(!stale.read_done(Ok(vec![0x0d])));
        assert_eq!(tracker.state(), CommandState::Queued);
        assert!(tracker.take_response().is_none());

        assert!(fresh.read_done(Ok(vec![0x07])));
        assert_eq!(tracker.state(), CommandState::Success);
        assert_eq!(tracker.take_response(), Some(vec![0x07]));
    }

    #[test]
    fn test_completion_does_not_move_terminal_state() {
        let tracker = Arc::new(CommandTracker::new());
        tracker.reset();
        let completion = tracker.queue();
        tracker.set_state(CommandState::Fail);
        assert!(!completion.write_done(Ok(())));
        assert_eq!(tracker.state(), CommandState::Fail);
    }

    #[test]
    fn test_failed_write_keeps_error() {
        let tracker = Arc::new(CommandTracker::new());
        tracker.reset();
        tracker.queue().write_done(Err(TransportError::new("gatt 133")));
        assert_eq!(tracker.state(), CommandState::Fail);
        assert_eq!(tracker.take_error(), Some(TransportError::new("gatt 133")));
    }

    #[test]
    fn test_cancel_interrupts_wait_and_wipes_key() {
        let tracker = Arc::new(CommandTracker::new());
        assert!(tracker.install_key(SessionKey([7; 16]), 0));
        tracker.reset();
        let _completion = tracker.queue();

        let waiter = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                tracker.await_any(&[CommandState::Sent], Duration::from_secs(30))
            })
        };
        thread::sleep(Duration::from_millis(20));
        tracker.cancel();

        assert_eq!(waiter.join().unwrap(), WaitOutcome::Cancelled);
        assert!(!tracker.has_key());

        assert!(!tracker.install_key(SessionKey([8; 16]), 0));
        assert!(!tracker.has_key());
    }

    #[test]
    fn test_key_slot() {
        let tracker = CommandTracker::new();
        assert!(tracker.session_key().is_none());
        assert!(tracker.install_key(SessionKey([1; 16]), tracker.link_epoch()));
        assert_eq!(tracker.session_key(), Some(SessionKey([1; 16])));
        assert!(tracker.clear_key());
        assert!(!tracker.clear_key());
    }

    #[test]
    fn test_key_from_lost_link_is_refused() {
        let tracker = CommandTracker::new();
        let epoch = tracker.link_epoch();

        assert!(!tracker.link_lost());
        assert!(!tracker.install_key(SessionKey([2; 16]), epoch));
        assert!(!tracker.has_key());

        assert!(tracker.install_key(SessionKey([3; 16]), tracker.link_epoch()));
        assert!(tracker.link_lost());
        assert!(!tracker.has_key());
    }

    #[test]
    fn test_link_lost_fails_waiting_operation() {
        let tracker = Arc::new(CommandTracker::new());
        tracker.reset();
        let completion = tracker.queue();

        let waiter = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                tracker.await_any(
                    &[CommandState::Success, CommandState::Fail],
                    Duration::from_secs(30),
                )
            })
        };
        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        tracker.link_lost();

        assert_eq!(
            waiter.join().unwrap(),
            WaitOutcome::Reached(CommandState::Fail)
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(tracker.take_error(), Some(TransportError::new("link lost")));
        assert!(!completion.read_done(Ok(vec![0x0d])));
    }
}
