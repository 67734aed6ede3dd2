//! Scripted transport for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use eglo_packet::Characteristic;
use parking_lot::Mutex;

use crate::state::{CommandTracker, Completion};
use crate::transport::{Transport, TransportError};

/// How the next write completes.
#[derive(Debug, Clone)]
pub(crate) enum WriteReply {
    Ok,
    Fail(&'static str),
    Silent,
}

/// Transport that completes operations synchronously from a script.
///
/// Writes succeed and reads fail unless scripted otherwise.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    reads: Mutex<VecDeque<Option<Result<Vec<u8>, TransportError>>>>,
    write_replies: Mutex<VecDeque<WriteReply>>,
    writes: Mutex<Vec<(Characteristic, Vec<u8>)>>,
    read_log: Mutex<Vec<Characteristic>>,
    disconnects: Mutex<usize>,
    held: Mutex<Vec<Completion>>,
    lose_link: Mutex<Option<Arc<CommandTracker>>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_read(&self, bytes: &[u8]) {
        self.reads.lock().push_back(Some(Ok(bytes.to_vec())));
    }

    pub(crate) fn push_silent_read(&self) {
        self.reads.lock().push_back(None);
    }

    pub(crate) fn push_write(&self, reply: WriteReply) {
        self.write_replies.lock().push_back(reply);
    }

    pub(crate) fn writes(&self) -> Vec<(Characteristic, Vec<u8>)> {
        self.writes.lock().clone()
    }

    pub(crate) fn reads(&self) -> Vec<Characteristic> {
        self.read_log.lock().clone()
    }

    pub(crate) fn disconnects(&self) -> usize {
        *self.disconnects.lock()
    }

    pub(crate) fn take_held(&self) -> Vec<Completion> {
        std::mem::take(&mut *self.held.lock())
    }

    /// Report a lost link right after the next read completes.
    pub(crate) fn lose_link_after_next_read(&self, tracker: Arc<CommandTracker>) {
        *self.lose_link.lock() = Some(tracker);
    }
}

impl Transport for ScriptedTransport {
    fn write_characteristic(
        &self,
        characteristic: Characteristic,
        value: &[u8],
        completion: Completion,
    ) {
        self.writes.lock().push((characteristic, value.to_vec()));
        let reply = self.write_replies.lock().pop_front().unwrap_or(WriteReply::Ok);
        match reply {
            WriteReply::Ok => {
                completion.write_done(Ok(()));
            }
            WriteReply::Fail(msg) => {
                completion.write_done(Err(TransportError::new(msg)));
            }
            WriteReply::Silent => self.held.lock().push(completion),
        }
    }

    fn read_characteristic(&self, characteristic: Characteristic, completion: Completion) {
        self.read_log.lock().push(characteristic);
        let next = self.reads.lock().pop_front();
        match next {
            Some(Some(result)) => {
                completion.read_done(result);
                let lose_link = self.lose_link.lock().take();
                if let Some(tracker) = lose_link {
                    tracker.link_lost();
                }
            }
            Some(None) => self.held.lock().push(completion),
            None => {
                completion.read_done(Err(TransportError::new("nothing scripted")));
            }
        }
    }

    fn disconnect(&self) {
        *self.disconnects.lock() += 1;
    }
}
