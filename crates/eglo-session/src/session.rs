//! Pairing handshake and session key lifecycle for one device.
//!
//! A [`SessionManager`] runs on the device worker thread. Pairing is four
//! bounded steps: write the pair request, write the status echo, read the
//! pair response, derive the key. Any failed step forces the command state to
//! `Fail`, drops the link and leaves the key slot empty.

use std::sync::Arc;
use std::time::Duration;

use eglo_packet::{
    decode_pair_response, derive_session_key, encode_mesh_update, encode_pair_request,
    Characteristic, DeviceAddress, MeshCredentials, MeshField, PairResponse, SessionKey,
    SessionRandom, MESH_UPDATE_ACCEPTED_TAG, SEQUENCE_LEN, STATUS_ECHO_REQUEST,
};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::events::{EventSink, SessionEvent};
use crate::metrics::{device_labels, labels_with, metric_defs};
use crate::operation::StepRunner;
use crate::state::{CommandState, CommandTracker, DEFAULT_STEP_TIMEOUT};
use crate::transport::Transport;

/// Terminal outcome of a pairing handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingOutcome {
    /// Key derived and installed.
    Established,
    /// Device rejected the mesh credentials.
    AuthFailed,
    /// Device answered outside the protocol.
    ProtocolError,
    /// A step did not complete within its bound.
    Timeout,
    /// The transport reported a failed operation.
    TransportFailed,
    /// The worker was torn down mid-handshake.
    Cancelled,
}

impl PairingOutcome {
    /// Classify a pairing error.
    pub fn from_error(err: &SessionError) -> Self {
        match err {
            SessionError::Authentication { .. } => PairingOutcome::AuthFailed,
            SessionError::Timeout { .. } => PairingOutcome::Timeout,
            SessionError::Transport { .. } | SessionError::LinkLost { .. } => {
                PairingOutcome::TransportFailed
            }
            SessionError::Cancelled | SessionError::WorkerStopped => PairingOutcome::Cancelled,
            _ => PairingOutcome::ProtocolError,
        }
    }
}

/// Per-device parameters for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Address of the light; binds every command frame.
    pub address: DeviceAddress,
    /// Mesh credentials used for pairing.
    pub credentials: MeshCredentials,
    /// Mesh id commands are addressed to (0 reaches the connected light).
    pub mesh_id: u16,
    /// Bound for each transport step.
    pub step_timeout: Duration,
    /// Seed for pairing randoms and sequence numbers; `None` draws from the OS.
    pub rng_seed: Option<u64>,
}

impl SessionConfig {
    /// Configuration with default mesh id and step bound.
    pub fn new(address: DeviceAddress, credentials: MeshCredentials) -> Self {
        SessionConfig {
            address,
            credentials,
            mesh_id: 0,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            rng_seed: None,
        }
    }

    /// Address commands to another mesh id.
    pub fn with_mesh_id(mut self, mesh_id: u16) -> Self {
        self.mesh_id = mesh_id;
        self
    }

    /// Override the per-step bound.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Make randoms reproducible.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub(crate) fn build_rng(&self) -> Box<dyn RngCore + Send> {
        match self.rng_seed {
            Some(seed) => Box::new(ChaCha8Rng::seed_from_u64(seed)),
            None => Box::new(StdRng::from_entropy()),
        }
    }
}

// ============================================================================
// Session Manager
// ============================================================================

/// Owns the pairing handshake and the session key of one device.
pub struct SessionManager {
    address: DeviceAddress,
    credentials: MeshCredentials,
    tracker: Arc<CommandTracker>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    steps: StepRunner,
    rng: Box<dyn RngCore + Send>,
    last_random: Option<SessionRandom>,
}

impl SessionManager {
    /// Create a manager sharing `tracker` with the transport completions.
    pub fn new(
        config: &SessionConfig,
        tracker: Arc<CommandTracker>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let steps = StepRunner::new(
            config.address,
            Arc::clone(&tracker),
            Arc::clone(&transport),
            config.step_timeout,
        );
        SessionManager {
            address: config.address,
            credentials: config.credentials.clone(),
            tracker,
            transport,
            sink,
            steps,
            rng: config.build_rng(),
            last_random: None,
        }
    }

    /// Device address.
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Credentials used for the next pairing.
    pub fn credentials(&self) -> &MeshCredentials {
        &self.credentials
    }

    /// Whether a session key is installed.
    pub fn is_established(&self) -> bool {
        self.tracker.has_key()
    }

    /// Installed session key.
    pub fn session_key(&self) -> Option<SessionKey> {
        self.tracker.session_key()
    }

    /// Random sent in the most recent pairing attempt.
    pub fn last_random(&self) -> Option<SessionRandom> {
        self.last_random
    }

    /// Per-step bound.
    pub fn step_timeout(&self) -> Duration {
        self.steps.timeout()
    }

    /// The installed key, or `NotEstablished` without touching the transport.
    pub fn require_key(&self) -> Result<SessionKey> {
        self.tracker
            .session_key()
            .ok_or(SessionError::NotEstablished {
                address: self.address,
            })
    }

    pub(crate) fn steps(&self) -> &StepRunner {
        &self.steps
    }

    pub(crate) fn next_sequence(&mut self) -> [u8; SEQUENCE_LEN] {
        let mut seq = [0u8; SEQUENCE_LEN];
        self.rng.fill_bytes(&mut seq);
        seq
    }

    // ------------------------------------------------------------------------
    // Pairing
    // ------------------------------------------------------------------------

    /// Run the pairing handshake and install the derived key.
    ///
    /// Any previous key is dropped first; on failure the slot stays empty and
    /// the link is dropped. A key derived on a link that was lost before it
    /// could be installed is discarded with `LinkLost`.
    pub fn pair(&mut self) -> Result<()> {
        let labels = device_labels(&self.address);
        metrics::counter!(metric_defs::PAIRING_ATTEMPTS.name, &labels).increment(1);

        self.tracker.clear_key();
        let epoch = self.tracker.link_epoch();
        self.sink.emit(&self.address, SessionEvent::PairingStarted);
        info!(device = %self.address, mesh = self.credentials.name(), "Pairing");

        let result = self.handshake().and_then(|key| {
            if self.tracker.install_key(key, epoch) {
                Ok(())
            } else if self.tracker.is_cancelled() {
                Err(SessionError::Cancelled)
            } else {
                Err(SessionError::LinkLost {
                    step: "session key",
                })
            }
        });

        match result {
            Ok(()) => {
                metrics::counter!(metric_defs::PAIRING_ESTABLISHED.name, &labels).increment(1);
                info!(device = %self.address, "Session established");
                self.sink.emit(
                    &self.address,
                    SessionEvent::PairingFinished {
                        outcome: PairingOutcome::Established,
                    },
                );
                Ok(())
            }
            Err(err) => {
                metrics::counter!(
                    metric_defs::PAIRING_FAILURES.name,
                    &labels_with(&self.address, "reason", err.reason())
                )
                .increment(1);
                warn!(device = %self.address, error = %err, "Pairing failed");
                self.sink.emit(
                    &self.address,
                    SessionEvent::PairingFinished {
                        outcome: PairingOutcome::from_error(&err),
                    },
                );
                self.abort(&err);
                Err(err)
            }
        }
    }

    fn handshake(&mut self) -> Result<SessionKey> {
        let local = SessionRandom::generate(&mut *self.rng);
        self.last_random = Some(local);

        let request = encode_pair_request(&self.credentials, &local);
        self.steps
            .write("pair request", Characteristic::Pairing, &request)?;
        self.steps
            .write("status echo", Characteristic::Status, &STATUS_ECHO_REQUEST)?;
        let response = self.steps.read("pair response", Characteristic::Pairing)?;

        let parsed = decode_pair_response(&response)
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        match parsed {
            PairResponse::Accepted(remote) => {
                debug!(device = %self.address, "Pair response accepted");
                Ok(derive_session_key(&self.credentials, &local, &remote))
            }
            PairResponse::Rejected => Err(SessionError::Authentication {
                address: self.address,
            }),
            PairResponse::Unexpected(tag) => Err(SessionError::Protocol(format!(
                "unexpected pair response tag 0x{tag:02x}"
            ))),
        }
    }

    // ------------------------------------------------------------------------
    // Mesh update
    // ------------------------------------------------------------------------

    /// Move the device onto new mesh credentials.
    ///
    /// Requires an established session. The values are checked before any
    /// frame is written; on acceptance the new credentials are used for every
    /// later pairing.
    pub fn update_mesh(
        &mut self,
        credentials: MeshCredentials,
        long_term_key: &[u8],
    ) -> Result<()> {
        let key = self.require_key()?;

        let frames = [
            (MeshField::Name, credentials.name().as_bytes()),
            (MeshField::Password, credentials.password().as_bytes()),
            (MeshField::LongTermKey, long_term_key),
        ]
        .into_iter()
        .map(|(field, value)| encode_mesh_update(&key, field, value))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(SessionError::InvalidCredentials)?;

        info!(device = %self.address, mesh = credentials.name(), "Updating mesh credentials");
        let result = self.send_mesh_update(&frames);
        match result {
            Ok(()) => {
                self.sink.emit(
                    &self.address,
                    SessionEvent::MeshUpdated {
                        name: credentials.name().to_string(),
                    },
                );
                self.credentials = credentials;
                Ok(())
            }
            Err(err) => {
                warn!(device = %self.address, error = %err, "Mesh update failed");
                self.abort(&err);
                Err(err)
            }
        }
    }

    fn send_mesh_update(&self, frames: &[Vec<u8>]) -> Result<()> {
        for frame in frames {
            self.steps
                .write("mesh update", Characteristic::Pairing, frame)?;
        }
        let reply = self.steps.read("mesh update reply", Characteristic::Pairing)?;
        match reply.first() {
            Some(&MESH_UPDATE_ACCEPTED_TAG) => Ok(()),
            Some(tag) => Err(SessionError::Protocol(format!(
                "mesh update rejected with tag 0x{tag:02x}"
            ))),
            None => Err(SessionError::Protocol("empty mesh update reply".to_string())),
        }
    }

    // ------------------------------------------------------------------------
    // Failure handling
    // ------------------------------------------------------------------------

    /// Apply the failure policy for `err`: force `Fail`, drop the link when
    /// I/O went wrong, and return the tracker to `New`.
    pub(crate) fn abort(&self, err: &SessionError) {
        if self.tracker.is_cancelled() {
            return;
        }
        self.tracker.set_state(CommandState::Fail);
        if err.requires_disconnect() {
            self.disconnect();
        }
        self.tracker.reset();
    }

    /// Drop the session key and the link.
    pub fn disconnect(&self) {
        let had_key = self.tracker.clear_key();
        debug!(device = %self.address, had_key, "Disconnecting");
        self.transport.disconnect();
        if had_key {
            metrics::counter!(metric_defs::DISCONNECTS.name, &device_labels(&self.address))
                .increment(1);
            self.sink.emit(&self.address, SessionEvent::Disconnected);
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("address", &self.address)
            .field("credentials", &self.credentials)
            .field("established", &self.is_established())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::testing::{ScriptedTransport, WriteReply};
    use eglo_packet::{decode_mesh_update, decode_pair_request, PAIR_ACCEPTED_TAG};

    const DEVICE_RANDOM: [u8; 8] = [0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18];

    struct Fixture {
        manager: SessionManager,
        transport: Arc<ScriptedTransport>,
        tracker: Arc<CommandTracker>,
        sink: Arc<MemorySink>,
    }

    fn fixture(timeout: Duration) -> Fixture {
        let config = SessionConfig::new(
            DeviceAddress([0xa4, 0xc1, 0x38, 0x46, 0x10, 0x4e]),
            MeshCredentials::new("home", "1234").unwrap(),
        )
        .with_step_timeout(timeout)
        .with_rng_seed(1);
        let transport = Arc::new(ScriptedTransport::new());
        let tracker = Arc::new(CommandTracker::new());
        let sink = Arc::new(MemorySink::new());
        let manager = SessionManager::new(
            &config,
            Arc::clone(&tracker),
            transport.clone(),
            sink.clone(),
        );
        Fixture {
            manager,
            transport,
            tracker,
            sink,
        }
    }

    fn accepted() -> Vec<u8> {
        let mut response = vec![PAIR_ACCEPTED_TAG];
        response.extend_from_slice(&DEVICE_RANDOM);
        response
    }

    #[test]
    fn test_pairing_installs_derived_key() {
        let mut f = fixture(Duration::from_millis(200));
        f.transport.push_read(&accepted());

        f.manager.pair().unwrap();

        let local = f.manager.last_random().unwrap();
        let expected = derive_session_key(
            f.manager.credentials(),
            &local,
            &SessionRandom(DEVICE_RANDOM),
        );
        assert_eq!(f.manager.session_key(), Some(expected));
        assert_eq!(f.tracker.state(), CommandState::New);

        let writes = f.transport.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].0, Characteristic::Pairing);
        assert_eq!(
            decode_pair_request(f.manager.credentials(), &writes[0].1).unwrap(),
            local
        );
        assert_eq!(writes[1], (Characteristic::Status, vec![0x01]));
        assert_eq!(f.transport.reads(), vec![Characteristic::Pairing]);
        assert_eq!(f.transport.disconnects(), 0);

        assert_eq!(
            f.sink.kinds(),
            vec![
                SessionEvent::PairingStarted,
                SessionEvent::PairingFinished {
                    outcome: PairingOutcome::Established
                }
            ]
        );
    }

    #[test]
    fn test_rejected_pairing_disconnects() {
        let mut f = fixture(Duration::from_millis(200));
        f.transport.push_read(&[0x0e]);

        let err = f.manager.pair().unwrap_err();
        assert!(matches!(err, SessionError::Authentication { .. }));
        assert!(!f.manager.is_established());
        assert_eq!(f.transport.disconnects(), 1);
        assert_eq!(f.tracker.state(), CommandState::New);
        assert!(f.sink.kinds().contains(&SessionEvent::PairingFinished {
            outcome: PairingOutcome::AuthFailed
        }));
    }

    #[test]
    fn test_unexpected_tag_is_protocol_error() {
        let mut f = fixture(Duration::from_millis(200));
        f.transport.push_read(&[0x42, 0, 0]);

        let err = f.manager.pair().unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
        assert_eq!(PairingOutcome::from_error(&err), PairingOutcome::ProtocolError);
        assert_eq!(f.transport.disconnects(), 1);
    }

    #[test]
    fn test_short_accept_is_protocol_error() {
        let mut f = fixture(Duration::from_millis(200));
        f.transport.push_read(&[0x0d, 1, 2]);
        assert!(matches!(
            f.manager.pair().unwrap_err(),
            SessionError::Protocol(_)
        ));
        assert!(!f.manager.is_established());
    }

    #[test]
    fn test_silent_step_times_out_and_late_completion_is_ignored() {
        let mut f = fixture(Duration::from_millis(50));
        f.transport.push_write(WriteReply::Silent);

        let err = f.manager.pair().unwrap_err();
        assert_eq!(
            err,
            SessionError::Timeout {
                step: "pair request",
                timeout: Duration::from_millis(50)
            }
        );
        assert_eq!(f.transport.writes().len(), 1);
        assert_eq!(f.transport.disconnects(), 1);

        for late in f.transport.take_held() {
            assert!(!late.write_done(Ok(())));
        }
        assert_eq!(f.tracker.state(), CommandState::New);
    }

    #[test]
    fn test_failed_write_aborts_pairing() {
        let mut f = fixture(Duration::from_millis(200));
        f.transport.push_write(WriteReply::Ok);
        f.transport.push_write(WriteReply::Fail("gatt error 133"));

        let err = f.manager.pair().unwrap_err();
        assert_eq!(
            err,
            SessionError::Transport {
                step: "status echo",
                reason: "gatt error 133".to_string()
            }
        );
        assert!(f.transport.reads().is_empty());
        assert_eq!(f.transport.disconnects(), 1);
    }

    #[test]
    fn test_key_is_not_installed_after_link_loss() {
        let mut f = fixture(Duration::from_millis(200));
        f.transport.lose_link_after_next_read(Arc::clone(&f.tracker));
        f.transport.push_read(&accepted());

        let err = f.manager.pair().unwrap_err();
        assert_eq!(err, SessionError::LinkLost { step: "session key" });
        assert!(!f.manager.is_established());
        assert_eq!(f.transport.disconnects(), 0);
        assert_eq!(f.tracker.state(), CommandState::New);
        assert!(f.sink.kinds().contains(&SessionEvent::PairingFinished {
            outcome: PairingOutcome::TransportFailed
        }));

        // The next link pairs normally.
        f.transport.push_read(&accepted());
        f.manager.pair().unwrap();
        assert!(f.manager.is_established());
    }

    #[test]
    fn test_each_attempt_uses_fresh_random() {
        let mut f = fixture(Duration::from_millis(200));
        f.transport.push_read(&accepted());
        f.transport.push_read(&accepted());

        f.manager.pair().unwrap();
        let first = f.manager.last_random().unwrap();
        let first_key = f.manager.session_key().unwrap();
        f.manager.pair().unwrap();
        let second = f.manager.last_random().unwrap();

        assert_ne!(first, second);
        assert_ne!(f.manager.session_key().unwrap(), first_key);
    }

    #[test]
    fn test_repairing_failure_clears_previous_key() {
        let mut f = fixture(Duration::from_millis(200));
        f.transport.push_read(&accepted());
        f.manager.pair().unwrap();

        f.transport.push_read(&[0x0e]);
        assert!(f.manager.pair().is_err());
        assert!(f.manager.session_key().is_none());
    }

    #[test]
    fn test_mesh_update_requires_session() {
        let mut f = fixture(Duration::from_millis(200));
        let creds = MeshCredentials::new("office", "5678").unwrap();
        let err = f.manager.update_mesh(creds, &[0u8; 16]).unwrap_err();
        assert!(matches!(err, SessionError::NotEstablished { .. }));
        assert!(f.transport.writes().is_empty());
        assert_eq!(f.transport.disconnects(), 0);
    }

    #[test]
    fn test_mesh_update_rejects_long_key_before_io() {
        let mut f = fixture(Duration::from_millis(200));
        f.transport.push_read(&accepted());
        f.manager.pair().unwrap();
        let before = f.transport.writes().len();

        let creds = MeshCredentials::new("office", "5678").unwrap();
        let err = f.manager.update_mesh(creds, &[0u8; 17]).unwrap_err();
        assert!(matches!(err, SessionError::InvalidCredentials(_)));
        assert_eq!(f.transport.writes().len(), before);
        assert!(f.manager.is_established());
    }

    #[test]
    fn test_mesh_update_adopts_new_credentials() {
        let mut f = fixture(Duration::from_millis(200));
        f.transport.push_read(&accepted());
        f.manager.pair().unwrap();
        let key = f.manager.session_key().unwrap();

        f.transport.push_read(&[0x07]);
        let creds = MeshCredentials::new("office", "5678").unwrap();
        f.manager.update_mesh(creds.clone(), b"ltk-0123456789ab").unwrap();

        assert_eq!(f.manager.credentials(), &creds);
        let updates: Vec<_> = f.transport.writes().into_iter().skip(2).collect();
        assert_eq!(updates.len(), 3);
        let (field, value) = decode_mesh_update(&key, &updates[0].1).unwrap();
        assert_eq!(field, MeshField::Name);
        assert_eq!(&value[..6], b"office");
        let (field, value) = decode_mesh_update(&key, &updates[2].1).unwrap();
        assert_eq!(field, MeshField::LongTermKey);
        assert_eq!(&value, b"ltk-0123456789ab");
        assert!(f.sink.kinds().contains(&SessionEvent::MeshUpdated {
            name: "office".to_string()
        }));
    }

    #[test]
    fn test_mesh_update_rejection_keeps_old_credentials() {
        let mut f = fixture(Duration::from_millis(200));
        f.transport.push_read(&accepted());
        f.manager.pair().unwrap();

        f.transport.push_read(&[0x0e]);
        let creds = MeshCredentials::new("office", "5678").unwrap();
        assert!(matches!(
            f.manager.update_mesh(creds, &[1u8; 16]).unwrap_err(),
            SessionError::Protocol(_)
        ));
        assert_eq!(f.manager.credentials().name(), "home");
        assert!(!f.manager.is_established());
        assert_eq!(f.transport.disconnects(), 1);
    }
}
