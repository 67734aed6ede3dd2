//! Device side of the mesh light protocol.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use eglo_packet::{
    decode_command, decode_mesh_update, decode_pair_request, derive_session_key,
    encode_notification, encode_pair_response, Characteristic, DeviceAddress, LightCommand,
    LightStatus, MeshCredentials, MeshField, SessionKey, SessionRandom, MESH_UPDATE_ACCEPTED_TAG,
    PAIR_REJECTED_TAG, PAIR_REQUEST_TAG, WHITE_BRIGHTNESS_MAX,
};
use eglo_session::{Completion, ConnectionEvent, Transport, TransportError};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace, warn};

use crate::faults::Faults;

/// Static parameters of a simulated light.
#[derive(Debug, Clone)]
pub struct BulbConfig {
    /// BLE address; binds command frames.
    pub address: DeviceAddress,
    /// Mesh credentials the light accepts.
    pub credentials: MeshCredentials,
    /// Mesh id reported in notifications.
    pub mesh_id: u16,
    /// Seed for the light's pairing randoms.
    pub seed: u64,
    /// Delay before each completion is delivered.
    pub latency: Duration,
}

impl BulbConfig {
    /// Light at `address` accepting `credentials`.
    pub fn new(address: DeviceAddress, credentials: MeshCredentials) -> Self {
        BulbConfig {
            address,
            credentials,
            mesh_id: 1,
            seed: 0x5eed,
            latency: Duration::from_millis(2),
        }
    }

    /// Set the completion latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the reported mesh id.
    pub fn with_mesh_id(mut self, mesh_id: u16) -> Self {
        self.mesh_id = mesh_id;
        self
    }
}

/// Operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulbStats {
    /// Writes received, including dropped ones.
    pub writes: usize,
    /// Reads received, including dropped ones.
    pub reads: usize,
    /// Pair requests whose proof matched.
    pub pairings_accepted: usize,
    /// Pair requests whose proof did not match.
    pub pairings_rejected: usize,
    /// Command frames decrypted and applied.
    pub commands_applied: usize,
    /// Command frames ignored (no session or failed validation).
    pub commands_rejected: usize,
    /// Disconnect requests.
    pub disconnects: usize,
}

// ============================================================================
// Device State
// ============================================================================

struct Device {
    credentials: MeshCredentials,
    connected: bool,
    key: Option<SessionKey>,
    rng: ChaCha8Rng,
    pair_response: Option<Vec<u8>>,
    staged: [Option<[u8; 16]>; 3],
    light: LightStatus,
    sno: u32,
    stats: BulbStats,
    faults: Faults,
}

fn unpad(block: &[u8; 16]) -> String {
    let end = block.iter().position(|b| *b == 0).unwrap_or(block.len());
    String::from_utf8_lossy(&block[..end]).into_owned()
}

fn field_index(field: MeshField) -> usize {
    match field {
        MeshField::Name => 0,
        MeshField::Password => 1,
        MeshField::LongTermKey => 2,
    }
}

impl Device {
    fn write_pairing(&mut self, value: &[u8]) {
        if value.first() == Some(&PAIR_REQUEST_TAG) {
            self.staged = [None; 3];
            match decode_pair_request(&self.credentials, value) {
                Ok(controller) => {
                    let device = SessionRandom::generate(&mut self.rng);
                    self.key = Some(derive_session_key(&self.credentials, &controller, &device));
                    self.pair_response = Some(encode_pair_response(&self.credentials, &device));
                    self.stats.pairings_accepted += 1;
                    debug!("Simulated bulb accepted pair request");
                }
                Err(e) => {
                    self.key = None;
                    self.pair_response = Some(vec![PAIR_REJECTED_TAG]);
                    self.stats.pairings_rejected += 1;
                    debug!(error = %e, "Simulated bulb rejected pair request");
                }
            }
            return;
        }

        let Some(key) = self.key else {
            self.pair_response = Some(vec![PAIR_REJECTED_TAG]);
            return;
        };
        match decode_mesh_update(&key, value) {
            Ok((field, block)) => {
                self.staged[field_index(field)] = Some(block);
                if let [Some(name), Some(password), Some(_ltk)] = self.staged {
                    self.staged = [None; 3];
                    self.pair_response = Some(self.adopt_mesh(&name, &password));
                }
            }
            Err(e) => {
                warn!(error = %e, "Simulated bulb got malformed mesh update");
                self.pair_response = Some(vec![PAIR_REJECTED_TAG]);
            }
        }
    }

    fn adopt_mesh(&mut self, name: &[u8; 16], password: &[u8; 16]) -> Vec<u8> {
        if self.faults.reject_mesh_update {
            return vec![PAIR_REJECTED_TAG];
        }
        match MeshCredentials::new(unpad(name), unpad(password)) {
            Ok(credentials) => {
                debug!(mesh = credentials.name(), "Simulated bulb joined new mesh");
                self.credentials = credentials;
                vec![MESH_UPDATE_ACCEPTED_TAG]
            }
            Err(_) => vec![PAIR_REJECTED_TAG],
        }
    }

    fn write_command(&mut self, address: &DeviceAddress, value: &[u8]) {
        let command = self
            .key
            .ok_or_else(|| "no session".to_string())
            .and_then(|key| decode_command(&key, address, value).map_err(|e| e.to_string()))
            .and_then(|frame| frame.light_command().map_err(|e| e.to_string()));

        match command {
            Ok(command) => {
                trace!(?command, "Simulated bulb applying command");
                self.apply(command);
                self.stats.commands_applied += 1;
            }
            Err(reason) => {
                debug!(%reason, "Simulated bulb ignored command frame");
                self.stats.commands_rejected += 1;
            }
        }
    }

    fn apply(&mut self, command: LightCommand) {
        let light = &mut self.light;
        match command {
            LightCommand::Power(on) => light.on = on,
            LightCommand::WhiteTemperature(v) => light.white_temperature = v,
            LightCommand::WhiteBrightness(v) => {
                light.white_brightness = v.min(WHITE_BRIGHTNESS_MAX)
            }
            LightCommand::Color { red, green, blue } => {
                light.red = red;
                light.green = green;
                light.blue = blue;
            }
            LightCommand::ColorBrightness(v) => light.color_brightness = v,
        }
    }

    fn read(&mut self, address: &DeviceAddress, characteristic: Characteristic) -> Vec<u8> {
        match characteristic {
            Characteristic::Pairing => {
                if let Some(bytes) = &self.faults.pair_response {
                    return bytes.clone();
                }
                self.pair_response.take().unwrap_or_default()
            }
            Characteristic::Status => {
                let Some(key) = self.key else {
                    return Vec::new();
                };
                self.sno = self.sno.wrapping_add(1) & 0x00ff_ffff;
                let sno = self.sno.to_le_bytes();
                let payload = self.light.encode();
                encode_notification(
                    &key,
                    address,
                    [sno[0], sno[1], sno[2]],
                    self.light.mesh_id,
                    &payload,
                )
                .unwrap_or_default()
            }
            Characteristic::Command => Vec::new(),
        }
    }
}

// ============================================================================
// Completion Delivery
// ============================================================================

enum Outcome {
    Write(Result<(), TransportError>),
    Read(Result<Vec<u8>, TransportError>),
}

struct Job {
    completion: Completion,
    outcome: Outcome,
}

fn delivery_main(jobs: crossbeam_channel::Receiver<Job>, latency: Duration) {
    for job in jobs {
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        let applied = match job.outcome {
            Outcome::Write(result) => job.completion.write_done(result),
            Outcome::Read(result) => job.completion.read_done(result),
        };
        if !applied {
            trace!("Late completion ignored");
        }
    }
}

// ============================================================================
// Simulated Bulb
// ============================================================================

/// A light that speaks the mesh protocol over an in-process transport.
pub struct SimulatedBulb {
    address: DeviceAddress,
    device: Arc<Mutex<Device>>,
    jobs: Option<Sender<Job>>,
    delivery: Option<JoinHandle<()>>,
}

impl SimulatedBulb {
    /// Create a connected light with no session.
    pub fn new(config: BulbConfig) -> Self {
        let (jobs, rx) = crossbeam_channel::unbounded();
        let latency = config.latency;
        let delivery = thread::Builder::new()
            .name(format!("sim-bulb-{}", config.address))
            .spawn(move || delivery_main(rx, latency))
            .map_err(|e| warn!(error = %e, "Completion thread unavailable"))
            .ok();

        let device = Device {
            credentials: config.credentials,
            connected: true,
            key: None,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            pair_response: None,
            staged: [None; 3],
            light: LightStatus {
                mesh_id: config.mesh_id,
                white_brightness: WHITE_BRIGHTNESS_MAX,
                color_brightness: 100,
                ..LightStatus::default()
            },
            sno: 0,
            stats: BulbStats::default(),
            faults: Faults::none(),
        };

        SimulatedBulb {
            address: config.address,
            device: Arc::new(Mutex::new(device)),
            jobs: delivery.as_ref().map(|_| jobs),
            delivery,
        }
    }

    /// Address of the light.
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Re-establish the link after a disconnect.
    pub fn connect(&self) -> ConnectionEvent {
        self.device.lock().connected = true;
        ConnectionEvent::Connected {
            services_resolved: true,
        }
    }

    /// Whether the link is up.
    pub fn is_connected(&self) -> bool {
        self.device.lock().connected
    }

    /// Current output state.
    pub fn light(&self) -> LightStatus {
        self.device.lock().light
    }

    /// Operation counters.
    pub fn stats(&self) -> BulbStats {
        self.device.lock().stats
    }

    /// Credentials the light currently accepts.
    pub fn credentials(&self) -> MeshCredentials {
        self.device.lock().credentials.clone()
    }

    /// Session key the light derived, if any.
    pub fn session_key(&self) -> Option<SessionKey> {
        self.device.lock().key
    }

    /// Replace the active faults.
    pub fn set_faults(&self, faults: Faults) {
        self.device.lock().faults = faults;
    }

    fn deliver(&self, completion: Completion, outcome: Outcome) {
        let job = Job {
            completion,
            outcome,
        };
        if let Some(jobs) = &self.jobs {
            if let Err(e) = jobs.send(job) {
                deliver_now(e.into_inner());
            }
        } else {
            deliver_now(job);
        }
    }
}

fn deliver_now(job: Job) {
    match job.outcome {
        Outcome::Write(result) => job.completion.write_done(result),
        Outcome::Read(result) => job.completion.read_done(result),
    };
}

impl Transport for SimulatedBulb {
    fn write_characteristic(
        &self,
        characteristic: Characteristic,
        value: &[u8],
        completion: Completion,
    ) {
        let outcome = {
            let mut device = self.device.lock();
            device.stats.writes += 1;
            if device.faults.drop_writes {
                return;
            }
            if let Some(reason) = device.faults.fail_writes.clone() {
                Outcome::Write(Err(TransportError::new(reason)))
            } else if !device.connected {
                Outcome::Write(Err(TransportError::new("not connected")))
            } else {
                match characteristic {
                    Characteristic::Pairing => device.write_pairing(value),
                    Characteristic::Status => trace!("Status echo requested"),
                    Characteristic::Command => device.write_command(&self.address, value),
                }
                Outcome::Write(Ok(()))
            }
        };
        self.deliver(completion, outcome);
    }

    fn read_characteristic(&self, characteristic: Characteristic, completion: Completion) {
        let outcome = {
            let mut device = self.device.lock();
            device.stats.reads += 1;
            if device.faults.drop_reads {
                return;
            }
            if let Some(reason) = device.faults.fail_reads.clone() {
                Outcome::Read(Err(TransportError::new(reason)))
            } else if !device.connected {
                Outcome::Read(Err(TransportError::new("not connected")))
            } else {
                Outcome::Read(Ok(device.read(&self.address, characteristic)))
            }
        };
        self.deliver(completion, outcome);
    }

    fn disconnect(&self) {
        let mut device = self.device.lock();
        device.stats.disconnects += 1;
        device.connected = false;
        device.key = None;
        device.pair_response = None;
    }
}

impl Drop for SimulatedBulb {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(delivery) = self.delivery.take() {
            let _ = delivery.join();
        }
    }
}
