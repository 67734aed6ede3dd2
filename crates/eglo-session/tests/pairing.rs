//! Pairing scenarios against the simulated light.

use std::sync::Arc;
use std::time::Duration;

use eglo_packet::{DeviceAddress, MeshCredentials};
use eglo_session::{
    spawn_device_worker, ConnectionEvent, DeviceHandle, MemorySink, PairingOutcome,
    SessionConfig, SessionError, SessionEvent,
};
use eglo_sim::{BulbConfig, Faults, SimulatedBulb};

fn address() -> DeviceAddress {
    "A4:C1:38:46:10:4E".parse().unwrap()
}

fn setup(
    controller_password: &str,
    timeout: Duration,
) -> (DeviceHandle, Arc<SimulatedBulb>, Arc<MemorySink>) {
    let bulb = Arc::new(SimulatedBulb::new(BulbConfig::new(
        address(),
        MeshCredentials::new("home", "1234").unwrap(),
    )));
    let sink = Arc::new(MemorySink::new());
    let config = SessionConfig::new(
        address(),
        MeshCredentials::new("home", controller_password).unwrap(),
    )
    .with_step_timeout(timeout)
    .with_rng_seed(3);
    let handle = spawn_device_worker(config, bulb.clone(), sink.clone()).unwrap();
    (handle, bulb, sink)
}

fn outcomes(sink: &MemorySink) -> Vec<PairingOutcome> {
    sink.kinds()
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::PairingFinished { outcome } => Some(outcome),
            _ => None,
        })
        .collect()
}

#[test]
fn test_successful_pairing_agrees_on_key() {
    let (handle, bulb, sink) = setup("1234", Duration::from_secs(3));

    handle.pair().wait().unwrap();

    assert!(handle.is_established());
    assert_eq!(handle.tracker().session_key(), bulb.session_key());
    assert_eq!(outcomes(&sink), vec![PairingOutcome::Established]);
    assert_eq!(bulb.stats().pairings_accepted, 1);
    assert_eq!(bulb.stats().disconnects, 0);
}

#[test]
fn test_bad_password_is_authentication_failure() {
    let (handle, bulb, sink) = setup("9999", Duration::from_secs(3));

    let err = handle.pair().wait().unwrap_err();

    assert!(matches!(err, SessionError::Authentication { .. }));
    assert!(!handle.is_established());
    assert_eq!(outcomes(&sink), vec![PairingOutcome::AuthFailed]);
    assert_eq!(bulb.stats().disconnects, 1);
    assert!(!bulb.is_connected());
}

#[test]
fn test_unexpected_response_is_protocol_error() {
    let (handle, bulb, sink) = setup("1234", Duration::from_secs(3));
    bulb.set_faults(Faults::with_pair_response(&[0x33, 0, 0, 0]));

    let err = handle.pair().wait().unwrap_err();

    assert!(matches!(err, SessionError::Protocol(_)));
    assert_eq!(outcomes(&sink), vec![PairingOutcome::ProtocolError]);
    assert_eq!(bulb.stats().disconnects, 1);
}

#[test]
fn test_silent_device_times_out_within_bound() {
    let (handle, bulb, sink) = setup("1234", Duration::from_millis(100));
    bulb.set_faults(Faults::dropping_reads());

    let start = std::time::Instant::now();
    let err = handle.pair().wait().unwrap_err();

    assert!(matches!(
        err,
        SessionError::Timeout {
            step: "pair response",
            ..
        }
    ));
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(outcomes(&sink), vec![PairingOutcome::Timeout]);
    assert!(!handle.is_established());
    assert_eq!(bulb.stats().disconnects, 1);
}

#[test]
fn test_reconnect_pairs_with_fresh_key() {
    let (handle, bulb, _sink) = setup("1234", Duration::from_secs(3));
    handle.pair().wait().unwrap();
    let first = handle.tracker().session_key().unwrap();

    handle.on_connection_event(ConnectionEvent::Disconnected);
    assert!(!handle.is_established());

    handle.on_connection_event(bulb.connect());
    handle.turn_on().wait().unwrap();

    let second = handle.tracker().session_key().unwrap();
    assert_ne!(first, second);
    assert_eq!(bulb.session_key(), Some(second));
    assert!(bulb.light().on);
}

#[test]
fn test_mesh_update_then_repair_with_new_credentials() {
    let (handle, bulb, _sink) = setup("1234", Duration::from_secs(3));
    handle.pair().wait().unwrap();

    let office = MeshCredentials::new("office", "5678").unwrap();
    handle.update_mesh(office.clone(), &[0x42; 16]).wait().unwrap();
    assert_eq!(bulb.credentials(), office);

    // A fresh handshake now needs the new credentials on both sides.
    handle.pair().wait().unwrap();
    assert_eq!(handle.tracker().session_key(), bulb.session_key());
}

#[test]
fn test_rejected_mesh_update_disconnects() {
    let (handle, bulb, _sink) = setup("1234", Duration::from_secs(3));
    handle.pair().wait().unwrap();
    bulb.set_faults(Faults {
        reject_mesh_update: true,
        ..Faults::none()
    });

    let office = MeshCredentials::new("office", "5678").unwrap();
    let err = handle.update_mesh(office, &[0x42; 16]).wait().unwrap_err();
    assert!(matches!(err, SessionError::Protocol(_)));
    assert_eq!(bulb.credentials().name(), "home");
    assert!(!handle.is_established());
}
