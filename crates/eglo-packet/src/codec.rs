//! Frame encoding and decoding.
//!
//! ## Pairing Frames (pairing characteristic)
//!
//! | Frame          | Layout                                                  |
//! |----------------|---------------------------------------------------------|
//! | pair request   | `0x0c` + random(8) + proof(8)                           |
//! | pair response  | tag(1) + remote random(8) + device proof(8, ignored)    |
//! | mesh update    | `0x04`/`0x05`/`0x06` + encrypted field(16)              |
//!
//! The proof is `E(pad16(random), name ^ password)[0..8]`, so a peer without
//! the mesh password cannot forge one.
//!
//! ## Command Frame (command characteristic, 20 bytes)
//!
//! | Field   | Size | Description                                            |
//! |---------|------|--------------------------------------------------------|
//! | seq     | 3    | Sequence number, part of the nonce                     |
//! | check   | 2    | Leading bytes of the CBC-MAC over the plaintext        |
//! | payload | 15   | dest(2 LE) + opcode + vendor(2) + data, encrypted      |
//!
//! The nonce is `rev(address)[0..4] + 0x01 + seq`, which binds the frame to
//! one device address.
//!
//! ## Notification Frame (status characteristic)
//!
//! `sno(3) + src(2 LE) + check(2) + encrypted payload`, nonce
//! `rev(address)[0..3] + sno + src`.

use bytes::BufMut;

use crate::command::LightCommand;
use crate::constants::{
    CHECK_LEN, COMMAND_FRAME_LEN, COMMAND_PAYLOAD_LEN, MAX_COMMAND_DATA, MAX_NOTIFICATION_PAYLOAD,
    NOTIFICATION_HEADER_LEN, PAIR_ACCEPTED_TAG, PAIR_REJECTED_TAG, PAIR_REQUEST_LEN,
    PAIR_REQUEST_TAG, PAIR_RESPONSE_MIN_LEN, SEQUENCE_LEN, SESSION_RANDOM_LEN, VENDOR_ID,
};
use crate::crypto::{apply_keystream, frame_check, telink_decrypt, telink_encrypt, NONCE_LEN};
use crate::types::{check_mesh_field, pad16};
use crate::{DeviceAddress, MeshCredentials, MeshField, PacketError, SessionKey, SessionRandom};

// ============================================================================
// Pairing
// ============================================================================

fn pair_proof(credentials: &MeshCredentials, random: &SessionRandom) -> [u8; 8] {
    let encrypted = telink_encrypt(&pad16(random.as_bytes()), &credentials.name_pass());
    let mut proof = [0u8; 8];
    proof.copy_from_slice(&encrypted[..8]);
    proof
}

/// Build the pair request written to the pairing characteristic.
///
/// Independent of any session key; only the credentials and the local random
/// go into it.
pub fn encode_pair_request(credentials: &MeshCredentials, random: &SessionRandom) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PAIR_REQUEST_LEN);
    buf.put_u8(PAIR_REQUEST_TAG);
    buf.extend_from_slice(random.as_bytes());
    buf.extend_from_slice(&pair_proof(credentials, random));
    buf
}

/// Parse a pair request on the device side and verify its proof.
///
/// Returns the controller's random if the request was built with the same
/// credentials.
pub fn decode_pair_request(
    credentials: &MeshCredentials,
    frame: &[u8],
) -> Result<SessionRandom, PacketError> {
    if frame.len() < PAIR_REQUEST_LEN {
        return Err(PacketError::length("pair request", PAIR_REQUEST_LEN, frame.len()));
    }
    if frame[0] != PAIR_REQUEST_TAG {
        return Err(PacketError::invalid_format(format!(
            "pair request tag 0x{:02x}",
            frame[0]
        )));
    }

    let mut random = [0u8; SESSION_RANDOM_LEN];
    random.copy_from_slice(&frame[1..1 + SESSION_RANDOM_LEN]);
    let random = SessionRandom(random);

    let expected = pair_proof(credentials, &random);
    let actual = &frame[1 + SESSION_RANDOM_LEN..PAIR_REQUEST_LEN];
    if expected != actual {
        return Err(PacketError::integrity(&expected, actual));
    }
    Ok(random)
}

/// Outcome carried by the device's pair response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairResponse {
    /// Credentials accepted; the device's random follows.
    Accepted(SessionRandom),
    /// Mesh name or password rejected.
    Rejected,
    /// Any other tag.
    Unexpected(u8),
}

/// Parse the value read back from the pairing characteristic.
pub fn decode_pair_response(frame: &[u8]) -> Result<PairResponse, PacketError> {
    let Some(&tag) = frame.first() else {
        return Err(PacketError::length("pair response", 1, 0));
    };

    match tag {
        PAIR_ACCEPTED_TAG => {
            if frame.len() < PAIR_RESPONSE_MIN_LEN {
                return Err(PacketError::length(
                    "pair response",
                    PAIR_RESPONSE_MIN_LEN,
                    frame.len(),
                ));
            }
            let mut random = [0u8; SESSION_RANDOM_LEN];
            random.copy_from_slice(&frame[1..PAIR_RESPONSE_MIN_LEN]);
            Ok(PairResponse::Accepted(SessionRandom(random)))
        }
        PAIR_REJECTED_TAG => Ok(PairResponse::Rejected),
        other => Ok(PairResponse::Unexpected(other)),
    }
}

/// Build the device's accepting pair response.
pub fn encode_pair_response(credentials: &MeshCredentials, random: &SessionRandom) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PAIR_REQUEST_LEN);
    buf.put_u8(PAIR_ACCEPTED_TAG);
    buf.extend_from_slice(random.as_bytes());
    buf.extend_from_slice(&pair_proof(credentials, random));
    buf
}

/// Derive the session key from the credentials and both randoms.
///
/// The controller's random always comes first. A controller calling this with
/// `(local, remote)` and a device calling it with `(remote, local)` from its
/// own point of view therefore agree on the key.
pub fn derive_session_key(
    credentials: &MeshCredentials,
    controller_random: &SessionRandom,
    device_random: &SessionRandom,
) -> SessionKey {
    let mut randoms = [0u8; 16];
    randoms[..SESSION_RANDOM_LEN].copy_from_slice(controller_random.as_bytes());
    randoms[SESSION_RANDOM_LEN..].copy_from_slice(device_random.as_bytes());
    SessionKey(telink_encrypt(&credentials.name_pass(), &randoms))
}

// ============================================================================
// Mesh Update
// ============================================================================

/// Build a frame replacing one mesh field, encrypted with the session key.
pub fn encode_mesh_update(
    key: &SessionKey,
    field: MeshField,
    value: &[u8],
) -> Result<Vec<u8>, PacketError> {
    let name = match field {
        MeshField::Name => "mesh name",
        MeshField::Password => "mesh password",
        MeshField::LongTermKey => "long-term key",
    };
    check_mesh_field(name, value)?;

    let mut buf = Vec::with_capacity(17);
    buf.put_u8(field.tag());
    buf.extend_from_slice(&telink_encrypt(key.as_bytes(), &pad16(value)));
    Ok(buf)
}

/// Parse a mesh update frame on the device side.
///
/// Returns the field and its zero-padded plaintext.
pub fn decode_mesh_update(
    key: &SessionKey,
    frame: &[u8],
) -> Result<(MeshField, [u8; 16]), PacketError> {
    if frame.len() != 17 {
        return Err(PacketError::length("mesh update", 17, frame.len()));
    }
    let field = MeshField::from_tag(frame[0]).ok_or_else(|| {
        PacketError::invalid_format(format!("mesh update tag 0x{:02x}", frame[0]))
    })?;
    let mut block = [0u8; 16];
    block.copy_from_slice(&frame[1..]);
    Ok((field, telink_decrypt(key.as_bytes(), &block)))
}

// ============================================================================
// Command Frames
// ============================================================================

fn command_nonce(address: &DeviceAddress, seq: &[u8; SEQUENCE_LEN]) -> [u8; NONCE_LEN] {
    let reversed = address.reversed();
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..4].copy_from_slice(&reversed[..4]);
    nonce[4] = 0x01;
    nonce[5..].copy_from_slice(seq);
    nonce
}

/// A decrypted and validated command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    /// Sequence number from the frame header.
    pub seq: [u8; SEQUENCE_LEN],
    /// Mesh destination id.
    pub dest: u16,
    /// Command opcode.
    pub opcode: u8,
    /// Vendor id following the opcode.
    pub vendor: u16,
    /// Data block, zero padded.
    pub params: [u8; MAX_COMMAND_DATA],
}

impl CommandFrame {
    /// Interpret the frame as a light command.
    pub fn light_command(&self) -> Result<LightCommand, PacketError> {
        LightCommand::decode(self.opcode, &self.params)
    }
}

/// Encrypt a command frame bound to the session key and device address.
pub fn encode_command(
    key: &SessionKey,
    address: &DeviceAddress,
    seq: [u8; SEQUENCE_LEN],
    dest: u16,
    opcode: u8,
    data: &[u8],
) -> Result<Vec<u8>, PacketError> {
    if data.len() > MAX_COMMAND_DATA {
        return Err(PacketError::DataTooLong {
            len: data.len(),
            max: MAX_COMMAND_DATA,
        });
    }

    let mut payload = Vec::with_capacity(COMMAND_PAYLOAD_LEN);
    payload.put_u16_le(dest);
    payload.put_u8(opcode);
    payload.put_u8((VENDOR_ID & 0xff) as u8);
    payload.put_u8((VENDOR_ID >> 8) as u8);
    payload.extend_from_slice(data);
    payload.resize(COMMAND_PAYLOAD_LEN, 0);

    let nonce = command_nonce(address, &seq);
    let check = frame_check(key.as_bytes(), &nonce, &payload);
    apply_keystream(key.as_bytes(), &nonce, &mut payload);

    let mut buf = Vec::with_capacity(COMMAND_FRAME_LEN);
    buf.extend_from_slice(&seq);
    buf.extend_from_slice(&check[..CHECK_LEN]);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Encrypt a light command.
pub fn encode_light_command(
    key: &SessionKey,
    address: &DeviceAddress,
    seq: [u8; SEQUENCE_LEN],
    dest: u16,
    command: &LightCommand,
) -> Result<Vec<u8>, PacketError> {
    encode_command(key, address, seq, dest, command.opcode(), &command.data())
}

/// Decrypt and validate a command frame.
///
/// Fails with [`PacketError::Integrity`] when the frame was produced with a
/// different key or for a different device address.
pub fn decode_command(
    key: &SessionKey,
    address: &DeviceAddress,
    frame: &[u8],
) -> Result<CommandFrame, PacketError> {
    if frame.len() != COMMAND_FRAME_LEN {
        return Err(PacketError::length("command", COMMAND_FRAME_LEN, frame.len()));
    }

    let mut seq = [0u8; SEQUENCE_LEN];
    seq.copy_from_slice(&frame[..SEQUENCE_LEN]);
    let nonce = command_nonce(address, &seq);

    let mut payload = frame[SEQUENCE_LEN + CHECK_LEN..].to_vec();
    apply_keystream(key.as_bytes(), &nonce, &mut payload);

    let check = frame_check(key.as_bytes(), &nonce, &payload);
    let carried = &frame[SEQUENCE_LEN..SEQUENCE_LEN + CHECK_LEN];
    if &check[..CHECK_LEN] != carried {
        return Err(PacketError::integrity(&check[..CHECK_LEN], carried));
    }

    let mut params = [0u8; MAX_COMMAND_DATA];
    params.copy_from_slice(&payload[5..]);
    Ok(CommandFrame {
        seq,
        dest: u16::from_le_bytes([payload[0], payload[1]]),
        opcode: payload[2],
        vendor: u16::from_le_bytes([payload[3], payload[4]]),
        params,
    })
}

// ============================================================================
// Notification Frames
// ============================================================================

fn notification_nonce(address: &DeviceAddress, header: &[u8]) -> [u8; NONCE_LEN] {
    let reversed = address.reversed();
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..3].copy_from_slice(&reversed[..3]);
    nonce[3..].copy_from_slice(&header[..5]);
    nonce
}

/// A decrypted notification from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Device sequence number.
    pub sno: [u8; SEQUENCE_LEN],
    /// Mesh id of the sending node.
    pub src: u16,
    /// Decrypted payload (opcode, vendor id, parameters).
    pub payload: Vec<u8>,
}

/// Encrypt a notification the way the device does.
pub fn encode_notification(
    key: &SessionKey,
    address: &DeviceAddress,
    sno: [u8; SEQUENCE_LEN],
    src: u16,
    payload: &[u8],
) -> Result<Vec<u8>, PacketError> {
    if payload.len() > MAX_NOTIFICATION_PAYLOAD {
        return Err(PacketError::DataTooLong {
            len: payload.len(),
            max: MAX_NOTIFICATION_PAYLOAD,
        });
    }

    let mut header = Vec::with_capacity(5);
    header.extend_from_slice(&sno);
    header.put_u16_le(src);
    let nonce = notification_nonce(address, &header);

    let check = frame_check(key.as_bytes(), &nonce, payload);
    let mut body = payload.to_vec();
    apply_keystream(key.as_bytes(), &nonce, &mut body);

    let mut buf = Vec::with_capacity(NOTIFICATION_HEADER_LEN + body.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(&check[..CHECK_LEN]);
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Decrypt and validate a notification read from the status characteristic.
pub fn decode_notification(
    key: &SessionKey,
    address: &DeviceAddress,
    frame: &[u8],
) -> Result<Notification, PacketError> {
    if frame.len() < NOTIFICATION_HEADER_LEN {
        return Err(PacketError::length(
            "notification",
            NOTIFICATION_HEADER_LEN,
            frame.len(),
        ));
    }

    let nonce = notification_nonce(address, frame);
    let mut payload = frame[NOTIFICATION_HEADER_LEN..].to_vec();
    apply_keystream(key.as_bytes(), &nonce, &mut payload);

    let check = frame_check(key.as_bytes(), &nonce, &payload);
    let carried = &frame[5..NOTIFICATION_HEADER_LEN];
    if &check[..CHECK_LEN] != carried {
        return Err(PacketError::integrity(&check[..CHECK_LEN], carried));
    }

    let mut sno = [0u8; SEQUENCE_LEN];
    sno.copy_from_slice(&frame[..SEQUENCE_LEN]);
    Ok(Notification {
        sno,
        src: u16::from_le_bytes([frame[3], frame[4]]),
        payload,
    })
}
