//! Protocol constants
//!
//! Characteristic identifiers, frame tags and light opcodes used by the
//! EGLO/AwoX mesh GATT interface.

// ============================================================================
// GATT Characteristics
// ============================================================================

/// Status characteristic: status echo requests and encrypted notifications.
pub const STATUS_CHAR_UUID: &str = "00010203-0405-0607-0809-0a0b0c0d1911";
/// Command characteristic: encrypted command frames.
pub const COMMAND_CHAR_UUID: &str = "00010203-0405-0607-0809-0a0b0c0d1912";
/// Pairing characteristic: pair requests, pair responses and mesh updates.
pub const PAIR_CHAR_UUID: &str = "00010203-0405-0607-0809-0a0b0c0d1914";

// ============================================================================
// Pairing Tags
// ============================================================================

/// First byte of a pair request frame.
pub const PAIR_REQUEST_TAG: u8 = 0x0c;
/// Pair response tag: credentials accepted, remote random follows.
pub const PAIR_ACCEPTED_TAG: u8 = 0x0d;
/// Pair response tag: mesh name or password rejected.
pub const PAIR_REJECTED_TAG: u8 = 0x0e;

/// Mesh update frame tag carrying the new mesh name.
pub const MESH_UPDATE_NAME_TAG: u8 = 0x04;
/// Mesh update frame tag carrying the new mesh password.
pub const MESH_UPDATE_PASSWORD_TAG: u8 = 0x05;
/// Mesh update frame tag carrying the new long-term key.
pub const MESH_UPDATE_LTK_TAG: u8 = 0x06;
/// Pairing characteristic reply after an accepted mesh update.
pub const MESH_UPDATE_ACCEPTED_TAG: u8 = 0x07;

/// Value written to the status characteristic to request a status echo.
pub const STATUS_ECHO_REQUEST: [u8; 1] = [0x01];

// ============================================================================
// Frame Layout
// ============================================================================

/// Maximum length of a mesh name, password or long-term key.
pub const MAX_MESH_FIELD_LEN: usize = 16;
/// Length of a session random.
pub const SESSION_RANDOM_LEN: usize = 8;
/// Length of a session key.
pub const SESSION_KEY_LEN: usize = 16;
/// Length of a pair request frame: tag + random + proof.
pub const PAIR_REQUEST_LEN: usize = 1 + SESSION_RANDOM_LEN + 8;
/// Minimum length of an accepted pair response: tag + remote random.
pub const PAIR_RESPONSE_MIN_LEN: usize = 1 + SESSION_RANDOM_LEN;
/// Length of a sequence number in command and notification frames.
pub const SEQUENCE_LEN: usize = 3;
/// Number of check bytes carried by encrypted frames.
pub const CHECK_LEN: usize = 2;
/// Plaintext payload length of a command frame (zero padded).
pub const COMMAND_PAYLOAD_LEN: usize = 15;
/// Total length of a command frame on the wire.
pub const COMMAND_FRAME_LEN: usize = SEQUENCE_LEN + CHECK_LEN + COMMAND_PAYLOAD_LEN;
/// Bytes of command data after destination, opcode and vendor id.
pub const MAX_COMMAND_DATA: usize = COMMAND_PAYLOAD_LEN - 5;
/// Header length of a notification frame: sequence + source + check.
pub const NOTIFICATION_HEADER_LEN: usize = SEQUENCE_LEN + 2 + CHECK_LEN;
/// Maximum decrypted payload of a notification frame.
pub const MAX_NOTIFICATION_PAYLOAD: usize = 20 - NOTIFICATION_HEADER_LEN;

/// Vendor id embedded after the opcode of every command frame.
pub const VENDOR_ID: u16 = 0x0160;

// ============================================================================
// Light Opcodes
// ============================================================================

/// Power on/off, one data byte (0 = off, 1 = on).
pub const C_POWER: u8 = 0xd0;
/// White color temperature, one data byte.
pub const C_WHITE_TEMPERATURE: u8 = 0xf0;
/// White brightness, one data byte in 1..=127.
pub const C_WHITE_BRIGHTNESS: u8 = 0xf1;
/// RGB color, mode byte 0x04 followed by red, green, blue.
pub const C_COLOR: u8 = 0xe2;
/// Color brightness, one data byte.
pub const C_COLOR_BRIGHTNESS: u8 = 0xf2;
/// Status notification sent by the light.
pub const C_STATUS_NOTIFICATION: u8 = 0xdc;

/// Mode byte preceding the RGB triple of a color command.
pub const COLOR_MODE_RGB: u8 = 0x04;
/// Upper bound of the white brightness scale.
pub const WHITE_BRIGHTNESS_MAX: u8 = 127;
