//! Protocol value types.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;

use crate::constants::{
    COMMAND_CHAR_UUID, MAX_MESH_FIELD_LEN, MESH_UPDATE_LTK_TAG, MESH_UPDATE_NAME_TAG,
    MESH_UPDATE_PASSWORD_TAG, PAIR_CHAR_UUID, SESSION_KEY_LEN, SESSION_RANDOM_LEN,
    STATUS_CHAR_UUID,
};
use crate::PacketError;

/// Copy up to 16 bytes into a zero-padded block.
pub(crate) fn pad16(bytes: &[u8]) -> [u8; 16] {
    let mut block = [0u8; 16];
    let len = bytes.len().min(16);
    block[..len].copy_from_slice(&bytes[..len]);
    block
}

/// Reject a mesh field longer than the device can store.
pub fn check_mesh_field(field: &'static str, value: &[u8]) -> Result<(), PacketError> {
    if value.len() > MAX_MESH_FIELD_LEN {
        return Err(PacketError::CredentialTooLong {
            field,
            len: value.len(),
            max: MAX_MESH_FIELD_LEN,
        });
    }
    Ok(())
}

// ============================================================================
// Mesh Credentials
// ============================================================================

/// Shared mesh name and password authenticating a controller to the mesh.
///
/// Both fields are limited to 16 bytes; the limit is checked here so an
/// invalid pair never reaches the transport.
#[derive(Clone, PartialEq, Eq)]
pub struct MeshCredentials {
    name: String,
    password: String,
}

impl MeshCredentials {
    /// Create credentials, rejecting fields longer than 16 bytes.
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Result<Self, PacketError> {
        let name = name.into();
        let password = password.into();
        check_mesh_field("mesh name", name.as_bytes())?;
        check_mesh_field("mesh password", password.as_bytes())?;
        Ok(MeshCredentials { name, password })
    }

    /// Mesh name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mesh password.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Padded name XOR padded password, the root secret of every derivation.
    pub fn name_pass(&self) -> [u8; 16] {
        let name = pad16(self.name.as_bytes());
        let password = pad16(self.password.as_bytes());
        let mut out = [0u8; 16];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = name[i] ^ password[i];
        }
        out
    }
}

impl fmt::Debug for MeshCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshCredentials")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Session Values
// ============================================================================

/// Eight random bytes chosen by one side of a pairing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRandom(pub [u8; SESSION_RANDOM_LEN]);

impl SessionRandom {
    /// Draw a fresh random from the given generator.
    pub fn generate<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; SESSION_RANDOM_LEN];
        rng.fill_bytes(&mut bytes);
        SessionRandom(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_RANDOM_LEN] {
        &self.0
    }
}

/// Symmetric key authorizing encrypted traffic for one connection.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SessionKey(pub [u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey(..)")
    }
}

// ============================================================================
// Device Address
// ============================================================================

/// Bluetooth address of the connected light, most significant byte first.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress(pub [u8; 6]);

impl DeviceAddress {
    /// Address bytes in over-the-air (little-endian) order.
    pub fn reversed(&self) -> [u8; 6] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }
}

impl FromStr for DeviceAddress {
    type Err = PacketError;

    /// Parse `A4:C1:38:46:10:4E`, `a4-c1-38-46-10-4e` or `a4c13846104e`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let bytes =
            hex::decode(&digits).map_err(|e| PacketError::InvalidAddress(format!("{s}: {e}")))?;
        let bytes: [u8; 6] = bytes
            .try_into()
            .map_err(|_| PacketError::InvalidAddress(format!("{s}: expected 6 bytes")))?;
        Ok(DeviceAddress(bytes))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceAddress({self})")
    }
}

// ============================================================================
// Characteristics
// ============================================================================

/// The three GATT characteristics the protocol talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Pair requests/responses and mesh updates.
    Pairing,
    /// Status echo requests and notifications.
    Status,
    /// Encrypted command frames.
    Command,
}

impl Characteristic {
    /// GATT UUID of the characteristic.
    pub fn uuid(&self) -> &'static str {
        match self {
            Characteristic::Pairing => PAIR_CHAR_UUID,
            Characteristic::Status => STATUS_CHAR_UUID,
            Characteristic::Command => COMMAND_CHAR_UUID,
        }
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Characteristic::Pairing => write!(f, "pairing"),
            Characteristic::Status => write!(f, "status"),
            Characteristic::Command => write!(f, "command"),
        }
    }
}

/// Field targeted by a mesh update frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshField {
    /// New mesh name.
    Name,
    /// New mesh password.
    Password,
    /// New long-term key.
    LongTermKey,
}

impl MeshField {
    /// Tag byte that prefixes the update frame.
    pub fn tag(&self) -> u8 {
        match self {
            MeshField::Name => MESH_UPDATE_NAME_TAG,
            MeshField::Password => MESH_UPDATE_PASSWORD_TAG,
            MeshField::LongTermKey => MESH_UPDATE_LTK_TAG,
        }
    }

    /// Parse a mesh update tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            MESH_UPDATE_NAME_TAG => Some(MeshField::Name),
            MESH_UPDATE_PASSWORD_TAG => Some(MeshField::Password),
            MESH_UPDATE_LTK_TAG => Some(MeshField::LongTermKey),
            _ => None,
        }
    }
}
