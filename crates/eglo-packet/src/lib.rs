//! # eglo-packet
//!
//! Frame encoding, decoding and encryption for EGLO/AwoX BLE mesh lights.
//!
//! The lights expose three GATT characteristics (pairing, status, command).
//! Pairing frames establish a per-connection [`SessionKey`]; every later
//! command frame is encrypted with that key and bound to the device address.
//!
//! # Example
//!
//! ```rust
//! use eglo_packet::{
//!     decode_command, derive_session_key, encode_light_command, encode_pair_request,
//!     DeviceAddress, LightCommand, MeshCredentials, SessionRandom,
//! };
//!
//! let creds = MeshCredentials::new("home", "1234")?;
//! let local = SessionRandom([1, 2, 3, 4, 5, 6, 7, 8]);
//! let request = encode_pair_request(&creds, &local);
//! assert_eq!(request[0], 0x0c);
//!
//! // Once the device answered with its own random:
//! let remote = SessionRandom([8, 7, 6, 5, 4, 3, 2, 1]);
//! let key = derive_session_key(&creds, &local, &remote);
//!
//! let address: DeviceAddress = "A4:C1:38:46:10:4E".parse()?;
//! let frame = encode_light_command(&key, &address, [0, 0, 1], 0, &LightCommand::Power(true))?;
//! let decoded = decode_command(&key, &address, &frame)?;
//! assert_eq!(decoded.light_command()?, LightCommand::Power(true));
//! # Ok::<(), eglo_packet::PacketError>(())
//! ```

mod codec;
mod command;
mod constants;
pub mod crypto;
mod error;
mod status;
mod types;

pub use codec::*;
pub use command::LightCommand;
pub use constants::*;
pub use error::PacketError;
pub use status::{LightStatus, STATUS_PAYLOAD_LEN};
pub use types::*;

/// Result type for packet operations.
pub type Result<T> = std::result::Result<T, PacketError>;
