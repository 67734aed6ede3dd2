//! Light status carried by notifications.

use bytes::{Buf, BufMut};

use crate::constants::{C_STATUS_NOTIFICATION, VENDOR_ID};
use crate::PacketError;

/// Length of an encoded status payload.
pub const STATUS_PAYLOAD_LEN: usize = 12;

/// Output state reported by a light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightStatus {
    /// Mesh id of the reporting light.
    pub mesh_id: u16,
    /// Whether the light is on.
    pub on: bool,
    /// White brightness on the device scale.
    pub white_brightness: u8,
    /// White temperature.
    pub white_temperature: u8,
    /// Red channel.
    pub red: u8,
    /// Green channel.
    pub green: u8,
    /// Blue channel.
    pub blue: u8,
    /// Color brightness.
    pub color_brightness: u8,
}

impl LightStatus {
    /// Render as a notification payload: opcode, vendor id, fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(STATUS_PAYLOAD_LEN);
        buf.put_u8(C_STATUS_NOTIFICATION);
        buf.put_u16_le(VENDOR_ID);
        buf.put_u16_le(self.mesh_id);
        buf.put_u8(u8::from(self.on));
        buf.put_u8(self.white_brightness);
        buf.put_u8(self.white_temperature);
        buf.put_u8(self.red);
        buf.put_u8(self.green);
        buf.put_u8(self.blue);
        buf.put_u8(self.color_brightness);
        buf
    }

    /// Parse a decrypted notification payload.
    pub fn decode(payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() < STATUS_PAYLOAD_LEN {
            return Err(PacketError::length("status", STATUS_PAYLOAD_LEN, payload.len()));
        }
        let mut buf = payload;
        let opcode = buf.get_u8();
        if opcode != C_STATUS_NOTIFICATION {
            return Err(PacketError::UnknownOpcode(opcode));
        }
        let vendor = buf.get_u16_le();
        if vendor != VENDOR_ID {
            return Err(PacketError::invalid_format(format!(
                "vendor id 0x{vendor:04x}"
            )));
        }
        Ok(LightStatus {
            mesh_id: buf.get_u16_le(),
            on: buf.get_u8() != 0,
            white_brightness: buf.get_u8(),
            white_temperature: buf.get_u8(),
            red: buf.get_u8(),
            green: buf.get_u8(),
            blue: buf.get_u8(),
            color_brightness: buf.get_u8(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_layout() {
        let status = LightStatus {
            mesh_id: 0x0102,
            on: true,
            white_brightness: 127,
            white_temperature: 40,
            red: 1,
            green: 2,
            blue: 3,
            color_brightness: 90,
        };
        let payload = status.encode();
        assert_eq!(
            payload,
            vec![0xdc, 0x60, 0x01, 0x02, 0x01, 0x01, 127, 40, 1, 2, 3, 90]
        );
        assert_eq!(LightStatus::decode(&payload).unwrap(), status);
    }

    #[test]
    fn test_status_rejects_other_payloads() {
        assert!(matches!(
            LightStatus::decode(&[0xdc, 0x60]),
            Err(PacketError::InvalidLength { .. })
        ));
        let mut payload = LightStatus::default().encode();
        payload[0] = 0xd0;
        assert_eq!(
            LightStatus::decode(&payload),
            Err(PacketError::UnknownOpcode(0xd0))
        );
        let mut payload = LightStatus::default().encode();
        payload[1] = 0x00;
        assert!(LightStatus::decode(&payload).is_err());
    }
}
