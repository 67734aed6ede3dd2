//! Light commands carried inside command frames.

use crate::constants::{
    COLOR_MODE_RGB, C_COLOR, C_COLOR_BRIGHTNESS, C_POWER, C_WHITE_BRIGHTNESS,
    C_WHITE_TEMPERATURE, WHITE_BRIGHTNESS_MAX,
};
use crate::PacketError;

/// An action understood by the light, one opcode each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightCommand {
    /// Switch the light on or off.
    Power(bool),
    /// Set the white color temperature.
    WhiteTemperature(u8),
    /// Set the white brightness (1..=127 on the device scale).
    WhiteBrightness(u8),
    /// Set an RGB color.
    Color {
        /// Red channel.
        red: u8,
        /// Green channel.
        green: u8,
        /// Blue channel.
        blue: u8,
    },
    /// Set the brightness of the color LEDs.
    ColorBrightness(u8),
}

fn scale_percent(percent: u8, max: u8) -> u8 {
    (u16::from(percent.min(100)) * u16::from(max) / 100) as u8
}

impl LightCommand {
    /// White brightness from a 0-100 percentage.
    pub fn white_brightness_percent(percent: u8) -> Self {
        LightCommand::WhiteBrightness(scale_percent(percent, WHITE_BRIGHTNESS_MAX))
    }

    /// White temperature from a 0-100 percentage.
    pub fn white_temperature_percent(percent: u8) -> Self {
        LightCommand::WhiteTemperature(percent.min(100))
    }

    /// Color brightness from a 0-100 percentage.
    pub fn color_brightness_percent(percent: u8) -> Self {
        LightCommand::ColorBrightness(percent.min(100))
    }

    /// RGB color from 0-100 percentages per channel.
    pub fn color_percent(red: u8, green: u8, blue: u8) -> Self {
        LightCommand::Color {
            red: scale_percent(red, 255),
            green: scale_percent(green, 255),
            blue: scale_percent(blue, 255),
        }
    }

    /// Opcode byte for this command.
    pub fn opcode(&self) -> u8 {
        match self {
            LightCommand::Power(_) => C_POWER,
            LightCommand::WhiteTemperature(_) => C_WHITE_TEMPERATURE,
            LightCommand::WhiteBrightness(_) => C_WHITE_BRIGHTNESS,
            LightCommand::Color { .. } => C_COLOR,
            LightCommand::ColorBrightness(_) => C_COLOR_BRIGHTNESS,
        }
    }

    /// Data bytes following the opcode.
    pub fn data(&self) -> Vec<u8> {
        match *self {
            LightCommand::Power(on) => vec![u8::from(on)],
            LightCommand::WhiteTemperature(v)
            | LightCommand::WhiteBrightness(v)
            | LightCommand::ColorBrightness(v) => vec![v],
            LightCommand::Color { red, green, blue } => vec![COLOR_MODE_RGB, red, green, blue],
        }
    }

    /// Rebuild a command from an opcode and the (zero padded) data block.
    pub fn decode(opcode: u8, params: &[u8]) -> Result<Self, PacketError> {
        let first = |what: &'static str| {
            params
                .first()
                .copied()
                .ok_or_else(|| PacketError::length(what, 1, 0))
        };

        match opcode {
            C_POWER => Ok(LightCommand::Power(first("power")? != 0)),
            C_WHITE_TEMPERATURE => Ok(LightCommand::WhiteTemperature(first("white temperature")?)),
            C_WHITE_BRIGHTNESS => Ok(LightCommand::WhiteBrightness(first("white brightness")?)),
            C_COLOR_BRIGHTNESS => Ok(LightCommand::ColorBrightness(first("color brightness")?)),
            C_COLOR => {
                if params.len() < 4 {
                    return Err(PacketError::length("color", 4, params.len()));
                }
                if params[0] != COLOR_MODE_RGB {
                    return Err(PacketError::invalid_format(format!(
                        "unsupported color mode 0x{:02x}",
                        params[0]
                    )));
                }
                Ok(LightCommand::Color {
                    red: params[1],
                    green: params[2],
                    blue: params[3],
                })
            }
            other => Err(PacketError::UnknownOpcode(other)),
        }
    }
}
