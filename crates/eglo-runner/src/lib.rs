//! Command-line controller for EGLO/AwoX mesh lights.
//!
//! Loads a YAML device configuration, pairs with the light and runs one
//! command. The simulated light is the only transport shipped; `--simulate`
//! selects it explicitly.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eglo_packet::{LightCommand, LightStatus, MeshCredentials, PacketError};
use eglo_session::metrics::describe_metrics;
use eglo_session::{
    load_config, spawn_device_worker, ConfigError, DeviceConfig, DeviceHandle, SessionError,
    TracingSink,
};
use eglo_sim::{BulbConfig, SimulatedBulb};
use thiserror::Error;
use tracing::info;

/// Errors reported by the CLI.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The light rejected or failed an operation.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A command argument was invalid.
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// No transport is available for the requested mode.
    #[error("No BLE transport available; run with --simulate")]
    NoTransport,
}

impl From<PacketError> for RunnerError {
    fn from(e: PacketError) -> Self {
        RunnerError::Session(SessionError::Packet(e))
    }
}

fn credentials(name: &str, password: &str) -> Result<MeshCredentials, RunnerError> {
    MeshCredentials::new(name, password).map_err(|e| RunnerError::Argument(e.to_string()))
}

fn percent(s: &str) -> Result<u8, String> {
    let value: u8 = s.parse().map_err(|e| format!("{e}"))?;
    if value > 100 {
        return Err(format!("{value} is not a percentage (0-100)"));
    }
    Ok(value)
}

#[derive(Parser, Debug)]
#[command(name = "eglo")]
#[command(about = "Control EGLO/AwoX mesh lights", version)]
pub struct Cli {
    /// Device configuration file (YAML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override the per-step timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Run against an in-process simulated light
    #[arg(long)]
    pub simulate: bool,

    /// Password the simulated light accepts (defaults to the configured one)
    #[arg(long)]
    pub device_password: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Pair and report the session state
    Pair,
    /// Switch the light on
    On,
    /// Switch the light off
    Off,
    /// Set an RGB color
    Color {
        /// Red (0-255)
        red: u8,
        /// Green (0-255)
        green: u8,
        /// Blue (0-255)
        blue: u8,
    },
    /// Set color brightness
    Brightness {
        /// Brightness in percent
        #[arg(value_parser = percent)]
        percent: u8,
    },
    /// Set white brightness
    WhiteBrightness {
        /// Brightness in percent
        #[arg(value_parser = percent)]
        percent: u8,
    },
    /// Set white color temperature
    WhiteTemperature {
        /// Temperature in percent
        #[arg(value_parser = percent)]
        percent: u8,
    },
    /// Read the light status
    Status,
    /// Move the light onto new mesh credentials
    SetMesh {
        /// New mesh name
        name: String,
        /// New mesh password
        password: String,
        /// New long-term key as hex (16 bytes)
        #[arg(long, default_value = "c0c1c2c3c4c5c6c7d8d9dadbdcdddedf")]
        ltk: String,
    },
}

impl Command {
    /// Light command sent by this CLI command, if it is one.
    pub fn light_command(&self) -> Option<LightCommand> {
        match *self {
            Command::On => Some(LightCommand::Power(true)),
            Command::Off => Some(LightCommand::Power(false)),
            Command::Color { red, green, blue } => Some(LightCommand::Color { red, green, blue }),
            Command::Brightness { percent } => {
                Some(LightCommand::color_brightness_percent(percent))
            }
            Command::WhiteBrightness { percent } => {
                Some(LightCommand::white_brightness_percent(percent))
            }
            Command::WhiteTemperature { percent } => {
                Some(LightCommand::white_temperature_percent(percent))
            }
            _ => None,
        }
    }
}

/// Render a status notification for display.
pub fn format_status(status: &LightStatus) -> String {
    format!(
        "mesh id {}: {}, white {}/127 temp {}, rgb ({}, {}, {}) at {}%",
        status.mesh_id,
        if status.on { "on" } else { "off" },
        status.white_brightness,
        status.white_temperature,
        status.red,
        status.green,
        status.blue,
        status.color_brightness
    )
}

fn simulated_bulb(cli: &Cli, config: &DeviceConfig) -> Result<SimulatedBulb, RunnerError> {
    let password = cli
        .device_password
        .clone()
        .unwrap_or_else(|| config.mesh_password.clone());
    let credentials = credentials(&config.mesh_name, &password)?;
    Ok(SimulatedBulb::new(BulbConfig::new(
        config.address()?,
        credentials,
    )))
}

fn execute(handle: &DeviceHandle, command: &Command) -> Result<String, RunnerError> {
    if let Some(light) = command.light_command() {
        handle.send(light).wait()?;
        return Ok(format!("{}: sent {:?}", handle.address(), light));
    }

    match command {
        Command::Pair => Ok(format!("{}: session established", handle.address())),
        Command::Status => {
            let notification = handle.read_status().wait()?;
            let status = LightStatus::decode(&notification.payload)?;
            Ok(format!("{}: {}", handle.address(), format_status(&status)))
        }
        Command::SetMesh {
            name,
            password,
            ltk,
        } => {
            let credentials = credentials(name, password)?;
            let ltk = hex::decode(ltk).map_err(|e| RunnerError::Argument(format!("ltk: {e}")))?;
            handle.update_mesh(credentials, &ltk).wait()?;
            Ok(format!("{}: joined mesh {name}", handle.address()))
        }
        _ => Err(RunnerError::Argument(format!("unsupported command {command:?}"))),
    }
}

/// Run one CLI invocation and return the text to print.
pub fn run(cli: &Cli) -> Result<String, RunnerError> {
    let mut config = load_config(&cli.config)?;
    if let Some(timeout_ms) = cli.timeout_ms {
        config.step_timeout_ms = timeout_ms;
    }
    let session = config.session_config()?;

    if !cli.simulate {
        return Err(RunnerError::NoTransport);
    }

    describe_metrics();
    let bulb = Arc::new(simulated_bulb(cli, &config)?);
    let handle = spawn_device_worker(session, bulb, Arc::new(TracingSink))?;
    info!(device = %handle.address(), command = ?cli.command, "Running command");

    handle.pair().wait()?;
    let output = execute(&handle, &cli.command);
    handle.shutdown();
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_file(name: &str, yaml: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("eglo-runner-{}-{name}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("device.yaml");
        fs::write(&path, yaml).unwrap();
        path
    }

    const YAML: &str = "address: \"A4:C1:38:46:10:4E\"\nmesh_name: home\nmesh_password: \"1234\"\n";

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        let parsed = cli(&["eglo", "--config", "d.yaml", "color", "255", "10", "0"]);
        assert_eq!(
            parsed.command,
            Command::Color {
                red: 255,
                green: 10,
                blue: 0
            }
        );
        assert!(!parsed.simulate);

        let parsed = cli(&["eglo", "-c", "d.yaml", "--simulate", "white-brightness", "50"]);
        assert_eq!(parsed.command.light_command(), Some(LightCommand::WhiteBrightness(63)));

        assert!(Cli::try_parse_from(["eglo", "-c", "d.yaml", "brightness", "101"]).is_err());
        assert!(Cli::try_parse_from(["eglo", "-c", "d.yaml", "color", "1", "2"]).is_err());
    }

    #[test]
    fn test_simulated_on_and_status() {
        let path = config_file("status", YAML);
        let path = path.to_string_lossy().into_owned();

        let out = run(&cli(&["eglo", "-c", &path, "--simulate", "on"])).unwrap();
        assert!(out.contains("Power(true)"));

        let out = run(&cli(&["eglo", "-c", &path, "--simulate", "status"])).unwrap();
        assert!(out.contains("A4:C1:38:46:10:4E"));
        assert!(out.contains("off"), "fresh simulated light starts off: {out}");
    }

    #[test]
    fn test_wrong_device_password_fails_pairing() {
        let path = config_file("auth", YAML);
        let path = path.to_string_lossy().into_owned();
        let err = run(&cli(&[
            "eglo",
            "-c",
            &path,
            "--simulate",
            "--device-password",
            "0000",
            "pair",
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            RunnerError::Session(SessionError::Authentication { .. })
        ));
    }

    #[test]
    fn test_requires_transport() {
        let path = config_file("transport", YAML);
        let path = path.to_string_lossy().into_owned();
        assert!(matches!(
            run(&cli(&["eglo", "-c", &path, "off"])),
            Err(RunnerError::NoTransport)
        ));
    }

    #[test]
    fn test_set_mesh() {
        let path = config_file("mesh", YAML);
        let path = path.to_string_lossy().into_owned();
        let args: [&str; 7] = ["eglo", "-c", &path, "--simulate", "set-mesh", "office", "5678"];
        let out = run(&cli(&args)).unwrap();
        assert!(out.contains("joined mesh office"));

        let err = run(&cli(&[
            "eglo", "-c", &path, "--simulate", "set-mesh", "office", "5678", "--ltk", "zz",
        ]))
        .unwrap_err();
        assert!(matches!(err, RunnerError::Argument(_)));
    }

    #[test]
    fn test_format_status() {
        let status = LightStatus {
            mesh_id: 1,
            on: true,
            white_brightness: 127,
            white_temperature: 20,
            red: 1,
            green: 2,
            blue: 3,
            color_brightness: 100,
        };
        assert_eq!(
            format_status(&status),
            "mesh id 1: on, white 127/127 temp 20, rgb (1, 2, 3) at 100%"
        );
    }
}
