//! YAML device configuration.
//!
//! ```yaml
//! address: "A4:C1:38:46:10:4E"
//! mesh_name: home
//! mesh_password: "1234"
//! mesh_id: 0
//! step_timeout_ms: 3000
//! ```

use std::path::Path;
use std::time::Duration;

use eglo_packet::{DeviceAddress, MeshCredentials, PacketError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionConfig;

/// Errors loading or validating a device configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// YAML did not match the schema.
    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A value was syntactically valid but rejected.
    #[error("Invalid config value: {0}")]
    Invalid(#[from] PacketError),

    /// The step bound is zero.
    #[error("step_timeout_ms must be greater than zero")]
    ZeroTimeout,
}

fn default_mesh_name() -> String {
    "unpaired".to_string()
}

fn default_mesh_password() -> String {
    "1234".to_string()
}

fn default_step_timeout_ms() -> u64 {
    3000
}

/// Connection parameters for one light.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    /// BLE address, `AA:BB:CC:DD:EE:FF`.
    pub address: String,
    /// Mesh name (max 16 bytes).
    #[serde(default = "default_mesh_name")]
    pub mesh_name: String,
    /// Mesh password (max 16 bytes).
    #[serde(default = "default_mesh_password")]
    pub mesh_password: String,
    /// Mesh id commands are addressed to.
    #[serde(default)]
    pub mesh_id: u16,
    /// Bound for each transport step in milliseconds.
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    /// Fixed seed for pairing randoms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rng_seed: Option<u64>,
}

impl DeviceConfig {
    /// Configuration for `address` with every other field defaulted.
    pub fn new(address: impl Into<String>) -> Self {
        DeviceConfig {
            address: address.into(),
            mesh_name: default_mesh_name(),
            mesh_password: default_mesh_password(),
            mesh_id: 0,
            step_timeout_ms: default_step_timeout_ms(),
            rng_seed: None,
        }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: DeviceConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field that can be rejected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.address()?;
        self.credentials()?;
        if self.step_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Parsed device address.
    pub fn address(&self) -> Result<DeviceAddress, ConfigError> {
        Ok(self.address.parse()?)
    }

    /// Mesh credentials, length-checked.
    pub fn credentials(&self) -> Result<MeshCredentials, ConfigError> {
        Ok(MeshCredentials::new(
            self.mesh_name.clone(),
            self.mesh_password.clone(),
        )?)
    }

    /// Step bound.
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    /// Build the session parameters this configuration describes.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        self.validate()?;
        let mut config = SessionConfig::new(self.address()?, self.credentials()?)
            .with_mesh_id(self.mesh_id)
            .with_step_timeout(self.step_timeout());
        if let Some(seed) = self.rng_seed {
            config = config.with_rng_seed(seed);
        }
        Ok(config)
    }
}

/// Load a device configuration from a YAML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<DeviceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    DeviceConfig::from_yaml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeviceConfig::from_yaml_str("address: \"A4:C1:38:46:10:4E\"\n").unwrap();
        assert_eq!(config.mesh_name, "unpaired");
        assert_eq!(config.mesh_password, "1234");
        assert_eq!(config.mesh_id, 0);
        assert_eq!(config.step_timeout(), Duration::from_secs(3));
        assert_eq!(config, DeviceConfig::new("A4:C1:38:46:10:4E"));
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
address: "a4-c1-38-46-10-4e"
mesh_name: home
mesh_password: secret
mesh_id: 3
step_timeout_ms: 250
rng_seed: 42
"#;
        let config = DeviceConfig::from_yaml_str(yaml).unwrap();
        let session = config.session_config().unwrap();
        assert_eq!(session.address.to_string(), "A4:C1:38:46:10:4E");
        assert_eq!(session.credentials.name(), "home");
        assert_eq!(session.mesh_id, 3);
        assert_eq!(session.step_timeout, Duration::from_millis(250));
        assert_eq!(session.rng_seed, Some(42));
    }

    #[test]
    fn test_rejects_long_credentials() {
        let yaml = "address: \"A4:C1:38:46:10:4E\"\nmesh_name: this-name-is-too-long\n";
        let err = DeviceConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid(PacketError::CredentialTooLong { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            DeviceConfig::from_yaml_str("address: nope\n"),
            Err(ConfigError::Invalid(PacketError::InvalidAddress(_)))
        ));
        assert!(matches!(
            DeviceConfig::from_yaml_str("address: \"A4:C1:38:46:10:4E\"\nstep_timeout_ms: 0\n"),
            Err(ConfigError::ZeroTimeout)
        ));
        assert!(matches!(
            DeviceConfig::from_yaml_str("address: \"A4:C1:38:46:10:4E\"\ncolour: red\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            load_config("/nonexistent/eglo/device.yaml"),
            Err(ConfigError::Io(_))
        ));
    }
}
