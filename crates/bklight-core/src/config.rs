//! Device configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::discovery::DiscoveryStrategy;
use crate::protocol::constants::*;
use crate::raster::Rotation;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid Bluetooth MAC address: {0:?}")]
    InvalidAddress(String),
    #[error("Brightness {0} outside [0.1, 1.0]")]
    BrightnessOutOfRange(f32),
    #[error("No discovery strategy configured")]
    NoDiscoveryStrategy,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Check for `XX:XX:XX:XX:XX:XX` with hex digits.
pub fn is_valid_mac_address(address: &str) -> bool {
    let parts: Vec<&str> = address.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|part| part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Protocol timing. The defaults are what the firmware needs; tests shorten them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeTiming {
    /// Wait for the stage 1 and stage 3 acknowledgments.
    pub ack_timeout_ms: u64,
    /// Wait for the optional stage 2 acknowledgment.
    pub optional_ack_timeout_ms: u64,
    /// Pause after each handshake write.
    pub stage_delay_ms: u64,
}

impl Default for HandshakeTiming {
    fn default() -> Self {
        Self {
            ack_timeout_ms: ACK_TIMEOUT_MS,
            optional_ack_timeout_ms: OPTIONAL_ACK_TIMEOUT_MS,
            stage_delay_ms: STAGE_DELAY_MS,
        }
    }
}

impl HandshakeTiming {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn optional_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.optional_ack_timeout_ms)
    }

    pub fn stage_delay(&self) -> Duration {
        Duration::from_millis(self.stage_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Upper bound for each strategy.
    pub timeout_secs: u64,
    /// Tried in order until one resolves the address.
    pub strategies: Vec<DiscoveryStrategy>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DISCOVERY_TIMEOUT_SECS,
            strategies: DiscoveryStrategy::DEFAULT_ORDER.to_vec(),
        }
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration for one display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// BLE MAC address.
    pub address: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub rotation: Rotation,
    #[serde(default = "default_brightness")]
    pub brightness: f32,
    #[serde(default)]
    pub timing: HandshakeTiming,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_brightness() -> f32 {
    DEFAULT_BRIGHTNESS
}

impl DeviceConfig {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_uppercase(),
            name: default_name(),
            rotation: Rotation::default(),
            brightness: DEFAULT_BRIGHTNESS,
            timing: HandshakeTiming::default(),
            discovery: DiscoveryConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_mac_address(&self.address) {
            return Err(ConfigError::InvalidAddress(self.address.clone()));
        }
        if !(MIN_BRIGHTNESS..=MAX_BRIGHTNESS).contains(&self.brightness) {
            return Err(ConfigError::BrightnessOutOfRange(self.brightness));
        }
        if self.discovery.strategies.is_empty() {
            return Err(ConfigError::NoDiscoveryStrategy);
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: DeviceConfig = toml::from_str(content)?;
        config.address = config.address.to_uppercase();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
