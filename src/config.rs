//! Runtime configuration for the peripheral daemon
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then command line overrides applied by the binary.

use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Allowed transmit rate range in Hz
pub const MIN_REPORT_RATE_HZ: u16 = 1;
pub const MAX_REPORT_RATE_HZ: u16 = 250;

/// Default report rate
fn default_report_rate() -> u16 {
    100
}

fn default_device_name() -> String {
    "hogpad".to_string()
}

fn default_input_device() -> String {
    "auto".to_string()
}

fn default_gadget_name() -> String {
    "hogpad".to_string()
}

fn default_adapter() -> String {
    "hci0".to_string()
}

/// Gamepad appearance value for LE advertising
fn default_appearance() -> u16 {
    0x03c4
}

/// Active transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Bluetooth LE HID-over-GATT peripheral
    #[default]
    Ble,
    /// USB gadget with a composite HID function
    Usb,
}

impl TransportMode {
    pub fn name_str(&self) -> &'static str {
        match self {
            TransportMode::Ble => "ble",
            TransportMode::Usb => "usb",
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Transport to bring up
    pub mode: TransportMode,
    /// Name advertised over BLE and used as the USB product string
    pub device_name: String,
    /// Transmit timer frequency
    pub report_rate_hz: u16,
    /// evdev path, "auto" for capability-based detection, "none" to disable
    pub input_device: String,
    /// Optional static random BLE address programmed before bring-up
    pub static_address: Option<String>,
    /// configfs gadget directory name
    pub gadget_name: String,
    /// Bluetooth adapter name
    pub adapter: String,
    /// Advertised Appearance value (0x03C4 = gamepad)
    pub appearance: u16,
    /// Enable diagnostic output
    pub verbose: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            device_name: default_device_name(),
            report_rate_hz: default_report_rate(),
            input_device: default_input_device(),
            static_address: None,
            gadget_name: default_gadget_name(),
            adapter: default_adapter(),
            appearance: default_appearance(),
            verbose: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: AppConfig = toml::from_str(&raw)
            .map_err(|e| AppError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Validate option ranges and formats
    pub fn validate(&self) -> Result<()> {
        if !(MIN_REPORT_RATE_HZ..=MAX_REPORT_RATE_HZ).contains(&self.report_rate_hz) {
            return Err(AppError::Config(format!(
                "report_rate_hz {} out of range {}-{}",
                self.report_rate_hz, MIN_REPORT_RATE_HZ, MAX_REPORT_RATE_HZ
            )));
        }
        if self.gadget_name.is_empty() || self.gadget_name.contains('/') {
            return Err(AppError::Config(format!(
                "invalid gadget_name: {:?}",
                self.gadget_name
            )));
        }
        if let Some(ref addr) = self.static_address {
            validate_static_address(addr)?;
        }
        Ok(())
    }
}

/// Check a static random BLE address: six colon-separated hex octets with
/// the two most significant bits of the first octet set.
pub fn validate_static_address(addr: &str) -> Result<()> {
    let octets: Vec<&str> = addr.split(':').collect();
    if octets.len() != 6 {
        return Err(AppError::Config(format!(
            "static address must have 6 octets: {}",
            addr
        )));
    }
    let mut parsed = [0u8; 6];
    for (i, octet) in octets.iter().enumerate() {
        if octet.len() != 2 {
            return Err(AppError::Config(format!("bad octet {:?} in {}", octet, addr)));
        }
        parsed[i] = u8::from_str_radix(octet, 16)
            .map_err(|_| AppError::Config(format!("bad octet {:?} in {}", octet, addr)))?;
    }
    if parsed[0] & 0xc0 != 0xc0 {
        return Err(AppError::Config(format!(
            "static address must have the top two bits of the first octet set (C0-FF): {}",
            addr
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mode, TransportMode::Ble);
        assert_eq!(config.report_rate_hz, 100);
        assert_eq!(config.input_device, "auto");
    }

    #[test]
    fn test_rate_range() {
        let mut config = AppConfig::default();
        config.report_rate_hz = 0;
        assert!(config.validate().is_err());
        config.report_rate_hz = 251;
        assert!(config.validate().is_err());
        config.report_rate_hz = 250;
        assert!(config.validate().is_ok());
        config.report_rate_hz = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_static_address_format() {
        assert!(validate_static_address("C2:12:34:56:78:9A").is_ok());
        assert!(validate_static_address("FF:00:00:00:00:01").is_ok());
        // Top two bits not set
        assert!(validate_static_address("12:34:56:78:9A:BC").is_err());
        assert!(validate_static_address("82:34:56:78:9A:BC").is_err());
        // Malformed
        assert!(validate_static_address("C2:12:34:56:78").is_err());
        assert!(validate_static_address("C2:12:34:56:78:ZZ").is_err());
        assert!(validate_static_address("C212:34:56:78:9A:BC").is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig {
            mode: TransportMode::Usb,
            report_rate_hz: 60,
            static_address: Some("C2:12:34:56:78:9A".to_string()),
            ..Default::default()
        };
        let raw = toml::to_string(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.mode, TransportMode::Usb);
        assert_eq!(parsed.report_rate_hz, 60);
        assert_eq!(parsed.static_address.as_deref(), Some("C2:12:34:56:78:9A"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: AppConfig = toml::from_str("mode = \"usb\"").unwrap();
        assert_eq!(parsed.mode, TransportMode::Usb);
        assert_eq!(parsed.report_rate_hz, 100);
        assert_eq!(parsed.gadget_name, "hogpad");
    }
}
