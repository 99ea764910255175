//! Configuration system using Figment
//!
//! Configuration is merged from, in increasing precedence:
//! 1. built-in defaults
//! 2. a TOML file (default: `config/rfa.toml`)
//! 3. environment variables prefixed with `RFA_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! RFA_CONNECTION__PORT=/dev/ttyUSB0
//! RFA_CONNECTION__TIMEOUT_MS=500
//! RFA_SERIAL__BAUD_RATE=19200
//! ```
//!
//! # Example
//!
//! ```no_run
//! use nikon_rfa::config::RfaConfig;
//!
//! fn main() -> Result<(), nikon_rfa::RfaError> {
//!     let config = RfaConfig::load_from("config/rfa.toml")?;
//!     println!("Timeout: {:?}", config.connection.timeout());
//!     Ok(())
//! }
//! ```

use crate::error::{RfaError, RfaResult};
use crate::protocol::DEFAULT_TERMINATOR;
use crate::transport::PortSelector;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/rfa.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RfaConfig {
    /// How to find and talk to the device
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Serial line settings
    #[serde(default)]
    pub serial: SerialSettings,
}

/// Device address, discovery ids and protocol timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Port address (e.g., "/dev/ttyUSB0", "COM3"). Takes precedence over ids.
    #[serde(default)]
    pub port: Option<String>,
    /// USB vendor id of the serial chip, used when `port` is not set
    #[serde(default)]
    pub vendor_id: Option<u16>,
    /// USB product id of the serial chip, used when `port` is not set
    #[serde(default)]
    pub product_id: Option<u16>,
    /// Per-reply read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Line terminator byte
    #[serde(default = "default_terminator")]
    pub terminator: u8,
}

/// Serial line settings passed to the port on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits (5-8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Parity
    #[serde(default)]
    pub parity: Parity,
    /// Stop bits (1 or 2)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Flow control
    #[serde(default)]
    pub flow_control: FlowControl,
}

/// Parity modes for serial communication
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Flow control modes for serial communication
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    /// No flow control
    #[default]
    None,
    /// XON/XOFF
    Software,
    /// RTS/CTS
    Hardware,
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_terminator() -> u8 {
    DEFAULT_TERMINATOR
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: None,
            vendor_id: None,
            product_id: None,
            timeout_ms: default_timeout_ms(),
            terminator: default_terminator(),
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::None,
            stop_bits: default_stop_bits(),
            flow_control: FlowControl::None,
        }
    }
}

impl ConnectionConfig {
    /// Read timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Where to connect, as described by this config
    pub fn selector(&self) -> RfaResult<PortSelector> {
        PortSelector::from_parts(self.port.as_deref(), self.vendor_id, self.product_id)
    }
}

impl RfaConfig {
    /// Load configuration from the default file location
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load() -> RfaResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific TOML file plus `RFA_` environment overrides
    pub fn load_from<P: AsRef<Path>>(path: P) -> RfaResult<Self> {
        let config: Self = Self::figment(path).extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Merged configuration sources, not yet extracted or validated
    ///
    /// Useful when further overrides (e.g. command-line flags) still have to
    /// be applied before validation.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(RfaConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RFA_").split("__"))
    }

    /// Check values that parse but cannot work
    pub fn validate(&self) -> RfaResult<()> {
        if self.connection.timeout_ms == 0 {
            return Err(RfaError::Configuration(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.serial.baud_rate == 0 {
            return Err(RfaError::Configuration(
                "baud_rate must be greater than zero".to_string(),
            ));
        }
        if !(5..=8).contains(&self.serial.data_bits) {
            return Err(RfaError::Configuration(format!(
                "data_bits must be 5-8, got {}",
                self.serial.data_bits
            )));
        }
        if !matches!(self.serial.stop_bits, 1 | 2) {
            return Err(RfaError::Configuration(format!(
                "stop_bits must be 1 or 2, got {}",
                self.serial.stop_bits
            )));
        }
        self.connection.selector()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> RfaConfig {
        RfaConfig {
            connection: ConnectionConfig {
                port: Some("/dev/ttyUSB0".to_string()),
                ..Default::default()
            },
            serial: SerialSettings::default(),
        }
    }

    #[test]
    fn test_defaults() {
        let config = RfaConfig::default();
        assert_eq!(config.connection.timeout(), Duration::from_secs(2));
        assert_eq!(config.connection.terminator, b'\r');
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.parity, Parity::None);
        assert_eq!(config.serial.flow_control, FlowControl::None);
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_port_and_ids() {
        let config = RfaConfig::default();
        assert!(matches!(
            config.validate(),
            Err(RfaError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_stop_bits() {
        let mut config = valid_config();
        config.serial.stop_bits = 3;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stop_bits"));
    }

    #[test]
    fn test_zero_timeout() {
        let mut config = valid_config();
        config.connection.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ids_select_usb_search() {
        let mut config = RfaConfig::default();
        config.connection.vendor_id = Some(6790);
        config.connection.product_id = Some(29987);
        assert_eq!(
            config.connection.selector().unwrap(),
            PortSelector::UsbId {
                vendor_id: 6790,
                product_id: 29987
            }
        );
    }
}
