//! Custom error types for the driver.
//!
//! `RfaError` covers only the failures that abort an operation: bad
//! configuration, a port search with no result, an unusable resolution reply
//! and transport-level I/O problems. Protocol oddities that the device can
//! recover from (unexpected replies, clamped values, a stage that did not
//! move) are not errors; they are reported as [`crate::events::DeviceEvent`]s.

use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type RfaResult<T> = std::result::Result<T, RfaError>;

#[derive(Error, Debug)]
pub enum RfaError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),

    #[error("No serial port found for vid={vendor_id} pid={product_id}")]
    NoMatchingPort { vendor_id: u16, product_id: u16 },

    #[error("Unsupported resolution reply: '{0}'")]
    UnsupportedResolution(String),

    #[error("Device connection is closed")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "instrument_serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl From<figment::Error> for RfaError {
    fn from(err: figment::Error) -> Self {
        RfaError::ConfigLoad(Box::new(err))
    }
}
