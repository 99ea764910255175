//! Host-side driver for the Nikon Remote Focus Accessory (RFA).
//!
//! The RFA is a single-axis motorized focus drive controlled over a
//! line-oriented ASCII serial protocol. This crate hides command framing,
//! micrometer/device-unit conversion and reply validation behind
//! [`FocusController`].
//!
//! # Layout
//!
//! - [`protocol`] - command encoding, reply parsing, unit conversion
//! - [`handle`] - request/response exchange over a transport
//! - [`controller`] - the driver itself, with its position cache
//! - [`transport`] - serial port, simulated device and port discovery
//! - [`events`] - non-fatal device signals and the sinks receiving them
//! - [`config`] - Figment-based configuration
//! - [`error`] - fatal errors
//!
//! # Features
//!
//! - `instrument_serial` (default) - real serial ports via `serialport`

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod handle;
pub mod protocol;
pub mod transport;

pub use config::RfaConfig;
pub use controller::{DeviceInfo, FocusController, PositionCache};
pub use error::{RfaError, RfaResult};
pub use events::{DeviceEvent, EventSink, RecordingSink, TracingSink};
pub use handle::ProtocolOptions;
pub use transport::{MockTransport, PortDiscovery, PortInfo, PortSelector, Transport};
