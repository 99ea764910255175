//! Byte-level transports and port discovery.
//!
//! The controller talks to the device through the [`Transport`] trait and finds
//! ports through [`PortDiscovery`]. Two implementations ship with the crate:
//!
//! - [`SerialTransport`] / [`SystemPorts`] (feature `instrument_serial`):
//!   real serial ports via the `serialport` crate.
//! - [`MockTransport`]: a simulated RFA for tests and dry runs.

use crate::error::{RfaError, RfaResult};
use crate::events::{DeviceEvent, EventSink};
use std::io;
use std::time::Duration;

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;

pub use mock::{MockTransport, StaticPorts};
#[cfg(feature = "instrument_serial")]
pub use serial::{SerialTransport, SystemPorts};

/// Blocking byte channel to a single device.
pub trait Transport: Send {
    /// Write every byte of `bytes`.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read one byte, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>>;

    /// Discard anything already received but not yet read.
    fn reset_input_buffer(&mut self) -> io::Result<()>;

    /// Release the underlying channel.
    fn close(&mut self) -> io::Result<()>;
}

/// A port reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Address used to open the port (e.g. "/dev/ttyUSB0", "COM3")
    pub address: String,
    /// USB vendor id, if the port is USB-backed
    pub vendor_id: Option<u16>,
    /// USB product id, if the port is USB-backed
    pub product_id: Option<u16>,
    /// Human-readable description
    pub description: String,
}

impl PortInfo {
    /// True if the port carries exactly this vendor/product pair.
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == Some(vendor_id) && self.product_id == Some(product_id)
    }
}

/// Enumerates available ports.
pub trait PortDiscovery {
    /// List every port currently visible to the host.
    fn list_ports(&self) -> RfaResult<Vec<PortInfo>>;
}

/// Where the controller should connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSelector {
    /// Open this address directly.
    Address(String),
    /// Search discovered ports for this vendor/product pair.
    UsbId {
        /// USB vendor id of the serial chip
        vendor_id: u16,
        /// USB product id of the serial chip
        product_id: u16,
    },
}

impl PortSelector {
    /// Build a selector from optional inputs. An address wins over ids.
    pub fn from_parts(
        address: Option<&str>,
        vendor_id: Option<u16>,
        product_id: Option<u16>,
    ) -> RfaResult<Self> {
        match (address, vendor_id, product_id) {
            (Some(address), _, _) if !address.is_empty() => {
                Ok(PortSelector::Address(address.to_string()))
            }
            (_, Some(vendor_id), Some(product_id)) => Ok(PortSelector::UsbId {
                vendor_id,
                product_id,
            }),
            _ => Err(RfaError::Configuration(
                "If port is not supplied, vendor_id and product_id need to be supplied".to_string(),
            )),
        }
    }

    /// Resolve to a concrete address, searching `discovery` when needed.
    ///
    /// Several matches are not fatal: the first one is used and an
    /// [`DeviceEvent::AmbiguousDevice`] is emitted.
    pub fn resolve(
        &self,
        discovery: &dyn PortDiscovery,
        sink: &dyn EventSink,
    ) -> RfaResult<String> {
        let (vendor_id, product_id) = match self {
            PortSelector::Address(address) => return Ok(address.clone()),
            PortSelector::UsbId {
                vendor_id,
                product_id,
            } => (*vendor_id, *product_id),
        };

        let matches: Vec<String> = discovery
            .list_ports()?
            .into_iter()
            .filter(|p| p.matches(vendor_id, product_id))
            .map(|p| p.address)
            .collect();

        let Some(chosen) = matches.first().cloned() else {
            return Err(RfaError::NoMatchingPort {
                vendor_id,
                product_id,
            });
        };

        if matches.len() > 1 {
            sink.emit(DeviceEvent::AmbiguousDevice {
                matches,
                chosen: chosen.clone(),
            });
        }
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;

    fn port(address: &str, vid: u16, pid: u16) -> PortInfo {
        PortInfo {
            address: address.to_string(),
            vendor_id: Some(vid),
            product_id: Some(pid),
            description: "USB Serial".to_string(),
        }
    }

    #[test]
    fn test_selector_requires_port_or_ids() {
        assert!(matches!(
            PortSelector::from_parts(None, Some(6790), None),
            Err(RfaError::Configuration(_))
        ));
        assert!(PortSelector::from_parts(Some(""), None, None).is_err());
        assert_eq!(
            PortSelector::from_parts(Some("COM3"), Some(1), Some(2)).unwrap(),
            PortSelector::Address("COM3".to_string())
        );
    }

    #[test]
    fn test_resolve_single_match() {
        let ports = StaticPorts::new(vec![
            port("/dev/ttyUSB0", 0x0403, 0x6001),
            port("/dev/ttyUSB1", 6790, 29987),
        ]);
        let sink = RecordingSink::new();
        let selector = PortSelector::UsbId {
            vendor_id: 6790,
            product_id: 29987,
        };

        assert_eq!(selector.resolve(&ports, &sink).unwrap(), "/dev/ttyUSB1");
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_resolve_no_match_is_fatal() {
        let ports = StaticPorts::new(vec![port("/dev/ttyUSB0", 0x0403, 0x6001)]);
        let sink = RecordingSink::new();
        let selector = PortSelector::UsbId {
            vendor_id: 6790,
            product_id: 29987,
        };

        assert!(matches!(
            selector.resolve(&ports, &sink),
            Err(RfaError::NoMatchingPort {
                vendor_id: 6790,
                product_id: 29987
            })
        ));
    }

    #[test]
    fn test_resolve_ambiguous_uses_first() {
        let ports = StaticPorts::new(vec![
            port("/dev/ttyUSB3", 6790, 29987),
            port("/dev/ttyUSB0", 6790, 29987),
        ]);
        let sink = RecordingSink::new();
        let selector = PortSelector::UsbId {
            vendor_id: 6790,
            product_id: 29987,
        };

        assert_eq!(selector.resolve(&ports, &sink).unwrap(), "/dev/ttyUSB3");
        assert_eq!(
            sink.events(),
            vec![DeviceEvent::AmbiguousDevice {
                matches: vec!["/dev/ttyUSB3".to_string(), "/dev/ttyUSB0".to_string()],
                chosen: "/dev/ttyUSB3".to_string(),
            }]
        );
    }
}
