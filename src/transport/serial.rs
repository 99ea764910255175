//! Serial port transport for the RFA.
//!
//! Wraps the `serialport` crate. Reads are done one byte at a time: the port's
//! own timeout is set per call so `read_byte` returns `None` instead of
//! blocking past the caller's deadline.

use crate::config::{FlowControl, Parity, SerialSettings};
use crate::error::RfaResult;
use crate::transport::{PortDiscovery, PortInfo, Transport};
use serialport::{ClearBuffer, SerialPort, SerialPortType};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

/// Transport backed by a real serial port.
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,
    /// None once closed
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open `port_name` with the given line settings
    ///
    /// # Errors
    /// Returns error if the serial port cannot be opened
    pub fn open(port_name: &str, settings: &SerialSettings, timeout: Duration) -> RfaResult<Self> {
        let port = serialport::new(port_name, settings.baud_rate)
            .data_bits(data_bits(settings.data_bits))
            .parity(parity(settings.parity))
            .stop_bits(stop_bits(settings.stop_bits))
            .flow_control(flow_control(settings.flow_control))
            .timeout(timeout)
            .open()?;

        debug!(
            "Serial port '{}' opened at {} baud",
            port_name, settings.baud_rate
        );

        Ok(Self {
            port_name: port_name.to_string(),
            port: Some(port),
        })
    }

    /// Name the port was opened with
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()
    }

    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        let port = self.port()?;
        port.set_timeout(timeout)?;

        let mut buffer = [0u8; 1];
        match port.read(&mut buffer) {
            Ok(1) => Ok(Some(buffer[0])),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn reset_input_buffer(&mut self) -> io::Result<()> {
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
        Ok(())
    }
}

/// Discovery over the host's serial ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortDiscovery for SystemPorts {
    fn list_ports(&self) -> RfaResult<Vec<PortInfo>> {
        let ports = serialport::available_ports()?
            .into_iter()
            .map(|p| match p.port_type {
                SerialPortType::UsbPort(usb) => PortInfo {
                    address: p.port_name,
                    vendor_id: Some(usb.vid),
                    product_id: Some(usb.pid),
                    description: usb.product.unwrap_or_default(),
                },
                SerialPortType::PciPort => PortInfo {
                    address: p.port_name,
                    vendor_id: None,
                    product_id: None,
                    description: "PCI".to_string(),
                },
                _ => PortInfo {
                    address: p.port_name,
                    vendor_id: None,
                    product_id: None,
                    description: String::new(),
                },
            })
            .collect();
        Ok(ports)
    }
}

fn data_bits(bits: u8) -> serialport::DataBits {
    match bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    }
}

fn stop_bits(bits: u8) -> serialport::StopBits {
    match bits {
        2 => serialport::StopBits::Two,
        _ => serialport::StopBits::One,
    }
}

fn parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

fn flow_control(flow: FlowControl) -> serialport::FlowControl {
    match flow {
        FlowControl::None => serialport::FlowControl::None,
        FlowControl::Software => serialport::FlowControl::Software,
        FlowControl::Hardware => serialport::FlowControl::Hardware,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_mapping() {
        assert_eq!(data_bits(7), serialport::DataBits::Seven);
        assert_eq!(stop_bits(2), serialport::StopBits::Two);
        assert_eq!(parity(Parity::Even), serialport::Parity::Even);
        assert_eq!(
            flow_control(FlowControl::Software),
            serialport::FlowControl::Software
        );
    }

    #[test]
    fn test_open_missing_port_fails() {
        let result = SerialTransport::open(
            "/dev/does-not-exist-rfa",
            &SerialSettings::default(),
            Duration::from_millis(100),
        );
        assert!(result.is_err());
    }
}
