//! Request/response framing over a [`Transport`].

use crate::config::ConnectionConfig;
use crate::error::{RfaError, RfaResult};
use crate::events::{DeviceEvent, EventSink};
use crate::protocol::{strip_frame, DEFAULT_TERMINATOR};
use crate::transport::Transport;
use std::time::{Duration, Instant};
use tracing::debug;

/// Line terminator and read timeout used for every exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolOptions {
    /// How long to wait for a complete reply line
    pub timeout: Duration,
    /// Byte ending both commands and replies
    pub terminator: u8,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            terminator: DEFAULT_TERMINATOR,
        }
    }
}

impl From<&ConnectionConfig> for ProtocolOptions {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            timeout: config.timeout(),
            terminator: config.terminator,
        }
    }
}

/// An open transport plus the framing rules for talking to the device.
///
/// Closed exactly once, either explicitly or on drop. Every exchange after
/// that fails with [`RfaError::NotConnected`].
pub struct DeviceHandle<T: Transport> {
    transport: Option<T>,
    options: ProtocolOptions,
}

impl<T: Transport> DeviceHandle<T> {
    /// Take ownership of an already opened transport
    pub fn new(transport: T, options: ProtocolOptions) -> Self {
        Self {
            transport: Some(transport),
            options,
        }
    }

    /// Framing options in use
    pub fn options(&self) -> ProtocolOptions {
        self.options
    }

    /// False once closed
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Send `command` and return the reply payload.
    ///
    /// Reads byte by byte until the terminator or the timeout. The reply
    /// prefix is stripped. A reply that never completes is not an error: the
    /// partial payload is returned and a [`DeviceEvent::ReplyTimeout`] is
    /// emitted.
    pub fn query(&mut self, command: &str, sink: &dyn EventSink) -> RfaResult<String> {
        let ProtocolOptions {
            timeout,
            terminator,
        } = self.options;
        let transport = self.transport.as_mut().ok_or(RfaError::NotConnected)?;

        transport.reset_input_buffer()?;
        let mut bytes = Vec::with_capacity(command.len() + 1);
        bytes.extend_from_slice(command.as_bytes());
        bytes.push(terminator);
        transport.write_all(&bytes)?;

        let deadline = Instant::now() + timeout;
        let mut line = Vec::with_capacity(32);
        let complete = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break false;
            }
            match transport.read_byte(remaining)? {
                Some(b) if b == terminator => break true,
                Some(b) => line.push(b),
                None => break false,
            }
        };

        let raw = String::from_utf8_lossy(&line);
        debug!(command, reply = %raw.escape_debug(), complete, "RFA exchange");

        let payload = strip_frame(&raw, terminator).to_string();
        if !complete {
            sink.emit(DeviceEvent::ReplyTimeout {
                command: command.to_string(),
                partial: payload.clone(),
            });
        }
        Ok(payload)
    }

    /// Release the transport. Closing twice is a no-op.
    pub fn close(&mut self) -> RfaResult<()> {
        if let Some(mut transport) = self.transport.take() {
            transport.close()?;
            debug!("RFA connection closed");
        }
        Ok(())
    }
}

impl<T: Transport> Drop for DeviceHandle<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("Error closing RFA connection: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use crate::transport::MockTransport;

    #[test]
    fn test_query_strips_frame() {
        let mock = MockTransport::new();
        mock.script_raw("WZ", b"001-42\r");
        let sink = RecordingSink::new();
        let mut handle = DeviceHandle::new(mock.clone(), ProtocolOptions::default());

        assert_eq!(handle.query("WZ", &sink).unwrap(), "-42");
        assert_eq!(mock.call_log(), vec!["WZ"]);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_query_discards_stale_input() {
        let mock = MockTransport::new();
        mock.push_unsolicited(b"999junk\r");
        let sink = RecordingSink::new();
        let mut handle = DeviceHandle::new(mock, ProtocolOptions::default());

        assert_eq!(handle.query("WHO", &sink).unwrap(), "Remote Focus Accessory (M)");
    }

    #[test]
    fn test_query_timeout_returns_partial() {
        let mock = MockTransport::new();
        mock.script_raw("WZ", b"00112");
        let sink = RecordingSink::new();
        let mut handle = DeviceHandle::new(mock, ProtocolOptions::default());

        assert_eq!(handle.query("WZ", &sink).unwrap(), "12");
        assert_eq!(
            sink.events(),
            vec![DeviceEvent::ReplyTimeout {
                command: "WZ".to_string(),
                partial: "12".to_string(),
            }]
        );
    }

    #[test]
    fn test_query_no_reply_is_empty() {
        let mock = MockTransport::new();
        mock.script_silence("HALT");
        let sink = RecordingSink::new();
        let mut handle = DeviceHandle::new(mock, ProtocolOptions::default());

        assert_eq!(handle.query("HALT", &sink).unwrap(), "");
        assert_eq!(sink.warnings().len(), 1);
    }

    #[test]
    fn test_custom_terminator() {
        let mock = MockTransport::new().with_terminator(b'\n');
        let sink = RecordingSink::new();
        let options = ProtocolOptions {
            terminator: b'\n',
            ..Default::default()
        };
        let mut handle = DeviceHandle::new(mock, options);

        assert_eq!(handle.query("RESOLUTION", &sink).unwrap(), "5 HUNDREDTHS");
    }

    #[test]
    fn test_closed_handle_rejects_queries() {
        let mock = MockTransport::new();
        let sink = RecordingSink::new();
        let mut handle = DeviceHandle::new(mock.clone(), ProtocolOptions::default());

        handle.close().unwrap();
        assert!(!handle.is_open());
        assert!(mock.is_closed());
        assert!(matches!(
            handle.query("WZ", &sink),
            Err(RfaError::NotConnected)
        ));
        // second close is a no-op
        assert!(handle.close().is_ok());
    }

    #[test]
    fn test_drop_closes_transport() {
        let mock = MockTransport::new();
        {
            let _handle = DeviceHandle::new(mock.clone(), ProtocolOptions::default());
        }
        assert!(mock.is_closed());
    }
}
