//! Mock RFA transport for testing
//!
//! [`MockTransport`] simulates a Remote Focus Accessory without hardware. It
//! provides:
//! - a device model that answers every known command with a framed reply
//! - scripted replies per command keyword (malformed payloads, raw bytes,
//!   silence) for failure injection
//! - a command log for test verification
//!
//! Clones share the same device, so a test can hand one handle to the
//! controller and keep the other for assertions.
//!
//! # Example
//!
//! ```
//! use nikon_rfa::transport::{MockTransport, Transport};
//! use std::time::Duration;
//!
//! let mut mock = MockTransport::new();
//! mock.write_all(b"WZ\r").unwrap();
//! let mut line = Vec::new();
//! while let Some(b) = mock.read_byte(Duration::from_millis(10)).unwrap() {
//!     line.push(b);
//! }
//! assert_eq!(line, b"0010\r");
//! ```

use crate::error::RfaResult;
use crate::protocol::{DEFAULT_TERMINATOR, EXPECTED_IDENTITY};
use crate::transport::{PortDiscovery, PortInfo, Transport};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Default reply prefix used by the simulated device.
pub const MOCK_REPLY_PREFIX: &str = "001";

/// A scripted answer to the next command with a given keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Scripted {
    /// Framed normally (prefix + payload + terminator)
    Payload(String),
    /// Sent exactly as given
    Raw(Vec<u8>),
    /// No reply at all
    Silent,
}

#[derive(Debug)]
struct SimulatedRfa {
    terminator: u8,
    prefix: String,
    identity: String,
    firmware: String,
    resolution: String,
    position_units: i64,
    encoder_on: bool,
    max_speed: u32,
    min_speed: u32,
    ramp_slope: u32,
    /// Moves are accepted but the stage does not move
    stuck: bool,
    closed: bool,
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
    scripted: HashMap<String, VecDeque<Scripted>>,
    call_log: Vec<String>,
}

impl SimulatedRfa {
    fn new() -> Self {
        Self {
            terminator: DEFAULT_TERMINATOR,
            prefix: MOCK_REPLY_PREFIX.to_string(),
            identity: EXPECTED_IDENTITY.to_string(),
            firmware: "1.03".to_string(),
            resolution: "5 HUNDREDTHS".to_string(),
            position_units: 0,
            encoder_on: true,
            max_speed: 1000,
            min_speed: 5000,
            ramp_slope: 20,
            stuck: false,
            closed: false,
            inbox: Vec::new(),
            outbox: VecDeque::new(),
            scripted: HashMap::new(),
            call_log: Vec::new(),
        }
    }

    fn receive(&mut self, bytes: &[u8]) {
        self.inbox.extend_from_slice(bytes);
        while let Some(end) = self.inbox.iter().position(|b| *b == self.terminator) {
            let line: Vec<u8> = self.inbox.drain(..=end).collect();
            let command = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            self.handle(command);
        }
    }

    fn handle(&mut self, command: String) {
        let keyword = command.split_whitespace().next().unwrap_or("").to_string();
        self.call_log.push(command.clone());

        let scripted = self
            .scripted
            .get_mut(&keyword)
            .and_then(|queue| queue.pop_front());

        match scripted {
            Some(Scripted::Payload(payload)) => self.frame(&payload),
            Some(Scripted::Raw(raw)) => self.outbox.extend(raw),
            Some(Scripted::Silent) => {}
            None => {
                let payload = self.execute(&keyword, &command);
                self.frame(&payload);
            }
        }
    }

    fn frame(&mut self, payload: &str) {
        self.outbox.extend(self.prefix.as_bytes());
        self.outbox.extend(payload.as_bytes());
        self.outbox.push_back(self.terminator);
    }

    fn execute(&mut self, keyword: &str, command: &str) -> String {
        let arg = command
            .split_whitespace()
            .nth(1)
            .and_then(|a| a.parse::<i64>().ok());

        match (keyword, arg) {
            ("WHO", _) => self.identity.clone(),
            ("VERSION", _) => self.firmware.clone(),
            ("RESOLUTION", _) => self.resolution.clone(),
            ("WZ", _) => self.position_units.to_string(),
            ("ENCODER", _) => match command.split_whitespace().nth(1) {
                Some("ON") => {
                    self.encoder_on = true;
                    String::new()
                }
                Some("OFF") => {
                    self.encoder_on = false;
                    String::new()
                }
                _ if self.encoder_on => "ON ".to_string(),
                _ => "OFF".to_string(),
            },
            ("MZ", Some(units)) => {
                if !self.stuck {
                    self.position_units = units;
                }
                String::new()
            }
            ("RZ", Some(units)) => {
                if !self.stuck {
                    self.position_units += units;
                }
                String::new()
            }
            ("HZ", Some(units)) => {
                self.position_units = units;
                String::new()
            }
            ("ZERO", _) | ("RESET", _) => {
                self.position_units = 0;
                String::new()
            }
            ("HALT", _) => String::new(),
            ("SPEED", None) => self.max_speed.to_string(),
            ("SPEED", Some(v)) => {
                self.max_speed = v as u32;
                String::new()
            }
            ("MINSPEED", None) => self.min_speed.to_string(),
            ("MINSPEED", Some(v)) => {
                self.min_speed = v as u32;
                String::new()
            }
            ("RAMPSLOPE", None) => self.ramp_slope.to_string(),
            ("RAMPSLOPE", Some(v)) => {
                self.ramp_slope = v as u32;
                String::new()
            }
            _ => "ERR".to_string(),
        }
    }
}

/// Simulated RFA implementing [`Transport`].
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<SimulatedRfa>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A genuine-looking RFA at position 0, 5 hundredths resolution, encoder on
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimulatedRfa::new())),
        }
    }

    /// Use a different line terminator
    pub fn with_terminator(self, terminator: u8) -> Self {
        self.state.lock().terminator = terminator;
        self
    }

    /// Report this string for `WHO`
    pub fn with_identity(self, identity: &str) -> Self {
        self.state.lock().identity = identity.to_string();
        self
    }

    /// Report this payload for `RESOLUTION` (e.g. `"2 TENTHS"`)
    pub fn with_resolution(self, resolution: &str) -> Self {
        self.state.lock().resolution = resolution.to_string();
        self
    }

    /// Start with the encoder switched on or off
    pub fn with_encoder(self, on: bool) -> Self {
        self.state.lock().encoder_on = on;
        self
    }

    /// Start at this position, in device units
    pub fn with_position_units(self, units: i64) -> Self {
        self.state.lock().position_units = units;
        self
    }

    /// Accept moves without changing position
    pub fn set_stuck(&self, stuck: bool) {
        self.state.lock().stuck = stuck;
    }

    /// Answer the next command with this keyword using `payload` instead of the model
    pub fn script_reply(&self, keyword: &str, payload: &str) {
        self.script(keyword, Scripted::Payload(payload.to_string()));
    }

    /// Answer the next command with this keyword with exactly these bytes
    pub fn script_raw(&self, keyword: &str, raw: &[u8]) {
        self.script(keyword, Scripted::Raw(raw.to_vec()));
    }

    /// Do not answer the next command with this keyword
    pub fn script_silence(&self, keyword: &str) {
        self.script(keyword, Scripted::Silent);
    }

    fn script(&self, keyword: &str, reply: Scripted) {
        self.state
            .lock()
            .scripted
            .entry(keyword.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Queue bytes that arrive without being asked for
    pub fn push_unsolicited(&self, bytes: &[u8]) {
        self.state.lock().outbox.extend(bytes.iter().copied());
    }

    /// Every command line received, terminator stripped
    pub fn call_log(&self) -> Vec<String> {
        self.state.lock().call_log.clone()
    }

    /// Clear the command log
    pub fn clear_log(&self) {
        self.state.lock().call_log.clear();
    }

    /// Current simulated position in device units
    pub fn position_units(&self) -> i64 {
        self.state.lock().position_units
    }

    /// Current simulated encoder state
    pub fn encoder_on(&self) -> bool {
        self.state.lock().encoder_on
    }

    /// Current simulated `SPEED`, `MINSPEED` and `RAMPSLOPE`
    pub fn motion_parameters(&self) -> (u32, u32, u32) {
        let state = self.state.lock();
        (state.max_speed, state.min_speed, state.ramp_slope)
    }

    /// True once `close` was called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn ensure_open(state: &SimulatedRfa) -> io::Result<()> {
        if state.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "mock transport closed",
            ));
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.receive(bytes);
        Ok(())
    }

    fn read_byte(&mut self, _timeout: Duration) -> io::Result<Option<u8>> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        Ok(state.outbox.pop_front())
    }

    fn reset_input_buffer(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.outbox.clear();
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Discovery returning a fixed list of ports.
#[derive(Debug, Clone, Default)]
pub struct StaticPorts {
    ports: Vec<PortInfo>,
}

impl StaticPorts {
    /// Discovery that always reports `ports`, in this order
    pub fn new(ports: Vec<PortInfo>) -> Self {
        Self { ports }
    }
}

impl PortDiscovery for StaticPorts {
    fn list_ports(&self) -> RfaResult<Vec<PortInfo>> {
        Ok(self.ports.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_line(mock: &mut MockTransport) -> Vec<u8> {
        let mut line = Vec::new();
        while let Some(b) = mock.read_byte(Duration::from_millis(1)).unwrap() {
            line.push(b);
        }
        line
    }

    #[test]
    fn test_model_answers_queries() {
        let mut mock = MockTransport::new().with_position_units(-42);
        mock.write_all(b"WZ\r").unwrap();
        assert_eq!(read_line(&mut mock), b"001-42\r");

        mock.write_all(b"RESOLUTION\r").unwrap();
        assert_eq!(read_line(&mut mock), b"0015 HUNDREDTHS\r");
    }

    #[test]
    fn test_moves_update_position() {
        let mut mock = MockTransport::new();
        mock.write_all(b"MZ 1000\rRZ -250\r").unwrap();
        assert_eq!(mock.position_units(), 750);
        assert_eq!(mock.call_log(), vec!["MZ 1000", "RZ -250"]);

        mock.set_stuck(true);
        mock.write_all(b"MZ 0\r").unwrap();
        assert_eq!(mock.position_units(), 750);
    }

    #[test]
    fn test_scripted_replies_are_consumed_once() {
        let mut mock = MockTransport::new();
        mock.script_reply("WZ", "garbage");
        mock.write_all(b"WZ\r").unwrap();
        assert_eq!(read_line(&mut mock), b"001garbage\r");
        mock.write_all(b"WZ\r").unwrap();
        assert_eq!(read_line(&mut mock), b"0010\r");
    }

    #[test]
    fn test_silence_and_reset() {
        let mut mock = MockTransport::new();
        mock.script_silence("WHO");
        mock.write_all(b"WHO\r").unwrap();
        assert!(read_line(&mut mock).is_empty());

        mock.push_unsolicited(b"stale");
        mock.reset_input_buffer().unwrap();
        assert!(read_line(&mut mock).is_empty());
    }

    #[test]
    fn test_closed_transport_errors() {
        let mut mock = MockTransport::new();
        let handle = mock.clone();
        mock.close().unwrap();
        assert!(handle.is_closed());
        assert!(mock.write_all(b"WZ\r").is_err());
    }
}
