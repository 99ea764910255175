//! Structured device events.
//!
//! The controller never logs through a global logger directly. Every
//! non-fatal condition it observes (an unexpected reply, a clamped setting, a
//! stage that did not move, ...) is turned into a [`DeviceEvent`] and handed to
//! the [`EventSink`] supplied at construction.
//!
//! Two sinks ship with the crate:
//!
//! - [`TracingSink`] forwards events to `tracing` at the event's level. This is
//!   the sink used by the `rfa` binary.
//! - [`RecordingSink`] keeps every event in memory so tests can assert on the
//!   exact sequence of signals.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::Level;

/// A non-fatal signal emitted by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Port search by vendor/product id matched more than one port.
    AmbiguousDevice {
        /// Addresses of every matching port, in discovery order
        matches: Vec<String>,
        /// The address that was used
        chosen: String,
    },
    /// `WHO` returned something other than the expected device name.
    IdentityMismatch {
        /// Identity string reported by the device
        reported: String,
    },
    /// Device identified itself correctly.
    Connected {
        /// Identity string reported by the device
        identity: String,
        /// Firmware version reported by `VERSION`
        firmware: String,
    },
    /// `RESOLUTION` was parsed.
    ResolutionDetected {
        /// Device units per micrometer
        units_per_um: f64,
        /// Smallest step in micrometers
        smallest_step_um: f64,
    },
    /// A reply did not have the expected shape.
    ProtocolWarning {
        /// Command that produced the reply
        command: String,
        /// Reply payload after frame stripping
        reply: String,
        /// What was expected instead
        reason: String,
    },
    /// No terminator was seen before the read timeout.
    ReplyTimeout {
        /// Command that was sent
        command: String,
        /// Whatever payload had accumulated
        partial: String,
    },
    /// Position unchanged after a commanded move.
    NoMotion {
        /// Position before and after the move, in micrometers
        position_um: f64,
    },
    /// A motion parameter was outside its valid range and got clamped.
    RangeClamp {
        /// Parameter name (`SPEED`, `MINSPEED`, `RAMPSLOPE`)
        parameter: &'static str,
        /// Value requested by the caller
        requested: i64,
        /// Value actually sent to the device
        applied: u32,
    },
    /// Encoder was switched on or off.
    EncoderChanged {
        /// New encoder state
        enabled: bool,
    },
    /// The user overrode the smallest step size.
    SmallestStepChanged {
        /// Previous value in micrometers
        from: f64,
        /// New value in micrometers
        to: f64,
    },
}

impl DeviceEvent {
    /// Log level this event is reported at.
    pub fn level(&self) -> Level {
        match self {
            DeviceEvent::AmbiguousDevice { .. }
            | DeviceEvent::IdentityMismatch { .. }
            | DeviceEvent::ProtocolWarning { .. }
            | DeviceEvent::ReplyTimeout { .. }
            | DeviceEvent::NoMotion { .. }
            | DeviceEvent::RangeClamp { .. } => Level::WARN,
            DeviceEvent::Connected { .. }
            | DeviceEvent::ResolutionDetected { .. }
            | DeviceEvent::SmallestStepChanged { .. } => Level::INFO,
            DeviceEvent::EncoderChanged { .. } => Level::DEBUG,
        }
    }

    /// Returns true for events reported at warning level.
    pub fn is_warning(&self) -> bool {
        self.level() == Level::WARN
    }
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEvent::AmbiguousDevice { matches, chosen } => write!(
                f,
                "Multiple matches found ({}). Using first one: {}",
                matches.len(),
                chosen
            ),
            DeviceEvent::IdentityMismatch { reported } => {
                write!(f, "Device did not identify (got '{}')", reported)
            }
            DeviceEvent::Connected { identity, firmware } => {
                write!(f, "Connected to {}, firmware: {}", identity, firmware)
            }
            DeviceEvent::ResolutionDetected {
                units_per_um,
                smallest_step_um,
            } => write!(
                f,
                "Resolution {} units/um, smallest step {} um",
                units_per_um, smallest_step_um
            ),
            DeviceEvent::ProtocolWarning {
                command,
                reply,
                reason,
            } => write!(
                f,
                "Unexpected message for {}: '{}' ({})",
                command, reply, reason
            ),
            DeviceEvent::ReplyTimeout { command, partial } => {
                write!(f, "Reply to {} timed out (partial: '{}')", command, partial)
            }
            DeviceEvent::NoMotion { position_um } => write!(
                f,
                "Stage didn't move from {} um. Perhaps step too small or out of range.",
                position_um
            ),
            DeviceEvent::RangeClamp {
                parameter,
                requested,
                applied,
            } => write!(
                f,
                "{} {} out of range, clamped to {}",
                parameter, requested, applied
            ),
            DeviceEvent::EncoderChanged { enabled } => {
                write!(f, "Setting encoder status {}", if *enabled { "ON" } else { "OFF" })
            }
            DeviceEvent::SmallestStepChanged { from, to } => {
                write!(f, "Modifying smallest step from {} um to {} um", from, to)
            }
        }
    }
}

/// Receiver for controller events.
pub trait EventSink: Send + Sync {
    /// Handle one event.
    fn emit(&self, event: DeviceEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: DeviceEvent) {
        let level = event.level();
        if level == Level::WARN {
            tracing::warn!(event = ?event, "{}", event);
        } else if level == Level::INFO {
            tracing::info!("{}", event);
        } else {
            tracing::debug!("{}", event);
        }
    }
}

/// In-memory sink keeping every event, in order.
///
/// Clones share the same buffer, so a test can keep one handle and give the
/// other to the controller.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<DeviceEvent>>>,
}

impl RecordingSink {
    /// Create an empty recording sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events recorded so far
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().clone()
    }

    /// Only the warning-level events
    pub fn warnings(&self) -> Vec<DeviceEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.is_warning())
            .cloned()
            .collect()
    }

    /// Drop everything recorded so far
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: DeviceEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_levels() {
        let clamp = DeviceEvent::RangeClamp {
            parameter: "SPEED",
            requested: 10,
            applied: 50,
        };
        assert_eq!(clamp.level(), Level::WARN);
        assert!(clamp.is_warning());

        let step = DeviceEvent::SmallestStepChanged { from: 5.0, to: 0.05 };
        assert_eq!(step.level(), Level::INFO);
        assert!(!step.is_warning());
    }

    #[test]
    fn test_recording_sink_shares_buffer() {
        let sink = RecordingSink::new();
        let handle = sink.clone();

        sink.emit(DeviceEvent::EncoderChanged { enabled: true });
        sink.emit(DeviceEvent::NoMotion { position_um: 1.5 });

        assert_eq!(handle.events().len(), 2);
        assert_eq!(handle.warnings(), vec![DeviceEvent::NoMotion { position_um: 1.5 }]);

        handle.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    #[traced_test]
    fn test_tracing_sink_logs_warning() {
        TracingSink.emit(DeviceEvent::IdentityMismatch {
            reported: "XYZ".to_string(),
        });
        assert!(logs_contain("Device did not identify"));
        assert!(logs_contain("WARN"));
    }
}
