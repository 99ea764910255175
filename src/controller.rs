//! Nikon Remote Focus Accessory (RFA) controller
//!
//! [`FocusController`] turns method calls into RFA commands, converts between
//! micrometers and device units and keeps a position cache so repeated
//! position reads do not hit the serial line when nothing has moved.
//!
//! # Example Usage
//!
//! ```no_run
//! use nikon_rfa::config::RfaConfig;
//! use nikon_rfa::controller::FocusController;
//! use nikon_rfa::events::TracingSink;
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = RfaConfig::load_from("config/rfa.toml")?;
//!     let mut rfa = FocusController::open(&config, Arc::new(TracingSink))?;
//!
//!     // Move to 12.5 um and confirm where the stage ended up
//!     let pos = rfa.move_absolute_and_read(12.5)?;
//!     println!("Position: {:?} um", pos);
//!
//!     rfa.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # Position cache
//!
//! Every move marks the cache stale before the device has confirmed anything.
//! [`FocusController::position`] only talks to the device when the cache is
//! stale; [`FocusController::cached_position`] never does.

use crate::config::{RfaConfig, SerialSettings};
use crate::error::RfaResult;
use crate::events::{DeviceEvent, EventSink};
use crate::handle::{DeviceHandle, ProtocolOptions};
use crate::protocol::{
    clamp_to_range, parse_encoder_status, parse_integer, parse_resolution, parse_unsigned,
    Command, UnitScale, EXPECTED_IDENTITY, RAMP_SLOPE_RANGE, SPEED_RANGE,
};
use crate::transport::{PortDiscovery, Transport};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[cfg(feature = "instrument_serial")]
use crate::transport::{SerialTransport, SystemPorts};

/// Last known position and whether it can still be trusted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionCache {
    /// Position in micrometers
    pub value_um: f64,
    /// True when a move (or reset) was issued since the last successful read
    pub stale: bool,
}

impl PositionCache {
    fn unknown() -> Self {
        Self {
            value_um: 0.0,
            stale: true,
        }
    }
}

/// What the device reported about itself during connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Reply to `WHO`
    pub identity: String,
    /// Reply to `VERSION`, only queried when the identity matched
    pub firmware: Option<String>,
}

/// Driver for a single RFA focus axis.
pub struct FocusController<T: Transport> {
    handle: DeviceHandle<T>,
    scale: UnitScale,
    cache: PositionCache,
    info: DeviceInfo,
    sink: Arc<dyn EventSink>,
}

impl<T: Transport> FocusController<T> {
    /// Run the connection sequence on an already opened transport.
    ///
    /// `WHO` (then `VERSION` if the identity matches), `RESOLUTION`, `ENCODER`
    /// (switched on if off) and finally `WZ` to seed the position cache.
    ///
    /// # Errors
    /// Transport failures and an unusable `RESOLUTION` reply abort the
    /// sequence; the transport is closed in that case. An identity mismatch
    /// is only reported.
    pub fn connect(
        transport: T,
        options: ProtocolOptions,
        sink: Arc<dyn EventSink>,
    ) -> RfaResult<Self> {
        let mut handle = DeviceHandle::new(transport, options);

        let identity = handle.query(&Command::Who.to_string(), sink.as_ref())?;
        let firmware = if identity == EXPECTED_IDENTITY {
            let firmware = handle.query(&Command::Version.to_string(), sink.as_ref())?;
            sink.emit(DeviceEvent::Connected {
                identity: identity.clone(),
                firmware: firmware.clone(),
            });
            Some(firmware)
        } else {
            sink.emit(DeviceEvent::IdentityMismatch {
                reported: identity.clone(),
            });
            None
        };

        let resolution = handle.query(&Command::Resolution.to_string(), sink.as_ref())?;
        let scale = parse_resolution(&resolution)?;
        sink.emit(DeviceEvent::ResolutionDetected {
            units_per_um: scale.units_per_um,
            smallest_step_um: scale.smallest_step_um,
        });

        let mut controller = Self {
            handle,
            scale,
            cache: PositionCache::unknown(),
            info: DeviceInfo { identity, firmware },
            sink,
        };

        if controller.encoder_enabled()? != Some(true) {
            controller.set_encoder(true)?;
        }
        controller.read_position()?;

        Ok(controller)
    }

    /// Resolve the port described by `config`, open it with `open` and connect.
    ///
    /// `open` receives the resolved address, the serial settings and the
    /// read timeout. Searching by vendor/product id goes through `discovery`.
    pub fn open_with<F>(
        config: &RfaConfig,
        discovery: &dyn PortDiscovery,
        sink: Arc<dyn EventSink>,
        open: F,
    ) -> RfaResult<Self>
    where
        F: FnOnce(&str, &SerialSettings, Duration) -> RfaResult<T>,
    {
        config.validate()?;
        let address = config
            .connection
            .selector()?
            .resolve(discovery, sink.as_ref())?;

        info!(port = %address, "Opening RFA connection");
        let transport = open(&address, &config.serial, config.connection.timeout())?;
        Self::connect(transport, ProtocolOptions::from(&config.connection), sink)
    }

    /// Send a raw command and return the reply payload.
    pub fn query(&mut self, command: &str) -> RfaResult<String> {
        self.handle.query(command, self.sink.as_ref())
    }

    fn exchange(&mut self, command: Command) -> RfaResult<String> {
        self.query(&command.to_string())
    }

    /// Send a command whose only valid reply is an empty payload.
    fn command(&mut self, command: Command) -> RfaResult<()> {
        let reply = self.exchange(command)?;
        if !reply.is_empty() {
            self.warn_unexpected(command, reply, "expected empty reply");
        }
        Ok(())
    }

    fn warn_unexpected(&self, command: Command, reply: String, reason: &str) {
        self.sink.emit(DeviceEvent::ProtocolWarning {
            command: command.to_string(),
            reply,
            reason: reason.to_string(),
        });
    }

    // =========================================================================
    // Motion
    // =========================================================================

    /// Move to an absolute position in micrometers (`MZ`).
    ///
    /// Marks the position cache stale before anything is confirmed.
    pub fn move_absolute(&mut self, um: f64) -> RfaResult<()> {
        let units = self.scale.to_device_units(um);
        self.cache.stale = true;
        self.command(Command::MoveAbsolute(units))
    }

    /// Move to an absolute position and return the position read afterwards.
    ///
    /// Emits [`DeviceEvent::NoMotion`] when the position did not change.
    pub fn move_absolute_and_read(&mut self, um: f64) -> RfaResult<Option<f64>> {
        self.move_and_read(|c| c.move_absolute(um))
    }

    /// Move by a relative distance in micrometers (`RZ`).
    pub fn move_relative(&mut self, um: f64) -> RfaResult<()> {
        let units = self.scale.to_device_units(um);
        self.cache.stale = true;
        self.command(Command::MoveRelative(units))
    }

    /// Move by a relative distance and return the position read afterwards.
    pub fn move_relative_and_read(&mut self, um: f64) -> RfaResult<Option<f64>> {
        self.move_and_read(|c| c.move_relative(um))
    }

    fn move_and_read<F>(&mut self, do_move: F) -> RfaResult<Option<f64>>
    where
        F: FnOnce(&mut Self) -> RfaResult<()>,
    {
        let before = self.position()?;
        do_move(self)?;
        let after = self.position()?;

        if let (Some(before), Some(after)) = (before, after) {
            if before == after {
                self.sink.emit(DeviceEvent::NoMotion { position_um: after });
            }
        }
        Ok(after)
    }

    /// Stop the current move (`HALT`).
    pub fn halt(&mut self) -> RfaResult<()> {
        self.command(Command::Halt)
    }

    /// Reset the device as if power was cycled (`RESET`).
    ///
    /// The cached position is stale afterwards.
    pub fn reset(&mut self) -> RfaResult<()> {
        self.cache.stale = true;
        self.command(Command::Reset)
    }

    /// Make the current physical position the origin (`ZERO`).
    pub fn zero_here(&mut self) -> RfaResult<()> {
        self.command(Command::Zero)?;
        self.cache.value_um = 0.0;
        Ok(())
    }

    /// Relabel the current physical position as `um` without moving (`HZ`).
    pub fn redefine_position(&mut self, um: f64) -> RfaResult<()> {
        let units = self.scale.to_device_units(um);
        self.command(Command::RedefinePosition(units))?;
        self.cache.value_um = um;
        Ok(())
    }

    // =========================================================================
    // Position
    // =========================================================================

    /// Read the position from the device (`WZ`) and refresh the cache.
    ///
    /// A reply that is not an integer is reported and leaves the cache as it
    /// was; `None` is returned in that case.
    pub fn read_position(&mut self) -> RfaResult<Option<f64>> {
        let reply = self.exchange(Command::ReadPosition)?;
        match parse_integer(&reply) {
            Some(units) => {
                let um = self.scale.to_micrometers(units);
                self.cache = PositionCache {
                    value_um: um,
                    stale: false,
                };
                Ok(Some(um))
            }
            None => {
                self.warn_unexpected(Command::ReadPosition, reply, "expected integer position");
                Ok(None)
            }
        }
    }

    /// Current position, reading the device only when the cache is stale.
    pub fn position(&mut self) -> RfaResult<Option<f64>> {
        if self.cache.stale {
            self.read_position()
        } else {
            Ok(Some(self.cache.value_um))
        }
    }

    /// Cached position without any device I/O.
    pub fn cached_position(&self) -> PositionCache {
        self.cache
    }

    // =========================================================================
    // Motion parameters
    // =========================================================================

    /// Maximum speed (`SPEED`), 50-60000 where 60000 is slowest.
    pub fn max_speed(&mut self) -> RfaResult<Option<u32>> {
        self.read_parameter(Command::MaxSpeed(None))
    }

    /// Set the maximum speed, clamped to 50-60000. Returns the value sent.
    pub fn set_max_speed(&mut self, value: i64) -> RfaResult<u32> {
        self.write_parameter("SPEED", &SPEED_RANGE, value, |v| Command::MaxSpeed(Some(v)))
    }

    /// Start-up speed (`MINSPEED`), 50-60000 where 60000 is slowest.
    pub fn min_speed(&mut self) -> RfaResult<Option<u32>> {
        self.read_parameter(Command::MinSpeed(None))
    }

    /// Set the start-up speed, clamped to 50-60000. Returns the value sent.
    pub fn set_min_speed(&mut self, value: i64) -> RfaResult<u32> {
        self.write_parameter("MINSPEED", &SPEED_RANGE, value, |v| Command::MinSpeed(Some(v)))
    }

    /// Acceleration ramp (`RAMPSLOPE`), 1-255 where larger is slower.
    pub fn ramp_slope(&mut self) -> RfaResult<Option<u32>> {
        self.read_parameter(Command::RampSlope(None))
    }

    /// Set the acceleration ramp, clamped to 1-255. Returns the value sent.
    pub fn set_ramp_slope(&mut self, value: i64) -> RfaResult<u32> {
        self.write_parameter("RAMPSLOPE", &RAMP_SLOPE_RANGE, value, |v| {
            Command::RampSlope(Some(v))
        })
    }

    fn read_parameter(&mut self, command: Command) -> RfaResult<Option<u32>> {
        let reply = self.exchange(command)?;
        let value = parse_unsigned(&reply);
        if value.is_none() {
            self.warn_unexpected(command, reply, "expected integer");
        }
        Ok(value)
    }

    fn write_parameter<F>(
        &mut self,
        parameter: &'static str,
        range: &RangeInclusive<u32>,
        value: i64,
        make: F,
    ) -> RfaResult<u32>
    where
        F: FnOnce(u32) -> Command,
    {
        let (applied, clamped) = clamp_to_range(value, range);
        if clamped {
            self.sink.emit(DeviceEvent::RangeClamp {
                parameter,
                requested: value,
                applied,
            });
        }
        self.command(make(applied))?;
        Ok(applied)
    }

    // =========================================================================
    // Encoder
    // =========================================================================

    /// Encoder status (`ENCODER`); `None` if the reply was not recognised.
    pub fn encoder_enabled(&mut self) -> RfaResult<Option<bool>> {
        let reply = self.exchange(Command::EncoderStatus)?;
        let status = parse_encoder_status(&reply);
        if status.is_none() {
            self.warn_unexpected(Command::EncoderStatus, reply, "expected ON or OFF");
        }
        Ok(status)
    }

    /// Switch the encoder on or off (`ENCODER ON` / `ENCODER OFF`).
    pub fn set_encoder(&mut self, enabled: bool) -> RfaResult<()> {
        self.command(Command::SetEncoder(enabled))?;
        self.sink.emit(DeviceEvent::EncoderChanged { enabled });
        Ok(())
    }

    // =========================================================================
    // Unit scale and device info
    // =========================================================================

    /// Device units per micrometer (10.0 or 100.0)
    pub fn units_per_micrometer(&self) -> f64 {
        self.scale.units_per_um
    }

    /// Smallest step in micrometers
    pub fn smallest_step_um(&self) -> f64 {
        self.scale.smallest_step_um
    }

    /// Override the smallest step. The device reports 0 for sub-micrometer
    /// steps, so callers that know better can store the real value here.
    pub fn set_smallest_step_um(&mut self, um: f64) {
        if um != self.scale.smallest_step_um {
            self.sink.emit(DeviceEvent::SmallestStepChanged {
                from: self.scale.smallest_step_um,
                to: um,
            });
            self.scale.smallest_step_um = um;
        }
    }

    /// Unit conversion currently in use
    pub fn scale(&self) -> UnitScale {
        self.scale
    }

    /// Identity and firmware reported at connection
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Release the transport. The controller cannot be used afterwards.
    pub fn close(mut self) -> RfaResult<()> {
        self.handle.close()
    }
}

#[cfg(feature = "instrument_serial")]
impl FocusController<SerialTransport> {
    /// Open a real serial port as described by `config` and connect.
    pub fn open(config: &RfaConfig, sink: Arc<dyn EventSink>) -> RfaResult<Self> {
        Self::open_with(config, &SystemPorts, sink, SerialTransport::open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use crate::transport::MockTransport;

    fn connected(mock: &MockTransport) -> (FocusController<MockTransport>, RecordingSink) {
        let sink = RecordingSink::new();
        let controller = FocusController::connect(
            mock.clone(),
            ProtocolOptions::default(),
            Arc::new(sink.clone()),
        )
        .unwrap();
        mock.clear_log();
        sink.clear();
        (controller, sink)
    }

    #[test]
    fn test_move_absolute_marks_stale() {
        let mock = MockTransport::new();
        let (mut rfa, _sink) = connected(&mock);

        assert!(!rfa.cached_position().stale);
        rfa.move_absolute(12.5).unwrap();
        assert!(rfa.cached_position().stale);
        assert_eq!(mock.call_log(), vec!["MZ 1250"]);
    }

    #[test]
    fn test_zero_and_redefine_keep_staleness() {
        let mock = MockTransport::new();
        let (mut rfa, _sink) = connected(&mock);

        rfa.move_relative(3.0).unwrap();
        rfa.zero_here().unwrap();
        assert_eq!(rfa.cached_position().value_um, 0.0);
        assert!(rfa.cached_position().stale);

        rfa.read_position().unwrap();
        rfa.redefine_position(-7.25).unwrap();
        assert_eq!(
            rfa.cached_position(),
            PositionCache {
                value_um: -7.25,
                stale: false
            }
        );
        assert_eq!(mock.position_units(), -725);
    }

    #[test]
    fn test_reset_marks_stale() {
        let mock = MockTransport::new();
        let (mut rfa, _sink) = connected(&mock);

        rfa.reset().unwrap();
        assert!(rfa.cached_position().stale);
        assert_eq!(mock.call_log(), vec!["RESET"]);
    }

    #[test]
    fn test_smallest_step_override() {
        let mock = MockTransport::new();
        let (mut rfa, sink) = connected(&mock);

        assert_eq!(rfa.smallest_step_um(), 5.0);
        rfa.set_smallest_step_um(5.0);
        assert!(sink.events().is_empty());

        rfa.set_smallest_step_um(0.05);
        assert_eq!(rfa.smallest_step_um(), 0.05);
        assert_eq!(
            sink.events(),
            vec![DeviceEvent::SmallestStepChanged { from: 5.0, to: 0.05 }]
        );
    }
}
