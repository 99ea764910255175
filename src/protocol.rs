//! RFA wire protocol.
//!
//! Protocol Overview:
//! - Format: one ASCII command per line, `<COMMAND>[ <integer>]<terminator>`
//! - Terminator: a single configurable byte, carriage return by default
//! - Replies: `<3-char prefix><payload><terminator>`
//! - Encoding: positions and speeds are decimal integers in device units
//! - Timing: strict request/response, no pipelining
//!
//! # Commands
//!
//! | Command        | Direction | Meaning                                      |
//! |----------------|-----------|----------------------------------------------|
//! | `WHO`          | r         | device identity                              |
//! | `VERSION`      | r         | firmware version                             |
//! | `RESOLUTION`   | r         | `<step> HUNDREDTHS` or `<step> TENTHS`       |
//! | `WZ`           | r         | current position                             |
//! | `ENCODER`      | rw        | encoder status, `ENCODER ON/OFF` to change   |
//! | `MZ n`         | w         | absolute move                                |
//! | `RZ n`         | w         | relative move                                |
//! | `HZ n`         | w         | relabel current position                     |
//! | `HALT`         | w         | stop motion                                  |
//! | `RESET`        | w         | reset as if power-cycled                     |
//! | `ZERO`         | w         | set origin to current position               |
//! | `SPEED [n]`    | rw        | max speed, 50-60000 (60000 is slowest)       |
//! | `MINSPEED [n]` | rw        | start-up speed, 50-60000                     |
//! | `RAMPSLOPE [n]`| rw        | acceleration, 1-255 (larger is slower)       |
//!
//! Everything in this module is pure; the controller owns the I/O.

use crate::error::{RfaError, RfaResult};
use std::fmt;
use std::ops::RangeInclusive;

/// Identity string returned by `WHO` on a genuine RFA.
pub const EXPECTED_IDENTITY: &str = "Remote Focus Accessory (M)";

/// Length of the fixed prefix the device puts in front of every reply.
pub const REPLY_PREFIX_LEN: usize = 3;

/// Default line terminator (carriage return).
pub const DEFAULT_TERMINATOR: u8 = b'\r';

/// Valid range for `SPEED` and `MINSPEED`.
pub const SPEED_RANGE: RangeInclusive<u32> = 50..=60000;

/// Valid range for `RAMPSLOPE`.
pub const RAMP_SLOPE_RANGE: RangeInclusive<u32> = 1..=255;

/// A command understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `WHO`
    Who,
    /// `VERSION`
    Version,
    /// `RESOLUTION`
    Resolution,
    /// `WZ`
    ReadPosition,
    /// `ENCODER`
    EncoderStatus,
    /// `ENCODER ON` / `ENCODER OFF`
    SetEncoder(bool),
    /// `MZ <units>`
    MoveAbsolute(i64),
    /// `RZ <units>`
    MoveRelative(i64),
    /// `HZ <units>`
    RedefinePosition(i64),
    /// `HALT`
    Halt,
    /// `RESET`
    Reset,
    /// `ZERO`
    Zero,
    /// `SPEED` or `SPEED <v>`
    MaxSpeed(Option<u32>),
    /// `MINSPEED` or `MINSPEED <v>`
    MinSpeed(Option<u32>),
    /// `RAMPSLOPE` or `RAMPSLOPE <v>`
    RampSlope(Option<u32>),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Who => f.write_str("WHO"),
            Command::Version => f.write_str("VERSION"),
            Command::Resolution => f.write_str("RESOLUTION"),
            Command::ReadPosition => f.write_str("WZ"),
            Command::EncoderStatus => f.write_str("ENCODER"),
            Command::SetEncoder(true) => f.write_str("ENCODER ON"),
            Command::SetEncoder(false) => f.write_str("ENCODER OFF"),
            Command::MoveAbsolute(units) => write!(f, "MZ {}", units),
            Command::MoveRelative(units) => write!(f, "RZ {}", units),
            Command::RedefinePosition(units) => write!(f, "HZ {}", units),
            Command::Halt => f.write_str("HALT"),
            Command::Reset => f.write_str("RESET"),
            Command::Zero => f.write_str("ZERO"),
            Command::MaxSpeed(v) => with_optional_arg(f, "SPEED", *v),
            Command::MinSpeed(v) => with_optional_arg(f, "MINSPEED", *v),
            Command::RampSlope(v) => with_optional_arg(f, "RAMPSLOPE", *v),
        }
    }
}

fn with_optional_arg(f: &mut fmt::Formatter<'_>, name: &str, arg: Option<u32>) -> fmt::Result {
    match arg {
        Some(v) => write!(f, "{} {}", name, v),
        None => f.write_str(name),
    }
}

impl Command {
    /// Wire bytes for this command, terminator included.
    pub fn encode(&self, terminator: u8) -> Vec<u8> {
        let mut bytes = self.to_string().into_bytes();
        bytes.push(terminator);
        bytes
    }
}

/// Strip the reply envelope from one received line.
///
/// `line` is everything read before the terminator. A trailing terminator is
/// tolerated and removed as well. Lines shorter than the prefix yield an empty
/// payload.
pub fn strip_frame(line: &str, terminator: u8) -> &str {
    let line = line.strip_suffix(terminator as char).unwrap_or(line);
    line.get(REPLY_PREFIX_LEN..).unwrap_or("")
}

/// Conversion between micrometers and device units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitScale {
    /// Device units per micrometer (10.0 or 100.0)
    pub units_per_um: f64,
    /// Smallest step the device accepts, in micrometers
    pub smallest_step_um: f64,
}

impl UnitScale {
    /// Micrometers to device units, rounded to the nearest integer.
    pub fn to_device_units(&self, um: f64) -> i64 {
        (um * self.units_per_um).round() as i64
    }

    /// Device units to micrometers.
    pub fn to_micrometers(&self, units: i64) -> f64 {
        units as f64 / self.units_per_um
    }
}

/// Parse a `RESOLUTION` reply such as `"5 HUNDREDTHS"`.
pub fn parse_resolution(reply: &str) -> RfaResult<UnitScale> {
    let unsupported = || RfaError::UnsupportedResolution(reply.to_string());

    let mut tokens = reply.split_whitespace();
    let (Some(step), Some(word), None) = (tokens.next(), tokens.next(), tokens.next()) else {
        return Err(unsupported());
    };

    let units_per_um = match word {
        "HUNDREDTHS" => 100.0,
        "TENTHS" => 10.0,
        _ => return Err(unsupported()),
    };
    let step: i64 = step.parse().map_err(|_| unsupported())?;

    Ok(UnitScale {
        units_per_um,
        smallest_step_um: step as f64,
    })
}

/// Parse an `ENCODER` reply. The device pads `ON` with a trailing space.
pub fn parse_encoder_status(reply: &str) -> Option<bool> {
    match reply.trim_end() {
        "ON" => Some(true),
        "OFF" => Some(false),
        _ => None,
    }
}

/// Parse a signed decimal integer reply (`WZ`).
pub fn parse_integer(reply: &str) -> Option<i64> {
    reply.trim().parse().ok()
}

/// Parse an unsigned decimal reply (`SPEED`, `MINSPEED`, `RAMPSLOPE`).
pub fn parse_unsigned(reply: &str) -> Option<u32> {
    reply.trim().parse().ok()
}

/// Clamp `value` into `range`, returning the applied value and whether it changed.
pub fn clamp_to_range(value: i64, range: &RangeInclusive<u32>) -> (u32, bool) {
    let lo = i64::from(*range.start());
    let hi = i64::from(*range.end());
    let applied = value.clamp(lo, hi);
    // `applied` is within u32 bounds after clamping
    (applied as u32, applied != value)
}
