//! Parameter Codec
//!
//! Defines the polled parameter set, request encoding, and the decoding
//! formulas that turn fixed-format hexadecimal responses into engineering
//! units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EcuError;
use crate::mode;

/// Hex digits of header on a mode 01 response: service byte + echoed PID
const RESPONSE_HEADER_DIGITS: usize = 4;

/// Hex digits of header on a mode 09 PID 02 identity response
const IDENTITY_HEADER_DIGITS: usize = 10;

/// Manifold pressure is reported in kPa; limits are configured in PSI
const KPA_TO_PSI: f64 = 0.145;

/// Live-data parameters polled every monitoring tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Parameter {
    /// Engine RPM (0x0C)
    Rpm,
    /// Vehicle speed (0x0D)
    Speed,
    /// Engine coolant temperature (0x05)
    CoolantTemp,
    /// Intake air temperature (0x0F)
    IntakeTemp,
    /// Mass air flow rate (0x10)
    Maf,
    /// Throttle position (0x11)
    Throttle,
    /// Manifold absolute pressure (0x0B)
    Boost,
    /// Short-term fuel trim (0x06)
    FuelTrim,
    /// Timing advance (0x0E)
    IgnitionTiming,
    /// Engine oil temperature (0x5C)
    OilTemp,
}

impl Parameter {
    /// Full parameter set, in sweep order
    pub const ALL: [Parameter; 10] = [
        Parameter::Rpm,
        Parameter::Speed,
        Parameter::CoolantTemp,
        Parameter::IntakeTemp,
        Parameter::Maf,
        Parameter::Throttle,
        Parameter::Boost,
        Parameter::FuelTrim,
        Parameter::IgnitionTiming,
        Parameter::OilTemp,
    ];

    /// Get the PID hex value
    pub fn pid(&self) -> u8 {
        match self {
            Parameter::Rpm => 0x0C,
            Parameter::Speed => 0x0D,
            Parameter::CoolantTemp => 0x05,
            Parameter::IntakeTemp => 0x0F,
            Parameter::Maf => 0x10,
            Parameter::Throttle => 0x11,
            Parameter::Boost => 0x0B,
            Parameter::FuelTrim => 0x06,
            Parameter::IgnitionTiming => 0x0E,
            Parameter::OilTemp => 0x5C,
        }
    }

    /// Field name used in readings and logs
    pub fn name(&self) -> &'static str {
        match self {
            Parameter::Rpm => "rpm",
            Parameter::Speed => "speed",
            Parameter::CoolantTemp => "coolantTemp",
            Parameter::IntakeTemp => "intakeTemp",
            Parameter::Maf => "maf",
            Parameter::Throttle => "throttle",
            Parameter::Boost => "boost",
            Parameter::FuelTrim => "fuelTrim",
            Parameter::IgnitionTiming => "ignitionTiming",
            Parameter::OilTemp => "oilTemp",
        }
    }
}

/// Encode a mode 01 live-data query for `parameter`
pub fn encode_read_request(parameter: Parameter) -> String {
    format!("{:02X}{:02X}", mode::CURRENT_DATA, parameter.pid())
}

/// Encode the mode 09 PID 02 vehicle identity query
pub fn encode_identity_request() -> String {
    format!("{:02X}{:02X}", mode::VEHICLE_INFO, mode::PID_VIN)
}

/// Encode a tuning write: service `22` + 4-hex-digit address + 4-hex-digit value
pub fn encode_write_request(address: u16, value: u16) -> String {
    format!("{:02X}{address:04X}{value:04X}", mode::WRITE_PARAMETER)
}

/// Decode a raw response line for `parameter` into engineering units.
///
/// Offsets are into the whitespace-stripped hex string; the response
/// header (service byte + echoed PID) is skipped. Short or non-hex
/// payloads fail with [`EcuError::Decode`].
pub fn decode(parameter: Parameter, raw: &str) -> Result<f64, EcuError> {
    let hex = strip_whitespace(raw);

    let value = match parameter {
        // ((A*256)+B)/4
        Parameter::Rpm => word(&hex)? as f64 / 4.0,
        // A (km/h)
        Parameter::Speed => byte(&hex)? as f64,
        // A - 40
        Parameter::CoolantTemp | Parameter::IntakeTemp => byte(&hex)? as f64 - 40.0,
        // ((A*256)+B)/100 (g/s)
        Parameter::Maf => word(&hex)? as f64 / 100.0,
        // A * 100 / 255 (%)
        Parameter::Throttle => byte(&hex)? as f64 * 100.0 / 255.0,
        // A kPa, reported in PSI
        Parameter::Boost => byte(&hex)? as f64 * KPA_TO_PSI,
        // A, as-is
        Parameter::FuelTrim | Parameter::IgnitionTiming | Parameter::OilTemp => {
            byte(&hex)? as f64
        }
    };

    Ok(value)
}

/// Decode a vehicle identity response into a VIN string.
///
/// Skips the identity header, then reads each byte pair as one ASCII
/// character, trimming surrounding whitespace.
pub fn decode_identity(raw: &str) -> Result<String, EcuError> {
    let hex = strip_whitespace(raw);
    let payload = hex.get(IDENTITY_HEADER_DIGITS..).ok_or_else(|| {
        EcuError::Decode(format!("identity response too short: {raw:?}"))
    })?;

    let mut vin = String::with_capacity(payload.len() / 2);
    for pair in payload.as_bytes().chunks_exact(2) {
        let digits = std::str::from_utf8(pair)
            .map_err(|_| EcuError::Decode(format!("non-ASCII identity payload: {raw:?}")))?;
        let code = u8::from_str_radix(digits, 16)
            .map_err(|_| EcuError::Decode(format!("non-hex identity payload: {raw:?}")))?;
        vin.push(code as char);
    }

    Ok(vin.trim().to_string())
}

fn strip_whitespace(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Extract a payload field of `digits` hex digits past the response header
fn field(hex: &str, digits: usize) -> Result<u32, EcuError> {
    let end = RESPONSE_HEADER_DIGITS + digits;
    let slice = hex
        .get(RESPONSE_HEADER_DIGITS..end)
        .ok_or_else(|| EcuError::Decode(format!("response too short: {hex:?}")))?;
    u32::from_str_radix(slice, 16)
        .map_err(|_| EcuError::Decode(format!("non-hex payload: {slice:?}")))
}

fn byte(hex: &str) -> Result<u32, EcuError> {
    field(hex, 2)
}

fn word(hex: &str) -> Result<u32, EcuError> {
    field(hex, 4)
}

/// One composite snapshot of live engine telemetry.
///
/// Produced once per monitoring tick and handed to listeners; a
/// parameter whose read or decode failed that tick is `None` and is
/// omitted from the serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveReading {
    /// Wall-clock time of the tick that produced this reading
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coolant_temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intake_temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maf: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttle: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuel_trim: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignition_timing: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oil_temp: Option<f64>,
}

impl LiveReading {
    /// Create an empty reading stamped with the tick time
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            rpm: None,
            speed: None,
            coolant_temp: None,
            intake_temp: None,
            maf: None,
            throttle: None,
            boost: None,
            fuel_trim: None,
            ignition_timing: None,
            oil_temp: None,
        }
    }

    /// Record a decoded value for `parameter`
    pub fn set(&mut self, parameter: Parameter, value: f64) {
        match parameter {
            Parameter::Rpm => self.rpm = Some(value),
            Parameter::Speed => self.speed = Some(value),
            Parameter::CoolantTemp => self.coolant_temp = Some(value),
            Parameter::IntakeTemp => self.intake_temp = Some(value),
            Parameter::Maf => self.maf = Some(value),
            Parameter::Throttle => self.throttle = Some(value),
            Parameter::Boost => self.boost = Some(value),
            Parameter::FuelTrim => self.fuel_trim = Some(value),
            Parameter::IgnitionTiming => self.ignition_timing = Some(value),
            Parameter::OilTemp => self.oil_temp = Some(value),
        }
    }

    /// Look up the decoded value for `parameter`, if present this tick
    pub fn get(&self, parameter: Parameter) -> Option<f64> {
        match parameter {
            Parameter::Rpm => self.rpm,
            Parameter::Speed => self.speed,
            Parameter::CoolantTemp => self.coolant_temp,
            Parameter::IntakeTemp => self.intake_temp,
            Parameter::Maf => self.maf,
            Parameter::Throttle => self.throttle,
            Parameter::Boost => self.boost,
            Parameter::FuelTrim => self.fuel_trim,
            Parameter::IgnitionTiming => self.ignition_timing,
            Parameter::OilTemp => self.oil_temp,
        }
    }

    /// Number of parameters that decoded this tick
    pub fn decoded_count(&self) -> usize {
        Parameter::ALL
            .iter()
            .filter(|p| self.get(**p).is_some())
            .count()
    }
}
