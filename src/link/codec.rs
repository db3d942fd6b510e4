//! JSON wire encoding for commands and telemetry.
//!
//! Commands carry only the fields that are set. Telemetry replies are parsed
//! strictly first; if that fails, [`decode_fallback`] scrapes whatever
//! `key:value` integer pairs it can find so a damaged reply still yields a
//! reading.

use serde::{Deserialize, Serialize};

use super::error::LinkError;

/// Receive buffer size. Longer datagrams are truncated by the socket.
pub const MAX_PAYLOAD: usize = 1024;

/// Outbound control message.
///
/// `angle` (0-180) and `speed` (0-100) are expected to be clamped by the
/// caller; the transport does not re-validate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Command {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<u8>,
    #[serde(rename = "status", default, skip_serializing_if = "Option::is_none")]
    pub status_request: Option<bool>,
}

impl Command {
    /// Steering and propulsion update.
    pub fn control(angle: Option<u8>, speed: Option<u8>) -> Self {
        Self { angle, speed, status_request: None }
    }

    /// Asks the peer for one telemetry reply.
    pub fn status_request() -> Self {
        Self { angle: None, speed: None, status_request: Some(true) }
    }

    pub fn is_status_request(&self) -> bool {
        self.status_request == Some(true)
    }

    /// A command with nothing set is valid but changes nothing on the peer.
    pub fn is_noop(&self) -> bool {
        self.angle.is_none() && self.speed.is_none() && self.status_request.is_none()
    }
}

/// Inbound status reading.
///
/// Latitude and longitude are opaque peer-defined integers, not degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Telemetry {
    /// Wi-Fi signal strength in dBm.
    pub wifi_signal_level: i64,
    /// Raw battery reading in millivolts.
    #[serde(rename = "battery_voltage")]
    pub battery_voltage_millivolts: i64,
    pub latitude: i64,
    pub longitude: i64,
    /// Compass heading in degrees, 0-360 (not enforced).
    #[serde(rename = "course")]
    pub course_degrees: i64,
}

impl Telemetry {
    pub fn battery_voltage_volts(&self) -> f64 {
        self.battery_voltage_millivolts as f64 / 1000.0
    }

    /// Signal quality mapped from -90 dBm (0%) to -30 dBm (100%).
    pub fn wifi_signal_percent(&self) -> f64 {
        ((90 + self.wifi_signal_level) as f64 / 60.0 * 100.0).clamp(0.0, 100.0)
    }

    /// Charge estimate over the 3000-4200 mV single-cell range.
    pub fn battery_percent(&self) -> f64 {
        ((self.battery_voltage_millivolts - 3000) as f64 / 1200.0 * 100.0).clamp(0.0, 100.0)
    }
}

pub fn encode_command(command: &Command) -> Vec<u8> {
    // Struct of plain integers and booleans, serialization cannot fail.
    serde_json::to_vec(command).unwrap_or_default()
}

pub fn encode_telemetry(telemetry: &Telemetry) -> Vec<u8> {
    serde_json::to_vec(telemetry).unwrap_or_default()
}

/// Strict decode of a telemetry reply. All five keys must be present;
/// unknown keys are ignored.
pub fn decode_telemetry(bytes: &[u8]) -> Result<Telemetry, LinkError> {
    serde_json::from_slice(bytes).map_err(|e| LinkError::Decode(e.to_string()))
}

/// Decode used by the simulated peer to read incoming commands.
pub fn decode_command(bytes: &[u8]) -> Result<Command, LinkError> {
    serde_json::from_slice(bytes).map_err(|e| LinkError::Decode(e.to_string()))
}

/// Best-effort telemetry scrape that never fails.
///
/// Strips braces, quotes and whitespace, splits on `,` and `:` and keeps
/// every recognised key whose value parses as an integer. Returns the
/// reading together with the number of fields recovered; unrecognised
/// fields stay at zero.
pub fn decode_fallback(bytes: &[u8]) -> (Telemetry, usize) {
    let text = String::from_utf8_lossy(bytes);
    let content: String = text.chars().filter(|c| !matches!(c, '{' | '}' | '"') && !c.is_whitespace()).collect();

    let mut telemetry = Telemetry::default();
    let mut recovered = 0;

    for pair in content.split(',') {
        let mut parts = pair.split(':');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let Ok(value) = value.parse::<i64>() else {
            continue;
        };
        let field = match key {
            "wifi_signal_level" => &mut telemetry.wifi_signal_level,
            "battery_voltage" => &mut telemetry.battery_voltage_millivolts,
            "latitude" => &mut telemetry.latitude,
            "longitude" => &mut telemetry.longitude,
            "course" => &mut telemetry.course_degrees,
            _ => continue,
        };
        *field = value;
        recovered += 1;
    }

    (telemetry, recovered)
}

/// Strict decode, then fallback. `None` when neither path recovers a field.
pub fn decode_telemetry_lenient(bytes: &[u8]) -> Option<Telemetry> {
    match decode_telemetry(bytes) {
        Ok(telemetry) => Some(telemetry),
        Err(e) => {
            log::debug!("Strict telemetry decode failed ({}), falling back", e);
            match decode_fallback(bytes) {
                (_, 0) => {
                    log::warn!("Unusable telemetry payload: {}", String::from_utf8_lossy(bytes));
                    None
                }
                (telemetry, recovered) => {
                    log::debug!("Fallback decode recovered {} field(s)", recovered);
                    Some(telemetry)
                }
            }
        }
    }
}
