//! # Reading
//!
//! One sampled data point and its compact JSON encoding.

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};

use crate::error::{LoggerError, Result};

/// Maximum encoded reading size in bytes
pub const MAX_PAYLOAD_BYTES: usize = 512;

/// Timestamp format carried in the `ts` key
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A complete GPS fix: location, altitude, satellites and UTC time
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Fix {
    #[serde(rename = "lat")]
    pub latitude: f64,

    #[serde(rename = "lng")]
    pub longitude: f64,

    /// Altitude above mean sea level in metres
    #[serde(rename = "alt")]
    pub altitude: f64,

    #[serde(rename = "sat")]
    pub satellites: u32,

    #[serde(rename = "ts", serialize_with = "serialize_timestamp")]
    pub timestamp: NaiveDateTime,
}

/// One sampling cycle's data
///
/// Temperature and humidity anchor every reading; the fix is attached only
/// when the GPS produced a fresh one since the previous reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Temperature in °C
    #[serde(rename = "tmp")]
    pub temperature: f32,

    /// Relative humidity in %
    #[serde(rename = "hmd")]
    pub humidity: f32,

    #[serde(flatten)]
    pub fix: Option<Fix>,
}

fn serialize_timestamp<S: Serializer>(
    timestamp: &NaiveDateTime,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(&timestamp.format(TIMESTAMP_FORMAT))
}

impl Reading {
    /// Create a reading without location data
    pub fn new(temperature: f32, humidity: f32) -> Self {
        Self {
            temperature,
            humidity,
            fix: None,
        }
    }

    /// Attach a GPS fix
    #[must_use]
    pub fn with_fix(mut self, fix: Fix) -> Self {
        self.fix = Some(fix);
        self
    }

    /// Encode as a single-line JSON payload
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::EncodingOverflow`] if the payload would exceed
    /// [`MAX_PAYLOAD_BYTES`]. The reading is never truncated.
    ///
    /// # Examples
    ///
    /// ```
    /// use field_logger::telemetry::Reading;
    ///
    /// let payload = Reading::new(21.5, 40.25).encode().unwrap();
    /// assert_eq!(payload, r#"{"tmp":21.5,"hmd":40.25}"#);
    /// ```
    pub fn encode(&self) -> Result<String> {
        let payload =
            serde_json::to_string(self).map_err(|e| LoggerError::Encoding(e.to_string()))?;

        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(LoggerError::EncodingOverflow {
                size: payload.len(),
                limit: MAX_PAYLOAD_BYTES,
            });
        }

        Ok(payload)
    }
}
