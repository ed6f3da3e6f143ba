//! Temperature/humidity probe abstraction and the Linux IIO implementation

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{LoggerError, Result};

/// IIO channel holding temperature in milli-degrees Celsius
const TEMPERATURE_CHANNEL: &str = "in_temp_input";

/// IIO channel holding relative humidity in milli-percent
const HUMIDITY_CHANNEL: &str = "in_humidityrelative_input";

/// DHT22 operating range
const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = -40.0..=80.0;
const HUMIDITY_RANGE: std::ops::RangeInclusive<f32> = 0.0..=100.0;

/// One probe measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Temperature in °C
    pub temperature: f32,
    /// Relative humidity in %
    pub humidity: f32,
}

/// Trait for temperature/humidity probes
#[cfg_attr(test, mockall::automock)]
pub trait Probe: Send {
    /// Take one measurement from the hardware
    fn measure(&mut self) -> Result<Measurement>;
}

/// DHT11/DHT22 probe exposed by the kernel `dht11` IIO driver
///
/// The driver performs the single-wire handshake on every read of a channel
/// file and returns `EIO` when the sensor does not answer.
#[derive(Debug, Clone)]
pub struct IioProbe {
    device: PathBuf,
}

impl IioProbe {
    /// # Arguments
    ///
    /// * `device` - IIO device directory, e.g. `/sys/bus/iio/devices/iio:device0`
    pub fn new<P: Into<PathBuf>>(device: P) -> Self {
        Self {
            device: device.into(),
        }
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Read a milli-unit channel and scale it to units
    fn read_channel(&self, channel: &str) -> Result<f32> {
        let path = self.device.join(channel);
        let raw = fs::read_to_string(&path)
            .map_err(|e| LoggerError::Probe(format!("{}: {}", path.display(), e)))?;

        let milli: i32 = raw.trim().parse().map_err(|_| {
            LoggerError::Probe(format!("{}: unexpected value {:?}", path.display(), raw.trim()))
        })?;

        Ok(milli as f32 / 1000.0)
    }
}

impl Probe for IioProbe {
    fn measure(&mut self) -> Result<Measurement> {
        let temperature = self.read_channel(TEMPERATURE_CHANNEL)?;
        let humidity = self.read_channel(HUMIDITY_CHANNEL)?;

        if !TEMPERATURE_RANGE.contains(&temperature) {
            return Err(LoggerError::Probe(format!(
                "temperature {} °C out of range",
                temperature
            )));
        }

        if !HUMIDITY_RANGE.contains(&humidity) {
            return Err(LoggerError::Probe(format!("humidity {} % out of range", humidity)));
        }

        Ok(Measurement {
            temperature,
            humidity,
        })
    }
}
