//! # Sensor Module
//!
//! Temperature/humidity probe and GPS stream handling.
//!
//! This module handles:
//! - Sampling the probe no faster than its refresh floor
//! - Pumping raw GPS bytes into the incremental NMEA decoder
//! - Edge-triggered detection of a fresh, complete GPS fix

pub mod checksum;
pub mod nmea;
pub mod probe;
pub mod stream;

pub use nmea::NmeaDecoder;
pub use probe::{IioProbe, Measurement, Probe};
pub use stream::{ByteStream, SerialGpsStream};

use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::telemetry::Fix;

/// Minimum time between successful probe reads (DHT22 refresh floor)
pub const PROBE_MIN_INTERVAL: Duration = Duration::from_millis(4000);

/// Bytes moved from the stream to the decoder per read
const PUMP_CHUNK: usize = 128;

/// Probe plus GPS stream, owned by the orchestrator
pub struct SensorSource<P, G> {
    probe: P,
    gps: G,
    decoder: NmeaDecoder,
    /// Time of the last successful probe read
    last_measurement: Option<Instant>,
    gps_failed: bool,
}

impl<P: Probe, G: ByteStream> SensorSource<P, G> {
    pub fn new(probe: P, gps: G) -> Self {
        Self {
            probe,
            gps,
            decoder: NmeaDecoder::new(),
            last_measurement: None,
            gps_failed: false,
        }
    }

    /// Read the probe if the refresh floor has elapsed
    ///
    /// Returns `None` without touching the hardware when called within
    /// [`PROBE_MIN_INTERVAL`] of the last successful read. A failed read also
    /// returns `None` and does not restart the floor.
    pub fn sample_probe(&mut self) -> Option<Measurement> {
        let now = Instant::now();

        if let Some(last) = self.last_measurement {
            if now.duration_since(last) < PROBE_MIN_INTERVAL {
                debug!("Probe read skipped, refresh floor not reached");
                return None;
            }
        }

        match self.probe.measure() {
            Ok(measurement) => {
                self.last_measurement = Some(now);
                Some(measurement)
            }
            Err(e) => {
                warn!("Probe read failed: {}", e);
                None
            }
        }
    }

    /// Feed every pending GPS byte into the decoder
    ///
    /// Call on every control-loop tick; decoder state carries over between
    /// calls.
    pub fn pump_location_stream(&mut self) {
        let mut buf = [0u8; PUMP_CHUNK];

        loop {
            match self.gps.try_read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    self.gps_failed = false;
                    self.decoder.feed_slice(&buf[..n]);
                }
                Err(e) => {
                    if !self.gps_failed {
                        warn!("GPS stream error: {}", e);
                        self.gps_failed = true;
                    }
                    break;
                }
            }
        }
    }

    /// Whether a complete fix arrived since the last check
    ///
    /// Edge-triggered: consumes the fix. Use [`take_fix`](Self::take_fix) to
    /// also get its values.
    pub fn has_fresh_fix(&mut self) -> bool {
        self.take_fix().is_some()
    }

    /// Consume the fresh fix, if any
    pub fn take_fix(&mut self) -> Option<Fix> {
        self.decoder.take_fix()
    }

    pub fn decoder(&self) -> &NmeaDecoder {
        &self.decoder
    }
}
