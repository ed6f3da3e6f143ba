//! # NMEA Stream Decoder
//!
//! Incremental NMEA-0183 decoder fed one byte at a time from the GPS serial
//! stream.
//!
//! Only two sentence types carry what a reading needs:
//! - `GGA`: UTC time, location, satellites in use, altitude
//! - `RMC`: UTC time, location, date
//!
//! Any talker prefix is accepted (`GP`, `GN`, `GL`, ...). Each decoded
//! sub-field carries an `updated` flag, set when a valid sentence commits a
//! new value and cleared when the fix is consumed with
//! [`NmeaDecoder::take_fix`].

use chrono::{NaiveDate, NaiveTime};
use tracing::debug;

use super::checksum::{nmea_checksum, parse_checksum};
use crate::error::{LoggerError, Result};
use crate::telemetry::Fix;

/// Longest valid sentence, `$` through checksum, excluding CR LF
pub const MAX_SENTENCE_LEN: usize = 82;

/// A decoded value plus whether it changed since last consumed
#[derive(Debug, Clone, Copy)]
struct Field<T> {
    value: Option<T>,
    updated: bool,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Self {
            value: None,
            updated: false,
        }
    }
}

impl<T: Copy> Field<T> {
    fn commit(&mut self, value: T) {
        self.value = Some(value);
        self.updated = true;
    }
}

/// Sentence counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Sentences with a valid checksum
    pub passed: u32,
    /// Sentences rejected for a bad or missing checksum
    pub failed_checksum: u32,
    /// Sentences discarded for exceeding [`MAX_SENTENCE_LEN`]
    pub overflowed: u32,
}

/// Incremental NMEA decoder
#[derive(Debug, Default)]
pub struct NmeaDecoder {
    buffer: Vec<u8>,
    in_sentence: bool,
    overflow: bool,
    location: Field<(f64, f64)>,
    altitude: Field<f64>,
    satellites: Field<u32>,
    time: Field<NaiveTime>,
    date: Field<NaiveDate>,
    stats: DecoderStats,
}

impl NmeaDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_SENTENCE_LEN),
            ..Self::default()
        }
    }

    /// Feed one byte from the stream
    ///
    /// Returns `true` when the byte completed a sentence that passed its
    /// checksum and was understood.
    pub fn feed(&mut self, byte: u8) -> bool {
        match byte {
            b'$' => {
                self.buffer.clear();
                self.in_sentence = true;
                self.overflow = false;
                false
            }
            b'\r' | b'\n' => {
                if !self.in_sentence {
                    return false;
                }
                self.in_sentence = false;

                if self.overflow {
                    self.stats.overflowed += 1;
                    return false;
                }

                let sentence = std::mem::take(&mut self.buffer);
                let decoded = match self.decode_sentence(&sentence) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        debug!("Discarding sentence: {}", e);
                        false
                    }
                };
                self.buffer = sentence;
                self.buffer.clear();
                decoded
            }
            _ => {
                if self.in_sentence && !self.overflow {
                    // `$` is not buffered, so the body limit is one less
                    if self.buffer.len() >= MAX_SENTENCE_LEN - 1 {
                        self.overflow = true;
                    } else {
                        self.buffer.push(byte);
                    }
                }
                false
            }
        }
    }

    /// Feed a chunk of bytes; returns how many sentences were decoded
    pub fn feed_slice(&mut self, bytes: &[u8]) -> usize {
        bytes.iter().filter(|&&byte| self.feed(byte)).count()
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Whether location, altitude, satellites, time and date have all been
    /// updated since the fix was last consumed
    pub fn is_fix_fresh(&self) -> bool {
        self.location.updated
            && self.altitude.updated
            && self.satellites.updated
            && self.time.updated
            && self.date.updated
    }

    /// Consume a fresh fix
    ///
    /// Edge-triggered: returns `Some` once after every sub-field has been
    /// updated, then `None` until all of them are updated again. Partial
    /// updates are kept until the fix completes.
    pub fn take_fix(&mut self) -> Option<Fix> {
        if !self.is_fix_fresh() {
            return None;
        }

        let (latitude, longitude) = self.location.value?;
        let fix = Fix {
            latitude,
            longitude,
            altitude: self.altitude.value?,
            satellites: self.satellites.value?,
            timestamp: self.date.value?.and_time(self.time.value?),
        };

        self.location.updated = false;
        self.altitude.updated = false;
        self.satellites.updated = false;
        self.time.updated = false;
        self.date.updated = false;

        Some(fix)
    }

    /// Validate and apply one sentence (without `$` and line ending)
    fn decode_sentence(&mut self, sentence: &[u8]) -> Result<bool> {
        let star = sentence
            .iter()
            .rposition(|&b| b == b'*')
            .ok_or_else(|| {
                self.stats.failed_checksum += 1;
                LoggerError::Nmea("missing checksum".to_string())
            })?;

        let (body, digits) = (&sentence[..star], &sentence[star + 1..]);
        let expected = parse_checksum(digits);
        let calculated = nmea_checksum(body);

        if expected != Some(calculated) {
            self.stats.failed_checksum += 1;
            return Err(LoggerError::Nmea(format!(
                "checksum mismatch: calculated 0x{:02X}, got {:?}",
                calculated,
                String::from_utf8_lossy(digits)
            )));
        }
        self.stats.passed += 1;

        if !body.is_ascii() {
            return Err(LoggerError::Nmea("non-ASCII sentence".to_string()));
        }
        let body = std::str::from_utf8(body)
            .map_err(|_| LoggerError::Nmea("non-ASCII sentence".to_string()))?;
        let fields: Vec<&str> = body.split(',').collect();

        let address = fields[0];
        if address.len() < 5 {
            return Err(LoggerError::Nmea(format!("bad address field {:?}", address)));
        }

        match address.get(address.len() - 3..) {
            Some("GGA") => Ok(self.apply_gga(&fields)),
            Some("RMC") => Ok(self.apply_rmc(&fields)),
            _ => Ok(false),
        }
    }

    /// `$xxGGA,time,lat,N,lon,E,quality,sats,hdop,alt,M,sep,M,age,station`
    fn apply_gga(&mut self, fields: &[&str]) -> bool {
        if fields.len() < 10 {
            return false;
        }

        let has_fix = fields[6].parse::<u8>().map(|q| q > 0).unwrap_or(false);

        if let Some(time) = parse_time(fields[1]) {
            self.time.commit(time);
        }

        if has_fix {
            if let Some(location) = parse_location(fields[2], fields[3], fields[4], fields[5]) {
                self.location.commit(location);
            }
            if let Some(altitude) = fields[9].parse::<f64>().ok().filter(|a| a.is_finite()) {
                self.altitude.commit(altitude);
            }
        }

        if let Ok(satellites) = fields[7].parse::<u32>() {
            self.satellites.commit(satellites);
        }

        true
    }

    /// `$xxRMC,time,status,lat,N,lon,E,speed,course,date,magvar,E`
    fn apply_rmc(&mut self, fields: &[&str]) -> bool {
        if fields.len() < 10 {
            return false;
        }

        let has_fix = fields[2] == "A";

        if let Some(time) = parse_time(fields[1]) {
            self.time.commit(time);
        }

        if let Some(date) = parse_date(fields[9]) {
            self.date.commit(date);
        }

        if has_fix {
            if let Some(location) = parse_location(fields[3], fields[4], fields[5], fields[6]) {
                self.location.commit(location);
            }
        }

        true
    }
}

/// `hhmmss` or `hhmmss.sss`; fractional seconds are dropped
fn parse_time(field: &str) -> Option<NaiveTime> {
    let digits = field.split('.').next()?;
    if !is_digits(digits, 6) {
        return None;
    }

    let hour = digits[0..2].parse().ok()?;
    let minute = digits[2..4].parse().ok()?;
    let second = digits[4..6].parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, second)
}

/// `ddmmyy`, years counted from 2000
fn parse_date(field: &str) -> Option<NaiveDate> {
    if !is_digits(field, 6) {
        return None;
    }

    let day = field[0..2].parse().ok()?;
    let month = field[2..4].parse().ok()?;
    let year: i32 = field[4..6].parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

fn is_digits(field: &str, len: usize) -> bool {
    field.len() == len && field.bytes().all(|b| b.is_ascii_digit())
}

/// `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere into signed decimal degrees
fn parse_coordinate(field: &str, hemisphere: &str, positive: &str, negative: &str) -> Option<f64> {
    let raw: f64 = field.parse().ok()?;
    if !raw.is_finite() {
        return None;
    }
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let value = degrees + minutes / 60.0;

    match hemisphere {
        h if h == positive => Some(value),
        h if h == negative => Some(-value),
        _ => None,
    }
}

fn parse_location(lat: &str, ns: &str, lon: &str, ew: &str) -> Option<(f64, f64)> {
    let latitude = parse_coordinate(lat, ns, "N", "S")?;
    let longitude = parse_coordinate(lon, ew, "E", "W")?;

    if latitude.abs() > 90.0 || longitude.abs() > 180.0 {
        return None;
    }

    Some((latitude, longitude))
}
