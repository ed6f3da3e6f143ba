//! # NMEA Checksum
//!
//! XOR checksum carried after the `*` of every NMEA-0183 sentence.
//!
//! The checksum covers every byte between the leading `$` and the `*`,
//! exclusive, and is transmitted as two upper-case hex digits.

/// Calculate the NMEA checksum of a sentence body
///
/// # Arguments
///
/// * `body` - Sentence bytes between `$` and `*`
///
/// # Examples
///
/// ```
/// use field_logger::sensor::checksum::nmea_checksum;
///
/// assert_eq!(nmea_checksum(b"GPGLL,5057.970,N,00146.110,E,142451,A"), 0x27);
/// ```
pub fn nmea_checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, &byte| acc ^ byte)
}

/// Parse the two hex digits following `*`
///
/// Returns `None` unless `digits` is exactly two hex characters.
pub fn parse_checksum(digits: &[u8]) -> Option<u8> {
    if digits.len() != 2 {
        return None;
    }

    let text = std::str::from_utf8(digits).ok()?;
    u8::from_str_radix(text, 16).ok()
}
