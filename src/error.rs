//! # Error Types
//!
//! Custom error types for Field Logger using `thiserror`.

use thiserror::Error;

/// Main error type for Field Logger
#[derive(Debug, Error)]
pub enum LoggerError {
    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Configuration value out of range or over capacity
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage medium missing or not usable
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Encoded reading does not fit the payload bound
    #[error("Encoded reading is {size} bytes, limit is {limit}")]
    EncodingOverflow { size: usize, limit: usize },

    /// Reading could not be serialized
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Temperature/humidity probe read failed
    #[error("Probe error: {0}")]
    Probe(String),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Malformed NMEA sentence
    #[error("NMEA error: {0}")]
    Nmea(String),

    /// Link layer (WiFi) errors
    #[error("Link error: {0}")]
    Link(String),

    /// Session layer (MQTT) errors
    #[error("Session error: {0}")]
    Session(String),

    /// Link or session is down
    #[error("Not connected")]
    NotConnected,
}

/// Result type alias for Field Logger
pub type Result<T> = std::result::Result<T, LoggerError>;
