//! # Telemetry Module
//!
//! The per-cycle data point published to the broker or buffered to storage.
//!
//! This module handles:
//! - Bundling probe values with an optional GPS fix
//! - Encoding as a compact, single-line JSON payload
//! - Enforcing the payload size bound

pub mod reading;

pub use reading::{Fix, Reading, MAX_PAYLOAD_BYTES};
