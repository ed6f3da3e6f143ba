//! # Field Logger Library
//!
//! Store-and-forward environmental logger for a headless field device.
//!
//! A temperature/humidity probe is sampled on a fixed cadence, decorated with
//! the latest GPS fix when a fresh one is available, and published to an MQTT
//! broker. While the network is down readings are appended to a durable
//! queue on the storage volume and drained, oldest first, after the next
//! successful live publish.

pub mod config;
pub mod error;
pub mod network;
pub mod orchestrator;
pub mod sensor;
pub mod storage;
pub mod telemetry;
