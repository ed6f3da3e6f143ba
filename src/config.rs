//! # Configuration Module
//!
//! Loads device settings from a JSON file on the storage volume.
//!
//! Every key is optional. Keys missing from the file keep their compiled-in
//! default, unknown keys are ignored. A file that cannot be read, parsed or
//! validated is rejected as a whole: the caller keeps [`Config::default`].

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{LoggerError, Result};

/// Name of the config file on the storage volume
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Capacity limits, in bytes, for the string settings
const WIFI_SSID_CAPACITY: usize = 32;
const WIFI_PASSWORD_CAPACITY: usize = 63;
const MQTT_SERVER_CAPACITY: usize = 63;
const MQTT_FIELD_CAPACITY: usize = 31;

/// Device configuration
///
/// Immutable after load; read through the accessor methods.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(rename = "wifiSSID", default)]
    wifi_ssid: String,

    #[serde(default)]
    wifi_password: String,

    #[serde(default = "default_wifi_interface")]
    wifi_interface: String,

    #[serde(default)]
    mqtt_server: String,

    #[serde(default = "default_mqtt_port")]
    mqtt_port: u16,

    #[serde(default = "default_mqtt_client_name")]
    mqtt_client_name: String,

    #[serde(default)]
    mqtt_username: String,

    #[serde(default)]
    mqtt_password: String,

    #[serde(default = "default_mqtt_topic")]
    mqtt_topic: String,

    #[serde(rename = "publishInterval", default = "default_publish_interval_ms")]
    publish_interval_ms: u64,

    #[serde(default = "default_probe_device")]
    probe_device: String,

    #[serde(default = "default_gps_port")]
    gps_port: String,

    #[serde(default = "default_gps_baud")]
    gps_baud: u32,
}

// Default value functions
fn default_wifi_interface() -> String { "wlan0".to_string() }
fn default_mqtt_port() -> u16 { 1883 }
fn default_mqtt_client_name() -> String { "esp32-dev".to_string() }
fn default_mqtt_topic() -> String { "device/0/data".to_string() }
fn default_publish_interval_ms() -> u64 { 5000 }
fn default_probe_device() -> String { "/sys/bus/iio/devices/iio:device0".to_string() }
fn default_gps_port() -> String { "/dev/serial0".to_string() }
fn default_gps_baud() -> u32 { 9600 }

impl Default for Config {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_password: String::new(),
            wifi_interface: default_wifi_interface(),
            mqtt_server: String::new(),
            mqtt_port: default_mqtt_port(),
            mqtt_client_name: default_mqtt_client_name(),
            mqtt_username: String::new(),
            mqtt_password: String::new(),
            mqtt_topic: default_mqtt_topic(),
            publish_interval_ms: default_publish_interval_ms(),
            probe_device: default_probe_device(),
            gps_port: default_gps_port(),
            gps_baud: default_gps_baud(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Defaults overlaid with the keys present in the file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - JSON parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use field_logger::config::Config;
    ///
    /// let config = Config::load("/media/sd/config.json")?;
    /// println!("publishing to {}", config.mqtt_topic());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse and validate configuration from a JSON document
    pub fn from_json(contents: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// String settings are checked against their capacity instead of being
    /// truncated.
    fn validate(&self) -> Result<()> {
        for (name, value, capacity) in [
            ("wifiSSID", &self.wifi_ssid, WIFI_SSID_CAPACITY),
            ("wifiPassword", &self.wifi_password, WIFI_PASSWORD_CAPACITY),
            ("mqttServer", &self.mqtt_server, MQTT_SERVER_CAPACITY),
            ("mqttClientName", &self.mqtt_client_name, MQTT_FIELD_CAPACITY),
            ("mqttUsername", &self.mqtt_username, MQTT_FIELD_CAPACITY),
            ("mqttPassword", &self.mqtt_password, MQTT_FIELD_CAPACITY),
            ("mqttTopic", &self.mqtt_topic, MQTT_FIELD_CAPACITY),
        ] {
            if value.len() > capacity {
                return Err(LoggerError::Config(format!(
                    "{} is {} bytes, capacity is {}",
                    name,
                    value.len(),
                    capacity
                )));
            }
        }

        if self.mqtt_port == 0 {
            return Err(LoggerError::Config("mqttPort must be between 1 and 65535".to_string()));
        }

        if self.mqtt_client_name.is_empty() {
            return Err(LoggerError::Config("mqttClientName cannot be empty".to_string()));
        }

        if self.mqtt_topic.is_empty() {
            return Err(LoggerError::Config("mqttTopic cannot be empty".to_string()));
        }

        if self.publish_interval_ms == 0 {
            return Err(LoggerError::Config("publishInterval must be greater than 0".to_string()));
        }

        if self.gps_baud == 0 {
            return Err(LoggerError::Config("gpsBaud must be greater than 0".to_string()));
        }

        Ok(())
    }

    pub fn wifi_ssid(&self) -> &str {
        &self.wifi_ssid
    }

    pub fn wifi_password(&self) -> &str {
        &self.wifi_password
    }

    /// Network interface the link layer manages (e.g. `wlan0`)
    pub fn wifi_interface(&self) -> &str {
        &self.wifi_interface
    }

    pub fn mqtt_server(&self) -> &str {
        &self.mqtt_server
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_client_name(&self) -> &str {
        &self.mqtt_client_name
    }

    pub fn mqtt_username(&self) -> &str {
        &self.mqtt_username
    }

    pub fn mqtt_password(&self) -> &str {
        &self.mqtt_password
    }

    /// Topic every reading is published to
    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    /// Interval between sampling/publish ticks, in milliseconds
    pub fn publish_interval_ms(&self) -> u64 {
        self.publish_interval_ms
    }

    /// IIO device directory of the temperature/humidity probe
    pub fn probe_device(&self) -> &str {
        &self.probe_device
    }

    pub fn gps_port(&self) -> &str {
        &self.gps_port
    }

    pub fn gps_baud(&self) -> u32 {
        self.gps_baud
    }
}
