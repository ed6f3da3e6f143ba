//! # Field Logger
//!
//! Samples a DHT22 probe and a GPS receiver and publishes readings over MQTT,
//! buffering them on the storage volume while offline.

use anyhow::{Context, Result};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use field_logger::config::Config;
use field_logger::network::{MqttSession, NmcliLink, RECONNECT_INTERVAL};
use field_logger::orchestrator::Orchestrator;
use field_logger::sensor::{IioProbe, SensorSource, SerialGpsStream};
use field_logger::storage::StorageVolume;

/// Environment variable overriding the storage root
const STORAGE_ENV: &str = "FIELD_LOGGER_STORAGE";

/// Mount point of the SD card
const DEFAULT_STORAGE_ROOT: &str = "/media/sd";

/// How often pending GPS bytes are fed to the decoder
const GPS_PUMP_PERIOD: Duration = Duration::from_millis(100);

/// Main entry point for Field Logger
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Set up logging through a non-blocking stdout writer
///    - Open the storage volume and load `config.json` from it; either
///      failing halts the device
///    - Open the GPS port (continues without GPS if it is missing)
///    - Bring up WiFi and the MQTT session once
///
/// 2. **Main Loop**
///    - Pump GPS bytes every 100 ms
///    - Service the connection every 2.5 s
///    - Publish (or queue) a reading every `publishInterval` ms
///    - Handle Ctrl+C for graceful shutdown
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _guard = init_logging();

    info!("Field Logger v{} starting...", env!("CARGO_PKG_VERSION"));

    let root = std::env::var(STORAGE_ENV).unwrap_or_else(|_| DEFAULT_STORAGE_ROOT.to_string());
    let volume = match StorageVolume::open(&root) {
        Ok(volume) => volume,
        Err(e) => {
            error!("Card mount failed: {}", e);
            match halt().await {}
        }
    };

    let config = match load_config(&volume) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("{:#}", e);
            match halt().await {}
        }
    };

    let gps = match SerialGpsStream::open(config.gps_port(), config.gps_baud()) {
        Ok(gps) => gps,
        Err(e) => {
            warn!("{}; continuing without GPS", e);
            SerialGpsStream::detached(config.gps_port())
        }
    };

    let sensors = SensorSource::new(IioProbe::new(config.probe_device()), gps);
    let link = NmcliLink::new(config.wifi_interface());
    let session = MqttSession::new(config.mqtt_server(), config.mqtt_port());

    let mut orchestrator =
        Orchestrator::new(Arc::clone(&config), sensors, link, session, volume.queue());

    orchestrator.service_connection().await;

    let mut gps_interval = interval(GPS_PUMP_PERIOD);
    let mut reconnect_interval = interval(RECONNECT_INTERVAL);
    let mut publish_interval = interval(Duration::from_millis(config.publish_interval_ms()));
    reconnect_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    publish_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Publishing every {} ms to {}",
        config.publish_interval_ms(),
        config.mqtt_topic()
    );
    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = gps_interval.tick() => {
                orchestrator.pump_location();
            }

            _ = reconnect_interval.tick() => {
                orchestrator.service_connection().await;
            }

            _ = publish_interval.tick() => {
                let outcome = orchestrator.publish_tick().await;
                debug!("Publish tick: {:?}", outcome);
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                info!("{} readings left in queue", orchestrator.queue().len());
                break;
            }
        }
    }

    Ok(())
}

/// Install the global subscriber; the returned guard flushes on drop
fn init_logging() -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    guard
}

fn load_config(volume: &StorageVolume) -> Result<Config> {
    let path = volume.config_path();
    let config = Config::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    info!("Configuration loaded from {}", path.display());
    Ok(config)
}

/// Park forever; the device has nothing useful to do without storage or
/// configuration
async fn halt() -> Infallible {
    std::future::pending().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_pump_period_outpaces_serial() {
        // 9600 baud is ~960 bytes/s; a 100 ms pump sees at most ~96 bytes
        assert_eq!(GPS_PUMP_PERIOD, Duration::from_millis(100));
        assert!(GPS_PUMP_PERIOD < RECONNECT_INTERVAL);
    }

    #[test]
    fn test_default_storage_root() {
        assert_eq!(DEFAULT_STORAGE_ROOT, "/media/sd");
        assert_eq!(STORAGE_ENV, "FIELD_LOGGER_STORAGE");
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let volume = StorageVolume::open(dir.path()).unwrap();

        let err = load_config(&volume).unwrap_err();
        assert!(format!("{:#}", err).contains("config.json"));
    }

    #[test]
    fn test_load_config_from_volume() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"mqttServer": "broker.local", "mqttPort": 8883}"#,
        )
        .unwrap();
        let volume = StorageVolume::open(dir.path()).unwrap();

        let config = load_config(&volume).unwrap();
        assert_eq!(config.mqtt_server(), "broker.local");
        assert_eq!(config.mqtt_port(), 8883);
    }
}
