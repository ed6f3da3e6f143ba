//! # Orchestrator
//!
//! Owns every device handle and runs the three periodic jobs of the control
//! loop: GPS pumping, connection upkeep and the publish tick.
//!
//! A reading is published immediately when the link and session can be
//! brought up; otherwise it is appended to the durable queue. After every
//! successful live publish the queue is drained through the same verified
//! send path.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::network::{Connectivity, ConnectivityState, Link, Session};
use crate::sensor::{ByteStream, Probe, SensorSource};
use crate::storage::{DrainReport, DurableQueue};
use crate::telemetry::Reading;

/// Result of one publish tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Probe gated by its refresh floor or the read failed
    NoReading,
    /// Reading could not be encoded or persisted
    Dropped,
    /// Reading stored for a later drain
    Queued,
    /// Reading sent live, followed by a drain of the backlog
    Published { drained: DrainReport },
}

pub struct Orchestrator<P, G, L, S> {
    config: Arc<Config>,
    sensors: SensorSource<P, G>,
    connectivity: Connectivity<L, S>,
    queue: DurableQueue,
}

impl<P, G, L, S> Orchestrator<P, G, L, S>
where
    P: Probe,
    G: ByteStream,
    L: Link,
    S: Session,
{
    pub fn new(
        config: Arc<Config>,
        sensors: SensorSource<P, G>,
        link: L,
        session: S,
        queue: DurableQueue,
    ) -> Self {
        let connectivity = Connectivity::new(link, session, Arc::clone(&config));
        Self {
            config,
            sensors,
            connectivity,
            queue,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &DurableQueue {
        &self.queue
    }

    pub async fn connectivity_state(&mut self) -> ConnectivityState {
        self.connectivity.state().await
    }

    /// Feed pending GPS bytes to the decoder
    pub fn pump_location(&mut self) {
        self.sensors.pump_location_stream();
    }

    /// Keep the session alive, or try to bring link and session back up
    pub async fn service_connection(&mut self) {
        self.connectivity.maintain().await;
    }

    /// Sample, encode and publish (or queue) one reading
    pub async fn publish_tick(&mut self) -> PublishOutcome {
        let Some(measurement) = self.sensors.sample_probe() else {
            return PublishOutcome::NoReading;
        };

        let mut reading = Reading::new(measurement.temperature, measurement.humidity);
        if let Some(fix) = self.sensors.take_fix() {
            debug!("Attaching GPS fix ({} satellites)", fix.satellites);
            reading = reading.with_fix(fix);
        }

        let payload = match reading.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping reading: {}", e);
                return PublishOutcome::Dropped;
            }
        };

        if !self.connectivity.ensure_connected().await {
            info!("Offline, saving reading to storage");
            return self.defer(&payload);
        }

        if let Err(e) = self.connectivity.send(&payload).await {
            warn!("Publish failed, saving reading to storage: {}", e);
            return self.defer(&payload);
        }
        info!("Published reading to {}", self.config.mqtt_topic());

        let drained = self.queue.drain_all(&mut self.connectivity).await;
        if drained.delivered > 0 || drained.requeued > 0 {
            info!(
                "Drained backlog: {} sent, {} kept",
                drained.delivered, drained.requeued
            );
        }

        PublishOutcome::Published { drained }
    }

    fn defer(&self, payload: &str) -> PublishOutcome {
        if self.queue.append(payload) {
            PublishOutcome::Queued
        } else {
            PublishOutcome::Dropped
        }
    }
}
