//! # Network Module
//!
//! Two-layer connectivity: a link layer (WiFi association) carrying a
//! session layer (MQTT broker connection).
//!
//! Reconnection is driven from the control loop; nothing here spawns tasks.
//! Link retries sleep on the tokio timer and run to completion.

pub mod link;
pub mod session;

pub use link::{Link, LinkStatus, NmcliLink};
pub use session::{MqttSession, Session};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{LoggerError, Result};
use crate::storage::PayloadSink;

/// Status polls after starting an association
pub const LINK_ATTEMPTS: u32 = 10;

/// Delay between link status polls
pub const LINK_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Period of the background connection service
pub const RECONNECT_INTERVAL: Duration = Duration::from_millis(2500);

/// Derived connectivity state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Disconnected,
    LinkUp,
    SessionUp,
}

/// Link plus session, with the credentials to (re)establish both
pub struct Connectivity<L, S> {
    link: L,
    session: S,
    config: Arc<Config>,
}

impl<L: Link, S: Session> Connectivity<L, S> {
    pub fn new(link: L, session: S, config: Arc<Config>) -> Self {
        Self {
            link,
            session,
            config,
        }
    }

    /// Make sure the link is associated
    ///
    /// Starts an association if needed and waits up to [`LINK_ATTEMPTS`]
    /// polls, [`LINK_RETRY_DELAY`] apart, for it to come up.
    pub async fn ensure_link(&mut self) -> bool {
        if self.link.status().await == LinkStatus::Connected {
            return true;
        }

        info!("Connecting to WiFi network {:?}", self.config.wifi_ssid());
        if let Err(e) = self
            .link
            .begin(self.config.wifi_ssid(), self.config.wifi_password())
            .await
        {
            warn!("Failed to start WiFi association: {}", e);
            return false;
        }

        let mut attempts = 0;
        loop {
            let status = self.link.status().await;
            if status == LinkStatus::Connected {
                info!("WiFi connected");
                return true;
            }
            if attempts >= LINK_ATTEMPTS {
                warn!("WiFi not connected after {} attempts, status {}", attempts, status);
                return false;
            }

            info!("WiFi status {}", status);
            sleep(LINK_RETRY_DELAY).await;
            attempts += 1;
        }
    }

    /// Make sure the broker session is open; one attempt
    pub async fn ensure_session(&mut self) -> bool {
        if self.session.is_connected() {
            return true;
        }

        info!(
            "Connecting to MQTT broker {}:{} as {:?}",
            self.config.mqtt_server(),
            self.config.mqtt_port(),
            self.config.mqtt_client_name()
        );

        let connected = self
            .session
            .connect(
                self.config.mqtt_client_name(),
                self.config.mqtt_username(),
                self.config.mqtt_password(),
            )
            .await;

        if connected {
            info!("MQTT session established");
        } else {
            warn!("MQTT connection failed");
        }
        connected
    }

    /// Link first, then session
    pub async fn ensure_connected(&mut self) -> bool {
        self.ensure_link().await && self.ensure_session().await
    }

    pub async fn state(&mut self) -> ConnectivityState {
        if self.link.status().await != LinkStatus::Connected {
            ConnectivityState::Disconnected
        } else if self.session.is_connected() {
            ConnectivityState::SessionUp
        } else {
            ConnectivityState::LinkUp
        }
    }

    /// Background upkeep: poll a live session, otherwise try to reconnect
    pub async fn maintain(&mut self) {
        if self.session.is_connected() {
            self.session.poll().await;
            return;
        }

        if self.ensure_link().await {
            self.ensure_session().await;
        }
    }

    /// Publish on the configured topic without reconnecting
    pub async fn send(&mut self, payload: &str) -> Result<()> {
        self.session.publish(self.config.mqtt_topic(), payload).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[async_trait]
impl<L: Link, S: Session> PayloadSink for Connectivity<L, S> {
    async fn deliver(&mut self, payload: &str) -> Result<()> {
        if !self.ensure_connected().await {
            return Err(LoggerError::NotConnected);
        }

        debug!("Publishing queued payload ({} bytes)", payload.len());
        self.send(payload).await
    }
}
