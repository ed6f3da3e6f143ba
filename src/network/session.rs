//! Session layer (MQTT broker connection) abstraction and the rumqttc
//! implementation

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::error::{LoggerError, Result};

/// Keep-alive negotiated with the broker
const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Time allowed for TCP connect plus CONNACK
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for a publish to be written out
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `poll` waits for the next event before returning
const POLL_SLICE: Duration = Duration::from_millis(10);

/// Upper bound on events handled by one `poll`
const MAX_POLL_EVENTS: usize = 32;

/// Capacity of the client request channel
const REQUEST_CAPACITY: usize = 10;

/// Trait for the message session
#[async_trait]
pub trait Session: Send {
    /// Open a session; returns whether the broker accepted it
    async fn connect(&mut self, client_id: &str, username: &str, secret: &str) -> bool;

    /// Whether the session is currently established
    fn is_connected(&self) -> bool;

    /// Service protocol traffic (keep-alives, incoming packets)
    async fn poll(&mut self);

    /// Publish `payload` to `topic`
    async fn publish(&mut self, topic: &str, payload: &str) -> Result<()>;
}

/// MQTT session over TCP
pub struct MqttSession {
    host: String,
    port: u16,
    client: Option<AsyncClient>,
    eventloop: Option<EventLoop>,
    connected: bool,
}

impl std::fmt::Debug for MqttSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSession")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl MqttSession {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            client: None,
            eventloop: None,
            connected: false,
        }
    }

    /// Map the outcome of waiting for a publish to go out; `None` is a
    /// timeout. Any failure leaves the session closed for the next connect.
    fn settle_publish(&mut self, written: Option<std::result::Result<(), String>>) -> Result<()> {
        let error = match written {
            Some(Ok(())) => return Ok(()),
            Some(Err(reason)) => LoggerError::Session(format!("Publish failed: {}", reason)),
            None => LoggerError::Session("Publish timed out".to_string()),
        };

        self.drop_session();
        Err(error)
    }

    fn drop_session(&mut self) {
        self.connected = false;
        self.client = None;
        self.eventloop = None;
    }
}

#[async_trait]
impl Session for MqttSession {
    async fn connect(&mut self, client_id: &str, username: &str, secret: &str) -> bool {
        if self.connected {
            return true;
        }

        let mut options = MqttOptions::new(client_id, self.host.as_str(), self.port);
        options.set_keep_alive(KEEP_ALIVE);
        if !username.is_empty() {
            options.set_credentials(username, secret);
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return ack.code == ConnectReturnCode::Success;
                    }
                    Ok(event) => debug!("MQTT event during connect: {:?}", event),
                    Err(e) => {
                        warn!("MQTT connect to {}:{} failed: {}", self.host, self.port, e);
                        return false;
                    }
                }
            }
        };

        let accepted = match timeout(CONNECT_TIMEOUT, handshake).await {
            Ok(accepted) => accepted,
            Err(_) => {
                warn!("MQTT connect to {}:{} timed out", self.host, self.port);
                false
            }
        };

        if accepted {
            self.client = Some(client);
            self.eventloop = Some(eventloop);
            self.connected = true;
        } else {
            self.drop_session();
        }

        accepted
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn poll(&mut self) {
        let Some(eventloop) = self.eventloop.as_mut() else {
            self.connected = false;
            return;
        };

        let mut lost = false;
        for _ in 0..MAX_POLL_EVENTS {
            match timeout(POLL_SLICE, eventloop.poll()).await {
                Err(_) => break,
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    warn!("Broker closed the MQTT session");
                    lost = true;
                    break;
                }
                Ok(Ok(event)) => debug!("MQTT event: {:?}", event),
                Ok(Err(e)) => {
                    warn!("MQTT session lost: {}", e);
                    lost = true;
                    break;
                }
            }
        }

        if lost {
            self.drop_session();
        }
    }

    async fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        let (Some(client), Some(eventloop)) = (self.client.as_ref(), self.eventloop.as_mut()) else {
            return Err(LoggerError::NotConnected);
        };

        client
            .publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .await
            .map_err(|e| LoggerError::Session(format!("Failed to queue publish: {}", e)))?;

        let written = timeout(PUBLISH_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(_))) => return Ok(()),
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        return Err("broker closed the session".to_string())
                    }
                    Ok(event) => debug!("MQTT event during publish: {:?}", event),
                    Err(e) => return Err(e.to_string()),
                }
            }
        })
        .await
        .ok();

        self.settle_publish(written)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_disconnected() {
        let session = MqttSession::new("broker.local", 1883);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_publish_without_session_fails() {
        let mut session = MqttSession::new("broker.local", 1883);

        match session.publish("device/0/data", "{}").await {
            Err(LoggerError::NotConnected) => {}
            other => panic!("Expected NotConnected, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_poll_without_session_is_noop() {
        let mut session = MqttSession::new("broker.local", 1883);
        session.poll().await;
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused_by_closed_port() {
        // Port 1 on loopback is not expected to run a broker
        let mut session = MqttSession::new("127.0.0.1", 1);

        assert!(!session.connect("esp32-dev", "", "").await);
        assert!(!session.is_connected());
    }

    #[test]
    fn test_publish_timeout_closes_session() {
        let mut session = MqttSession::new("broker.local", 1883);
        session.connected = true;

        match session.settle_publish(None) {
            Err(LoggerError::Session(msg)) => assert!(msg.contains("timed out")),
            other => panic!("Expected Session error, got: {:?}", other),
        }
        assert!(!session.is_connected());
    }

    #[test]
    fn test_publish_failure_closes_session() {
        let mut session = MqttSession::new("broker.local", 1883);
        session.connected = true;

        assert!(session.settle_publish(Some(Err("reset".to_string()))).is_err());
        assert!(!session.is_connected());
    }

    #[test]
    fn test_publish_written_keeps_session() {
        let mut session = MqttSession::new("broker.local", 1883);
        session.connected = true;

        assert!(session.settle_publish(Some(Ok(()))).is_ok());
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_mock_session_records_publishes() {
        let mut session = mocks::MockSession::accepting();
        assert!(session.publish("t", "early").await.is_err());

        assert!(session.connect("id", "", "").await);
        session.publish("t", "p1").await.unwrap();

        assert_eq!(session.published(), vec![("t".to_string(), "p1".to_string())]);
    }
}
