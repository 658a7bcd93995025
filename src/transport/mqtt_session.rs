//! TLS MQTT session for the wireless path, backed by rumqttc

use super::error::TransportError;
use super::wireless::SessionClient;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// Events drained per pump call
const PUMP_BUDGET: usize = 16;

/// Broker settings for the wireless session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
    /// Bound on waiting for CONNACK
    pub connect_timeout: Duration,
    /// Idle time after which a pump call returns
    pub pump_window: Duration,
    pub tls: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8883,
            username: String::new(),
            password: String::new(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            pump_window: Duration::from_millis(10),
            tls: true,
        }
    }
}

/// rumqttc client and event loop pair
pub struct MqttSession {
    config: SessionConfig,
    client: Option<AsyncClient>,
    eventloop: Option<EventLoop>,
    connected: bool,
}

impl MqttSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            client: None,
            eventloop: None,
            connected: false,
        }
    }

    fn options(&self, client_id: &str) -> MqttOptions {
        let mut opts = MqttOptions::new(client_id, self.config.host.clone(), self.config.port);
        opts.set_keep_alive(self.config.keep_alive);
        if !self.config.username.is_empty() {
            opts.set_credentials(self.config.username.clone(), self.config.password.clone());
        }
        if self.config.tls {
            opts.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        opts
    }

    async fn await_connack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return if ack.code == ConnectReturnCode::Success {
                        Ok(())
                    } else {
                        Err(TransportError::WirelessSessionFailure(format!(
                            "broker refused: {:?}",
                            ack.code
                        )))
                    };
                }
                Ok(_) => continue,
                Err(e) => return Err(TransportError::WirelessSessionFailure(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl SessionClient for MqttSession {
    async fn connect(&mut self, client_id: &str) -> Result<(), TransportError> {
        self.disconnect().await;

        let (client, mut eventloop) = AsyncClient::new(self.options(client_id), PUMP_BUDGET);
        match timeout(self.config.connect_timeout, Self::await_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(TransportError::WirelessSessionFailure(format!(
                    "no CONNACK within {:?}",
                    self.config.connect_timeout
                )))
            }
        }

        self.client = Some(client);
        self.eventloop = Some(eventloop);
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| TransportError::PublishFailure("session not open".into()))?;
        client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| TransportError::PublishFailure(e.to_string()))?;
        self.pump().await;
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::PublishFailure(format!("session lost publishing {}", topic)))
        }
    }

    async fn pump(&mut self) {
        let Some(eventloop) = self.eventloop.as_mut() else {
            return;
        };
        let deadline = Instant::now() + self.config.pump_window * PUMP_BUDGET as u32;
        for _ in 0..PUMP_BUDGET {
            if Instant::now() >= deadline {
                break;
            }
            match timeout(self.config.pump_window, eventloop.poll()).await {
                Ok(Ok(event)) => debug!("[MQTT] {:?}", event),
                Ok(Err(e)) => {
                    warn!("[MQTT] Session error: {}", e);
                    self.connected = false;
                    break;
                }
                Err(_) => break,
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.try_disconnect() {
                debug!("[MQTT] Disconnect request failed: {}", e);
            }
            if let Some(eventloop) = self.eventloop.as_mut() {
                let _ = timeout(self.config.pump_window, eventloop.poll()).await;
            }
        }
        self.eventloop = None;
        self.connected = false;
    }
}
