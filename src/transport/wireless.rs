//! Wireless fallback transport
//!
//! Association is delegated to a [`WirelessLink`] (the host's network
//! stack) and the broker session to a [`SessionClient`] (an external TLS
//! MQTT client). The transport only sequences the two and owns the
//! reconnect-on-publish behaviour.

use super::error::TransportError;
use super::traits::Transport;
use async_trait::async_trait;
use rand::Rng;
use std::io;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Station-mode radio control
#[async_trait]
pub trait WirelessLink: Send {
    /// Start associating with the given network
    async fn associate(&mut self, ssid: &str, passphrase: &str) -> io::Result<()>;

    /// Whether the station is associated and has an address
    async fn is_associated(&mut self) -> bool;

    async fn disassociate(&mut self);

    /// Switch the radio off entirely
    async fn power_down(&mut self);

    /// Received signal strength in dBm
    async fn rssi(&mut self) -> Option<i32>;
}

/// Broker session run by an external MQTT client
#[async_trait]
pub trait SessionClient: Send {
    /// Open a session and wait for the broker to accept it
    async fn connect(&mut self, client_id: &str) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Queue one QoS 0 message
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Drive the client's network I/O for a short bounded window
    async fn pump(&mut self);

    async fn disconnect(&mut self);
}

/// Configuration for the wireless transport
#[derive(Debug, Clone)]
pub struct WirelessConfig {
    pub ssid: String,
    pub passphrase: String,
    /// Association status polls before giving up
    pub association_polls: u32,
    pub association_poll_delay: Duration,
    /// Prefix for the per-session random client identifier
    pub client_id_prefix: String,
}

impl Default for WirelessConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            passphrase: String::new(),
            association_polls: 20,
            association_poll_delay: Duration::from_millis(500),
            client_id_prefix: "WATTSCOPE_WIFI_".into(),
        }
    }
}

/// Fresh client identifier: prefix plus a random 16-bit hex suffix
pub fn random_client_id(prefix: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0xFFFF);
    format!("{}{:x}", prefix, suffix)
}

/// Fallback transport: host wireless link plus a TLS MQTT session
pub struct WirelessTransport<L, S> {
    link: L,
    session: S,
    config: WirelessConfig,
    connected: bool,
}

impl<L, S> WirelessTransport<L, S>
where
    L: WirelessLink,
    S: SessionClient,
{
    pub fn new(link: L, session: S, config: WirelessConfig) -> Self {
        Self {
            link,
            session,
            config,
            connected: false,
        }
    }

    async fn wait_for_association(&mut self) -> bool {
        for poll in 1..=self.config.association_polls {
            if self.link.is_associated().await {
                debug!("[WIFI] Associated after {} polls", poll);
                return true;
            }
            sleep(self.config.association_poll_delay).await;
        }
        false
    }

    async fn open_session(&mut self) -> Result<(), TransportError> {
        let client_id = random_client_id(&self.config.client_id_prefix);
        self.session.connect(&client_id).await?;
        info!("[WIFI] MQTT session up as {}", client_id);
        Ok(())
    }
}

#[async_trait]
impl<L, S> Transport for WirelessTransport<L, S>
where
    L: WirelessLink,
    S: SessionClient,
{
    fn name(&self) -> &'static str {
        "Wireless"
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        info!("[WIFI] Associating with {}", self.config.ssid);

        if let Err(e) = self
            .link
            .associate(&self.config.ssid, &self.config.passphrase)
            .await
        {
            warn!("[WIFI] Association request rejected: {}", e);
            return Err(TransportError::WirelessAssociationFailure { attempts: 0 });
        }
        if !self.wait_for_association().await {
            return Err(TransportError::WirelessAssociationFailure {
                attempts: self.config.association_polls,
            });
        }

        self.open_session().await?;
        self.connected = true;
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        if !self.session.is_connected() {
            warn!("[WIFI] Session dropped, reconnecting");
            self.open_session()
                .await
                .map_err(|e| TransportError::PublishFailure(e.to_string()))?;
        }
        self.session.publish(topic, payload).await
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn teardown(&mut self) {
        self.connected = false;
        self.session.disconnect().await;
        self.link.disassociate().await;
        self.link.power_down().await;
        info!("[WIFI] Radio powered down");
    }

    async fn maintain(&mut self) {
        self.session.pump().await;
    }

    async fn signal_strength(&mut self) -> Option<i32> {
        self.link.rssi().await
    }
}
