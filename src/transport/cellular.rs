//! Cellular transport over a serial-attached modem
//!
//! Bring-up is strictly sequential, each stage gated on the previous one:
//! probe, network registration, packet-data attach, then TCP open plus the
//! MQTT handshake. The broker session runs in plain TCP through the modem,
//! so every control packet comes from [`wattscope_shared::codec`].

use super::error::TransportError;
use super::modem::{at, ModemChannel};
use super::traits::Transport;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use wattscope_shared::codec::{self, ConnectOptions, FramingMode};
use wattscope_shared::timing;

/// Configuration for the cellular transport
#[derive(Debug, Clone)]
pub struct CellularConfig {
    /// Packet-data access point name
    pub apn: String,
    /// Broker host (plain TCP)
    pub broker_host: String,
    /// Broker port (plain TCP)
    pub broker_port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u16,
    /// CONNECT flags byte behaviour
    pub framing: FramingMode,
    pub probe_attempts: u32,
    pub probe_retry_delay: Duration,
    pub registration_polls: u32,
    pub registration_poll_delay: Duration,
    /// Pause after writing CONNECT before collecting the acknowledgment
    pub handshake_settle: Duration,
    /// How long to collect modem output looking for CONNACK
    pub ack_window: Duration,
    /// Pause after writing a PUBLISH frame
    pub publish_settle: Duration,
}

impl Default for CellularConfig {
    fn default() -> Self {
        Self {
            apn: "internet".into(),
            broker_host: "localhost".into(),
            broker_port: 1883,
            client_id: "WATTSCOPE_CELL".into(),
            username: String::new(),
            password: String::new(),
            keep_alive_secs: timing::KEEP_ALIVE_SECS,
            framing: FramingMode::Strict,
            probe_attempts: 3,
            probe_retry_delay: Duration::from_millis(1_000),
            registration_polls: 15,
            registration_poll_delay: Duration::from_millis(1_500),
            handshake_settle: Duration::from_millis(2_000),
            ack_window: Duration::from_millis(3_000),
            publish_settle: Duration::from_millis(300),
        }
    }
}

/// Primary transport: MQTT over the modem's TCP stack
pub struct CellularTransport<P> {
    channel: ModemChannel<P>,
    config: CellularConfig,
    connected: bool,
}

impl<P> CellularTransport<P>
where
    P: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(port: P, config: CellularConfig) -> Self {
        Self {
            channel: ModemChannel::new(port),
            config,
            connected: false,
        }
    }

    /// Stage 1: wake the modem, disable echo, check the SIM
    async fn probe(&mut self) -> Result<(), TransportError> {
        let attempts = self.config.probe_attempts;
        for attempt in 1..=attempts {
            let response = self.channel.exchange(&at::PROBE).await?;
            if response.contains(at::OK) {
                info!("[CELL] Modem responded (attempt {}/{})", attempt, attempts);
                self.channel.exchange(&at::ECHO_OFF).await?;
                self.channel.exchange(&at::VERBOSE_ERRORS).await?;
                let sim = self.channel.exchange(&at::SIM_READY).await?;
                if !sim.contains(at::SIM_READY.expect) {
                    warn!("[CELL] SIM not reporting ready: {}", sim.trim());
                }
                return Ok(());
            }
            sleep(self.config.probe_retry_delay).await;
        }
        Err(TransportError::ModemUnresponsive { attempts })
    }

    /// Stage 2: wait for home or roaming registration
    async fn register(&mut self) -> Result<(), TransportError> {
        let polls = self.config.registration_polls;
        for poll in 1..=polls {
            let response = self.channel.exchange(&at::REGISTRATION).await?;
            if response.contains(at::REGISTERED_HOME) || response.contains(at::REGISTERED_ROAMING) {
                info!("[CELL] Registered on network (poll {}/{})", poll, polls);
                return Ok(());
            }
            debug!("[CELL] Not registered yet ({}/{})", poll, polls);
            sleep(self.config.registration_poll_delay).await;
        }
        Err(TransportError::NetworkRegistrationTimeout { polls })
    }

    /// Stage 3: bearer context, bearer open, IP stack
    async fn attach(&mut self) -> Result<(), TransportError> {
        let apn = self.config.apn.clone();
        self.channel.exchange(&at::BEARER_CONTYPE).await?;
        self.channel
            .send(&at::bearer_apn(&apn), at::BEARER_CONTYPE.timeout, at::OK)
            .await?;
        self.channel.exchange(&at::BEARER_USER).await?;
        self.channel.exchange(&at::BEARER_PWD).await?;

        let response = self.channel.exchange(&at::BEARER_OPEN).await?;
        if response.contains(at::ERROR) {
            return Err(TransportError::BearerAttachFailure(response.trim().to_string()));
        }

        self.channel.exchange(&at::SINGLE_CONNECTION).await?;
        self.channel.exchange(&at::NON_TRANSPARENT).await?;
        self.channel
            .send(&at::start_task(&apn), at::TASK_TIMEOUT, at::OK)
            .await?;
        self.channel.exchange(&at::BRING_UP).await?;
        let address = self.channel.exchange(&at::LOCAL_ADDRESS).await?;
        info!("[CELL] Packet data attached, address {}", address.trim());
        Ok(())
    }

    /// Stage 4: TCP open to the broker, then CONNECT/CONNACK
    async fn open_session(&mut self) -> Result<(), TransportError> {
        let command = at::tcp_open(&self.config.broker_host, self.config.broker_port);
        let response = self
            .channel
            .send(&command, at::TCP_OPEN_TIMEOUT, at::CONNECT_OK)
            .await?;
        if !response.contains(at::CONNECT_OK) {
            return Err(TransportError::SessionOpenFailure(response.trim().to_string()));
        }

        let frame = codec::connect_frame(&ConnectOptions {
            client_id: &self.config.client_id,
            username: &self.config.username,
            password: &self.config.password,
            keep_alive_secs: self.config.keep_alive_secs,
            mode: self.config.framing,
        })?;
        if !self.send_frame(&frame).await? {
            return Err(TransportError::HandshakeFailure(
                "no data-entry prompt for CONNECT".into(),
            ));
        }

        sleep(self.config.handshake_settle).await;
        let output = self
            .channel
            .read_until(self.config.ack_window, |buf| {
                codec::find_connack(buf).is_some()
            })
            .await?;

        match codec::find_connack(&output) {
            Some(ack) if ack.accepted() => Ok(()),
            Some(ack) => Err(TransportError::HandshakeFailure(format!(
                "broker refused with code {}",
                ack.return_code
            ))),
            None => Err(TransportError::HandshakeFailure("no CONNACK received".into())),
        }
    }

    /// Push one frame through the data-entry command
    ///
    /// Returns `false` when the modem never showed the prompt.
    async fn send_frame(&mut self, frame: &[u8]) -> Result<bool, TransportError> {
        let response = self
            .channel
            .send(&at::data_entry(frame.len()), at::DATA_ENTRY_TIMEOUT, at::PROMPT)
            .await?;
        if !response.contains(at::PROMPT) {
            return Ok(false);
        }
        self.channel.write_raw(frame).await?;
        Ok(true)
    }
}

#[async_trait]
impl<P> Transport for CellularTransport<P>
where
    P: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &'static str {
        "Cellular"
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        info!("[CELL] Bringing up modem");

        self.probe().await?;
        self.register().await?;
        self.attach().await?;
        self.open_session().await?;

        self.connected = true;
        info!(
            "[CELL] MQTT session up via {}:{}",
            self.config.broker_host, self.config.broker_port
        );
        Ok(())
    }

    /// Fire-and-forget: success means the modem accepted the bytes
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let frame = codec::publish_frame(topic, payload)?;
        if !self.send_frame(&frame).await? {
            return Err(TransportError::PublishFailure(format!(
                "no data-entry prompt for {}",
                topic
            )));
        }
        sleep(self.config.publish_settle).await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn teardown(&mut self) {
        self.connected = false;
        for command in [&at::CLOSE, &at::SHUTDOWN, &at::BEARER_CLOSE] {
            if let Err(e) = self.channel.exchange(command).await {
                warn!("[CELL] Teardown {} failed: {}", command.text, e);
            }
        }
    }

    async fn keep_alive(&mut self) -> Result<(), TransportError> {
        if !self.send_frame(&codec::pingreq_frame()).await? {
            return Err(TransportError::PublishFailure(
                "no data-entry prompt for PINGREQ".into(),
            ));
        }
        sleep(self.config.publish_settle).await;
        Ok(())
    }
}
