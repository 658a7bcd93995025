//! Link manager: active-transport selection, boot negotiation and fail-back
//!
//! Owns both transports for the life of the process. Only the one matching
//! the current [`ConnectionState`] serves publishes; the other may still hold
//! resources until it is explicitly torn down.

use crate::clock::{uptime_secs, IntervalTimer};
use crate::transport::{Transport, TransportError};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use wattscope_shared::payload::{self, ConnectionSwitched};
use wattscope_shared::state_machine::{LinkEvent, LinkStateMachine, TransitionResult};
use wattscope_shared::{timing, topics, ConnectionState};

/// Link manager settings
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Background cellular retry interval while on wireless
    pub cellular_retry_interval: Duration,
    /// Delay before renegotiating from NONE
    pub recovery_delay: Duration,
    /// Consecutive cellular publish failures that demote to NONE; 0 disables
    pub publish_failure_threshold: u32,
    /// Topic for the connection-switched notification
    pub notification_topic: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            cellular_retry_interval: Duration::from_millis(timing::CELLULAR_RETRY_INTERVAL_MS),
            recovery_delay: Duration::from_millis(timing::RECOVERY_DELAY_MS),
            publish_failure_threshold: 3,
            notification_topic: topics::STATUS.to_string(),
        }
    }
}

/// What the scheduling pass should do after link servicing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassAction {
    /// Run the scheduled publishers
    Continue,
    /// Skip the rest of this pass
    Skip,
}

/// Owner of the active-transport selector
pub struct LinkManager {
    fsm: LinkStateMachine,
    cellular: Box<dyn Transport>,
    wireless: Box<dyn Transport>,
    config: LinkConfig,
    cellular_retry: IntervalTimer,
    consecutive_failures: u32,
    boot: Instant,
    negotiated_once: bool,
}

impl LinkManager {
    pub fn new(
        cellular: Box<dyn Transport>,
        wireless: Box<dyn Transport>,
        config: LinkConfig,
        boot: Instant,
    ) -> Self {
        let cellular_retry = IntervalTimer::new(config.cellular_retry_interval, boot);
        Self {
            fsm: LinkStateMachine::new(),
            cellular,
            wireless,
            config,
            cellular_retry,
            consecutive_failures: 0,
            boot,
            negotiated_once: false,
        }
    }

    /// Currently active link
    pub fn state(&self) -> ConnectionState {
        self.fsm.state()
    }

    /// Number of state changes since boot
    pub fn switch_count(&self) -> u32 {
        self.fsm.switch_count()
    }

    /// Full negotiation: cellular first, then wireless, else NONE
    pub async fn negotiate(&mut self) -> ConnectionState {
        if self.negotiated_once {
            self.cellular.teardown().await;
        }
        self.negotiated_once = true;

        info!("[LINK] Negotiating transport (cellular first)");
        match self.cellular.connect().await {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.apply(LinkEvent::CellularUp);
                return self.state();
            }
            Err(e) => warn!("[LINK] {} connect failed: {}", self.cellular.name(), e),
        }

        match self.wireless.connect().await {
            Ok(()) => {
                self.apply(LinkEvent::WirelessUp);
                self.cellular_retry.reset(Instant::now());
            }
            Err(e) => {
                warn!("[LINK] {} connect failed: {}", self.wireless.name(), e);
                self.apply(LinkEvent::NegotiationFailed);
            }
        }
        self.state()
    }

    /// Per-pass link servicing
    ///
    /// From NONE this waits the recovery delay and renegotiates; the rest
    /// of the pass is skipped either way.
    pub async fn service(&mut self, now: Instant) -> PassAction {
        match self.state() {
            ConnectionState::None => {
                debug!("[LINK] No transport, retrying in {:?}", self.config.recovery_delay);
                sleep(self.config.recovery_delay).await;
                self.negotiate().await;
                PassAction::Skip
            }
            ConnectionState::Wireless => {
                self.wireless.maintain().await;
                if self.cellular_retry.due(now) {
                    self.retry_cellular().await;
                }
                PassAction::Continue
            }
            ConnectionState::Cellular => {
                self.cellular.maintain().await;
                PassAction::Continue
            }
        }
    }

    /// Teardown-then-connect cycle on the cellular transport
    async fn retry_cellular(&mut self) {
        info!("[LINK] Retrying cellular in background");
        self.cellular.teardown().await;

        if let Err(e) = self.cellular.connect().await {
            info!("[LINK] Cellular still unavailable ({}), staying on wireless", e);
            self.apply(LinkEvent::CellularRetryFailed);
            return;
        }

        self.wireless.teardown().await;
        self.consecutive_failures = 0;
        self.apply(LinkEvent::CellularRetrySucceeded);

        let notice = ConnectionSwitched::to_cellular(uptime_secs(self.boot, Instant::now()));
        let result = match payload::encode(&notice) {
            Ok(bytes) => {
                self.cellular
                    .publish(&self.config.notification_topic, &bytes)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!("[LINK] Switch notification not sent: {}", e);
        }
    }

    /// Publish through whichever transport is active
    pub async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let state = self.state();
        let transport = match state {
            ConnectionState::None => return Err(TransportError::NoActiveTransport),
            ConnectionState::Wireless => &mut self.wireless,
            ConnectionState::Cellular => &mut self.cellular,
        };

        let result = transport.publish(topic, payload).await;
        if state == ConnectionState::Cellular {
            match &result {
                Ok(()) => self.consecutive_failures = 0,
                Err(_) => self.record_cellular_failure(),
            }
        }
        result
    }

    fn record_cellular_failure(&mut self) {
        self.consecutive_failures += 1;
        let threshold = self.config.publish_failure_threshold;
        if threshold > 0 && self.consecutive_failures >= threshold {
            warn!(
                "[LINK] {} consecutive cellular publish failures, dropping link",
                self.consecutive_failures
            );
            self.consecutive_failures = 0;
            self.apply(LinkEvent::PublishFailuresExceeded);
        }
    }

    /// Protocol keep-alive on the cellular session
    pub async fn keep_alive(&mut self) -> Result<(), TransportError> {
        match self.state() {
            ConnectionState::Cellular => self.cellular.keep_alive().await,
            ConnectionState::Wireless => self.wireless.keep_alive().await,
            ConnectionState::None => Err(TransportError::NoActiveTransport),
        }
    }

    /// Wireless signal strength, only while wireless is active
    pub async fn signal_strength(&mut self) -> Option<i32> {
        match self.state() {
            ConnectionState::Wireless => self.wireless.signal_strength().await,
            _ => None,
        }
    }

    /// Release both transports
    pub async fn shutdown(&mut self) {
        info!("[LINK] Shutting down transports");
        self.cellular.teardown().await;
        self.wireless.teardown().await;
    }

    fn apply(&mut self, event: LinkEvent) {
        match self.fsm.process_event(event) {
            TransitionResult::Changed { from, to } => {
                info!("[LINK] {} -> {}", from, to);
            }
            TransitionResult::Unchanged(state) => {
                debug!("[LINK] {:?} leaves link at {}", event, state);
            }
            TransitionResult::Invalid { from, event } => {
                warn!("[LINK] Ignoring {:?} in state {}", event, from);
            }
        }
    }
}
