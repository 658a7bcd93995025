//! Device scheduling loop
//!
//! One cooperative pass does, in order: position intake, the door check,
//! link servicing (recovery or background fail-back), then the scheduled
//! publishers. Long modem operations block the pass for their full length.

use crate::link::{LinkManager, PassAction};
use crate::security::SecurityMonitor;
use crate::telemetry::{Sources, TelemetryRouter};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};
use wattscope_shared::{topics, ConnectionState};

/// The assembled device
pub struct Device {
    link: LinkManager,
    router: TelemetryRouter,
    security: SecurityMonitor,
    sources: Sources,
}

impl Device {
    pub fn new(
        link: LinkManager,
        router: TelemetryRouter,
        security: SecurityMonitor,
        sources: Sources,
    ) -> Self {
        Self {
            link,
            router,
            security,
            sources,
        }
    }

    pub fn link(&self) -> &LinkManager {
        &self.link
    }

    /// Boot negotiation followed by an immediate status report
    pub async fn start(&mut self) -> ConnectionState {
        let state = self.link.negotiate().await;
        match state {
            ConnectionState::None => warn!("[DEVICE] No transport available at boot"),
            _ => info!("[DEVICE] Online via {}", state),
        }

        for topic in topics::ALL {
            info!("[DEVICE] Publishing on {}", topic);
        }

        if state != ConnectionState::None {
            let door_open = self.security.door_open();
            let _ = self
                .router
                .publish_status(&mut self.link, &mut self.sources, door_open, Instant::now())
                .await;
        }
        state
    }

    /// One scheduling pass
    pub async fn run_pass(&mut self, now: Instant) {
        self.sources.position.poll();

        self.security.check(&self.router, &mut self.link, now).await;

        if self.link.service(now).await == PassAction::Skip {
            return;
        }

        let door_open = self.security.door_open();
        self.router
            .tick(&mut self.link, &mut self.sources, door_open, now)
            .await;
    }

    /// Run passes forever, `pass_interval` apart
    pub async fn run(&mut self, pass_interval: Duration) {
        loop {
            self.run_pass(Instant::now()).await;
            sleep(pass_interval).await;
        }
    }

    /// Tear down both transports
    pub async fn shutdown(&mut self) {
        self.link.shutdown().await;
    }
}
