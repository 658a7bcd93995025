//! Security Monitor
//!
//! Edge detector on the door contact. The input idles HIGH (contact closed,
//! pulled up); a falling edge means the door opened and raises the alarm, the
//! following rising edge clears it. Sustained levels produce nothing and
//! there is no debouncing.

use crate::clock::uptime_secs;
use crate::link::LinkManager;
use crate::telemetry::TelemetryRouter;
use std::fs;
use std::io;
use std::path::PathBuf;
use tokio::time::Instant;
use tracing::{info, warn};
use wattscope_shared::SecurityEvent;

/// Logic level of a binary input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// A readable binary input
pub trait BinaryInput: Send {
    fn read_level(&mut self) -> io::Result<Level>;
}

/// GPIO line exported through sysfs (`.../gpioN/value`)
pub struct SysfsGpioInput {
    value_path: PathBuf,
}

impl SysfsGpioInput {
    pub fn new(value_path: impl Into<PathBuf>) -> Self {
        Self {
            value_path: value_path.into(),
        }
    }
}

impl BinaryInput for SysfsGpioInput {
    fn read_level(&mut self) -> io::Result<Level> {
        let value = fs::read_to_string(&self.value_path)?;
        Ok(if value.trim() == "0" { Level::Low } else { Level::High })
    }
}

/// A detected door transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorEdge {
    Opened,
    Closed,
}

/// Door contact edge detector and alarm flag
pub struct SecurityMonitor {
    input: Box<dyn BinaryInput>,
    last_level: Level,
    door_open: bool,
    boot: Instant,
}

impl SecurityMonitor {
    /// Sample the initial level; the alarm starts cleared
    pub fn new(mut input: Box<dyn BinaryInput>, boot: Instant) -> Self {
        let last_level = input.read_level().unwrap_or_else(|e| {
            warn!("[SEC] Initial door read failed ({}), assuming closed", e);
            Level::High
        });
        Self {
            input,
            last_level,
            door_open: false,
            boot,
        }
    }

    /// Alarm flag reported in the status heartbeat
    pub fn door_open(&self) -> bool {
        self.door_open
    }

    /// Read the input once and report an edge, if any
    pub fn poll(&mut self) -> Option<DoorEdge> {
        let level = match self.input.read_level() {
            Ok(level) => level,
            Err(e) => {
                warn!("[SEC] Door read failed: {}", e);
                return None;
            }
        };

        let edge = match (self.last_level, level) {
            (Level::High, Level::Low) => {
                self.door_open = true;
                Some(DoorEdge::Opened)
            }
            (Level::Low, Level::High) => {
                self.door_open = false;
                Some(DoorEdge::Closed)
            }
            _ => None,
        };
        self.last_level = level;
        edge
    }

    /// Poll and publish a security event on an edge
    pub async fn check(
        &mut self,
        router: &TelemetryRouter,
        link: &mut LinkManager,
        now: Instant,
    ) -> Option<DoorEdge> {
        let edge = self.poll()?;
        let timestamp = uptime_secs(self.boot, now);

        let event = match edge {
            DoorEdge::Opened => {
                warn!("[SEC] ALARM: door opened");
                SecurityEvent::door_opened(link.state(), timestamp)
            }
            DoorEdge::Closed => {
                info!("[SEC] Door closed, alarm cleared");
                SecurityEvent::door_closed(timestamp)
            }
        };
        // Dropped when no transport is up
        let _ = router.publish_security(link, &event).await;
        Some(edge)
    }
}
