//! Telemetry router
//!
//! Serializes readings and hands them to whichever transport the link
//! manager reports as active. Each scheduled producer keeps its own timer
//! and fires independently; within one pass the order is sensor pairs,
//! position, then status.

use super::sources::{PositionSource, Sources};
use crate::clock::{uptime_secs, IntervalTimer};
use crate::link::LinkManager;
use crate::transport::TransportError;
use serde::Serialize;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use wattscope_shared::payload::{self, round_to, PositionReport, SensorReading, StatusReport};
use wattscope_shared::{timing, topics, ConnectionState, SecurityEvent, FALLBACK_POSITION};

/// One voltage/current channel pair published on its own topic
#[derive(Debug, Clone, PartialEq)]
pub struct SensorPair {
    pub label: String,
    pub topic: String,
    pub voltage_channel: u8,
    pub current_channel: u8,
}

/// Router schedule and topic settings
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub sensor_interval: Duration,
    pub position_interval: Duration,
    pub status_interval: Duration,
    /// Pause between consecutive sensor pair publishes
    pub pair_gap: Duration,
    /// Fixes older than this are reported as invalid
    pub fix_max_age: Duration,
    pub fallback_position: (f64, f64),
    pub pairs: Vec<SensorPair>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            sensor_interval: Duration::from_millis(timing::SENSOR_INTERVAL_MS),
            position_interval: Duration::from_millis(timing::POSITION_INTERVAL_MS),
            status_interval: Duration::from_millis(timing::STATUS_INTERVAL_MS),
            pair_gap: Duration::from_millis(timing::SENSOR_PAIR_GAP_MS),
            fix_max_age: Duration::from_millis(timing::FIX_MAX_AGE_MS),
            fallback_position: FALLBACK_POSITION,
            pairs: vec![
                SensorPair {
                    label: "SOLAR".into(),
                    topic: topics::SOLAR.into(),
                    voltage_channel: 0,
                    current_channel: 2,
                },
                SensorPair {
                    label: "TURBINE".into(),
                    topic: topics::TURBINE.into(),
                    voltage_channel: 1,
                    current_channel: 3,
                },
            ],
        }
    }
}

/// Scheduled publishers and the routing entry point
pub struct TelemetryRouter {
    config: RouterConfig,
    sensor_timer: IntervalTimer,
    position_timer: IntervalTimer,
    status_timer: IntervalTimer,
    boot: Instant,
}

impl TelemetryRouter {
    pub fn new(config: RouterConfig, boot: Instant) -> Self {
        Self {
            sensor_timer: IntervalTimer::new(config.sensor_interval, boot),
            position_timer: IntervalTimer::new(config.position_interval, boot),
            status_timer: IntervalTimer::new(config.status_interval, boot),
            config,
            boot,
        }
    }

    /// Route raw bytes to the active transport
    pub async fn publish(
        &self,
        link: &mut LinkManager,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        match link.publish(topic, payload).await {
            Ok(()) => {
                debug!("[TELEMETRY] {} <- {}", topic, String::from_utf8_lossy(payload));
                Ok(())
            }
            Err(e) => {
                warn!("[TELEMETRY] Publish to {} failed: {}", topic, e);
                Err(e)
            }
        }
    }

    /// Serialize and route one payload
    pub async fn publish_json<T: Serialize + Sync>(
        &self,
        link: &mut LinkManager,
        topic: &str,
        message: &T,
    ) -> Result<(), TransportError> {
        let bytes = payload::encode(message)?;
        self.publish(link, topic, &bytes).await
    }

    /// Security events go out immediately, outside the schedule
    pub async fn publish_security(
        &self,
        link: &mut LinkManager,
        event: &SecurityEvent,
    ) -> Result<(), TransportError> {
        self.publish_json(link, topics::SECURITY, event).await
    }

    /// Build and route a status heartbeat
    pub async fn publish_status(
        &self,
        link: &mut LinkManager,
        sources: &mut Sources,
        door_alarm: bool,
        now: Instant,
    ) -> Result<(), TransportError> {
        let state = link.state();
        let wifi_rssi = if state == ConnectionState::Wireless {
            link.signal_strength().await
        } else {
            None
        };
        let uptime = uptime_secs(self.boot, now);
        let status = StatusReport {
            online: true,
            active_conn: state,
            uptime,
            free_heap: sources.system.free_memory(),
            gps_valid: sources.position.has_fix(),
            door_alarm,
            wifi_rssi,
            timestamp: uptime,
        };
        self.publish_json(link, topics::STATUS, &status).await
    }

    /// Run whichever scheduled publishers are due
    pub async fn tick(
        &mut self,
        link: &mut LinkManager,
        sources: &mut Sources,
        door_alarm: bool,
        now: Instant,
    ) {
        if self.sensor_timer.due(now) {
            self.publish_sensors(link, sources, now).await;
        }

        if self.position_timer.due(now) {
            let report = position_report(
                sources.position.as_ref(),
                self.config.fix_max_age,
                self.config.fallback_position,
                uptime_secs(self.boot, now),
            );
            let _ = self.publish_json(link, topics::POSITION, &report).await;
        }

        if self.status_timer.due(now) {
            let _ = self.publish_status(link, sources, door_alarm, now).await;
            if link.state() == ConnectionState::Cellular {
                if let Err(e) = link.keep_alive().await {
                    warn!("[TELEMETRY] Keep-alive failed: {}", e);
                }
            }
        }
    }

    async fn publish_sensors(&self, link: &mut LinkManager, sources: &mut Sources, now: Instant) {
        let timestamp = uptime_secs(self.boot, now);
        for (index, pair) in self.config.pairs.iter().enumerate() {
            if index > 0 {
                sleep(self.config.pair_gap).await;
            }

            let voltage = sources.measurements.read_measurement(pair.voltage_channel);
            let ampere = sources.measurements.read_measurement(pair.current_channel);
            let (voltage, ampere) = match (voltage, ampere) {
                (Ok(v), Ok(a)) => (v, a),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("[TELEMETRY] {} read failed: {}", pair.label, e);
                    continue;
                }
            };

            let reading = SensorReading::new(voltage, ampere, link.state(), timestamp);
            if self.publish_json(link, &pair.topic, &reading).await.is_ok() {
                info!(
                    "[TELEMETRY] {} {:.2} V {:.2} A {:.2} W",
                    pair.label, reading.voltage, reading.ampere, reading.power
                );
            }
        }
    }
}

/// Position payload for the current fix, or the fallback coordinate
pub fn position_report(
    source: &dyn PositionSource,
    fix_max_age: Duration,
    fallback: (f64, f64),
    timestamp: u64,
) -> PositionReport {
    let fresh = source.has_fix()
        && source
            .fix_age_millis()
            .is_some_and(|age| age < fix_max_age.as_millis() as u64);

    let (latitude, longitude, valid) = match source.position() {
        Some((lat, lon)) if fresh => (lat, lon, true),
        _ => (fallback.0, fallback.1, false),
    };

    PositionReport {
        latitude,
        longitude,
        valid,
        speed_kmh: source.speed_kmh().map(|s| round_to(s, 1)),
        satellites: source.satellite_count(),
        timestamp,
    }
}
