//! Payload schemas published on the device topics
//!
//! Every payload is a flat JSON object; `timestamp` is seconds since boot.

use serde::Serialize;

use crate::state_machine::ConnectionState;

/// Round to a fixed number of decimal places
pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Serialize a payload to the bytes that go on the wire
pub fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(payload)
}

/// One voltage/current reading of a sensor pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub voltage: f64,
    pub ampere: f64,
    pub power: f64,
    pub active_conn: ConnectionState,
    pub timestamp: u64,
}

impl SensorReading {
    /// Build a reading, deriving power and rounding to two decimals
    pub fn new(voltage: f32, ampere: f32, active_conn: ConnectionState, timestamp: u64) -> Self {
        let voltage = voltage as f64;
        let ampere = ampere as f64;
        Self {
            voltage: round_to(voltage, 2),
            ampere: round_to(ampere, 2),
            power: round_to(voltage * ampere, 2),
            active_conn,
            timestamp,
        }
    }
}

/// Position report; falls back to a fixed coordinate without a fresh fix
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionReport {
    pub latitude: f64,
    pub longitude: f64,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub satellites: Option<u32>,
    pub timestamp: u64,
}

/// Periodic status heartbeat
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub online: bool,
    pub active_conn: ConnectionState,
    pub uptime: u64,
    pub free_heap: u64,
    pub gps_valid: bool,
    pub door_alarm: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi_rssi: Option<i32>,
    pub timestamp: u64,
}

/// Door sensor edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventKind {
    DoorOpened,
    DoorClosed,
}

/// Security event published on every door edge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityEvent {
    pub event: SecurityEventKind,
    pub alarm: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_conn: Option<ConnectionState>,
    pub timestamp: u64,
}

impl SecurityEvent {
    /// Door opened: raises the alarm and records the serving transport
    pub fn door_opened(active_conn: ConnectionState, timestamp: u64) -> Self {
        Self {
            event: SecurityEventKind::DoorOpened,
            alarm: true,
            message: "Door opened - possible theft".into(),
            active_conn: Some(active_conn).filter(|c| *c != ConnectionState::None),
            timestamp,
        }
    }

    /// Door closed: clears the alarm
    pub fn door_closed(timestamp: u64) -> Self {
        Self {
            event: SecurityEventKind::DoorClosed,
            alarm: false,
            message: "Door closed - secure".into(),
            active_conn: None,
            timestamp,
        }
    }
}

/// One-shot notice sent after failing back to cellular
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSwitched {
    pub event: &'static str,
    pub message: String,
    pub active_conn: ConnectionState,
    pub timestamp: u64,
}

impl ConnectionSwitched {
    pub fn to_cellular(timestamp: u64) -> Self {
        Self {
            event: "CONN_SWITCHED",
            message: "Switched to cellular, wireless powered down".into(),
            active_conn: ConnectionState::Cellular,
            timestamp,
        }
    }
}
