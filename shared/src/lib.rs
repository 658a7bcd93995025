//! WattScope Shared Types
//!
//! This crate provides the I/O-free pieces of the telemetry device: the
//! hand-built MQTT control frames used on the cellular path, the payload
//! schemas, and the link selection state machine.

pub mod codec;
pub mod payload;
pub mod state_machine;

// Re-export commonly used types at crate root
pub use codec::{ConnAck, ConnectOptions, FrameError, FramingMode};
pub use payload::{
    ConnectionSwitched, PositionReport, SecurityEvent, SecurityEventKind, SensorReading,
    StatusReport,
};
pub use state_machine::{ConnectionState, LinkEvent, LinkStateMachine, TransitionResult};

/// Scheduling defaults for the device loop
pub mod timing {
    /// Sensor pair publish interval
    pub const SENSOR_INTERVAL_MS: u64 = 2_000;

    /// Position publish interval
    pub const POSITION_INTERVAL_MS: u64 = 5_000;

    /// Status heartbeat interval (also the cellular keep-alive ping)
    pub const STATUS_INTERVAL_MS: u64 = 30_000;

    /// Background cellular retry interval while on wireless
    pub const CELLULAR_RETRY_INTERVAL_MS: u64 = 60_000;

    /// Delay before renegotiating when no transport is up
    pub const RECOVERY_DELAY_MS: u64 = 5_000;

    /// A position fix older than this is reported as invalid
    pub const FIX_MAX_AGE_MS: u64 = 5_000;

    /// Gap between the two sensor pair publishes
    pub const SENSOR_PAIR_GAP_MS: u64 = 100;

    /// MQTT keep-alive advertised in CONNECT
    pub const KEEP_ALIVE_SECS: u16 = 60;
}

/// Topic names
pub mod topics {
    pub const SOLAR: &str = "wattscope/sensor/solar";
    pub const TURBINE: &str = "wattscope/sensor/turbine";
    pub const POSITION: &str = "wattscope/gps";
    pub const STATUS: &str = "wattscope/status";
    pub const SECURITY: &str = "wattscope/security";

    /// All topics this device publishes on
    pub const ALL: [&str; 5] = [SOLAR, TURBINE, POSITION, STATUS, SECURITY];
}

/// Coordinate reported when no fresh fix is available
pub const FALLBACK_POSITION: (f64, f64) = (-7.2837547, 112.7961404);
