//! Device configuration
//!
//! A TOML file is parsed into `*Input` structs whose fields are all
//! optional, then resolved into the typed settings each component takes.
//! Anything left out keeps the stock device values.

use crate::link::LinkConfig;
use crate::telemetry::{ChannelCalibration, RouterConfig};
use crate::transport::{CellularConfig, SessionConfig, WirelessConfig};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wattscope_shared::{timing, FramingMode, FALLBACK_POSITION};

const DEFAULT_MODEM_PORT: &str = "/dev/ttyS2";
const DEFAULT_MODEM_BAUD: u32 = 9_600;
const DEFAULT_PASS_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceConfigInput {
    pub modem: ModemInput,
    pub broker: BrokerInput,
    pub cellular: CellularInput,
    pub wireless: WirelessInput,
    pub schedule: ScheduleInput,
    pub sensors: SensorsInput,
    pub position: PositionInput,
    pub security: SecurityInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModemInput {
    pub port: Option<String>,
    pub baud: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrokerInput {
    pub host: Option<String>,
    /// Plain TCP port used through the modem
    pub cellular_port: Option<u16>,
    /// TLS port used on wireless
    pub tls_port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: Option<u16>,
    pub framing: Option<FramingMode>,
    pub cellular_client_id: Option<String>,
    pub wireless_client_prefix: Option<String>,
    pub tls: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CellularInput {
    pub apn: Option<String>,
    pub probe_attempts: Option<u32>,
    pub probe_retry_ms: Option<u64>,
    pub registration_polls: Option<u32>,
    pub registration_poll_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WirelessInput {
    pub ssid: Option<String>,
    pub passphrase: Option<String>,
    pub interface: Option<String>,
    pub association_polls: Option<u32>,
    pub association_poll_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScheduleInput {
    pub sensor_ms: Option<u64>,
    pub position_ms: Option<u64>,
    pub status_ms: Option<u64>,
    pub cellular_retry_ms: Option<u64>,
    pub recovery_ms: Option<u64>,
    pub pair_gap_ms: Option<u64>,
    pub pass_interval_ms: Option<u64>,
    pub publish_failure_threshold: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SensorsInput {
    pub iio_device: Option<PathBuf>,
    pub reference_volts: Option<f32>,
    pub resolution_bits: Option<u8>,
    pub voltage_ratio: Option<f32>,
    pub current_zero_volts: Option<f32>,
    pub current_volts_per_amp: Option<f32>,
    pub current_samples: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PositionInput {
    pub fix_max_age_ms: Option<u64>,
    pub fallback_latitude: Option<f64>,
    pub fallback_longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecurityInput {
    pub door_gpio: Option<PathBuf>,
}

/// ADC settings for the IIO measurement source
#[derive(Debug, Clone)]
pub struct SensorSettings {
    pub iio_device: PathBuf,
    pub reference_volts: f32,
    pub resolution_bits: u8,
    pub channels: HashMap<u8, ChannelCalibration>,
}

/// Fully resolved device settings
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub modem_port: String,
    pub modem_baud: u32,
    pub cellular: CellularConfig,
    pub wireless: WirelessConfig,
    pub wireless_interface: String,
    pub session: SessionConfig,
    pub link: LinkConfig,
    pub router: RouterConfig,
    pub sensors: SensorSettings,
    pub door_gpio: PathBuf,
    pub pass_interval: Duration,
}

/// Read and parse a TOML config file
pub fn load(path: &Path) -> Result<DeviceConfigInput> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn millis(value: Option<u64>, default: u64, name: &str) -> Result<Duration, String> {
    match value.unwrap_or(default) {
        0 => Err(format!("{} must be greater than zero", name)),
        ms => Ok(Duration::from_millis(ms)),
    }
}

fn non_empty(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}

impl DeviceConfigInput {
    pub fn resolve(self) -> Result<DeviceConfig, String> {
        let broker = self.broker;
        let host = non_empty(broker.host, "localhost");
        let username = broker.username.unwrap_or_default();
        let password = broker.password.unwrap_or_default();
        let keep_alive_secs = broker.keep_alive_secs.unwrap_or(timing::KEEP_ALIVE_SECS);
        if keep_alive_secs == 0 {
            return Err("broker.keep_alive_secs must be greater than zero".into());
        }

        let cellular_defaults = CellularConfig::default();
        let probe_attempts = self
            .cellular
            .probe_attempts
            .unwrap_or(cellular_defaults.probe_attempts);
        let registration_polls = self
            .cellular
            .registration_polls
            .unwrap_or(cellular_defaults.registration_polls);
        if probe_attempts == 0 || registration_polls == 0 {
            return Err("cellular probe_attempts and registration_polls must be at least 1".into());
        }
        let cellular = CellularConfig {
            apn: non_empty(self.cellular.apn, &cellular_defaults.apn),
            broker_host: host.clone(),
            broker_port: broker.cellular_port.unwrap_or(cellular_defaults.broker_port),
            client_id: non_empty(broker.cellular_client_id, &cellular_defaults.client_id),
            username: username.clone(),
            password: password.clone(),
            keep_alive_secs,
            framing: broker.framing.unwrap_or_default(),
            probe_attempts,
            probe_retry_delay: millis(
                self.cellular.probe_retry_ms,
                cellular_defaults.probe_retry_delay.as_millis() as u64,
                "cellular.probe_retry_ms",
            )?,
            registration_polls,
            registration_poll_delay: millis(
                self.cellular.registration_poll_ms,
                cellular_defaults.registration_poll_delay.as_millis() as u64,
                "cellular.registration_poll_ms",
            )?,
            ..cellular_defaults
        };

        let wireless_defaults = WirelessConfig::default();
        let association_polls = self
            .wireless
            .association_polls
            .unwrap_or(wireless_defaults.association_polls);
        if association_polls == 0 {
            return Err("wireless.association_polls must be at least 1".into());
        }
        let wireless = WirelessConfig {
            ssid: self.wireless.ssid.unwrap_or_default(),
            passphrase: self.wireless.passphrase.unwrap_or_default(),
            association_polls,
            association_poll_delay: millis(
                self.wireless.association_poll_ms,
                wireless_defaults.association_poll_delay.as_millis() as u64,
                "wireless.association_poll_ms",
            )?,
            client_id_prefix: non_empty(
                broker.wireless_client_prefix,
                &wireless_defaults.client_id_prefix,
            ),
        };

        let session_defaults = SessionConfig::default();
        let session = SessionConfig {
            host,
            port: broker.tls_port.unwrap_or(session_defaults.port),
            username,
            password,
            keep_alive: Duration::from_secs(u64::from(keep_alive_secs)),
            tls: broker.tls.unwrap_or(session_defaults.tls),
            ..session_defaults
        };

        let schedule = self.schedule;
        let link = LinkConfig {
            cellular_retry_interval: millis(
                schedule.cellular_retry_ms,
                timing::CELLULAR_RETRY_INTERVAL_MS,
                "schedule.cellular_retry_ms",
            )?,
            recovery_delay: millis(
                schedule.recovery_ms,
                timing::RECOVERY_DELAY_MS,
                "schedule.recovery_ms",
            )?,
            publish_failure_threshold: schedule
                .publish_failure_threshold
                .unwrap_or(LinkConfig::default().publish_failure_threshold),
            ..LinkConfig::default()
        };

        let router_defaults = RouterConfig::default();
        let router = RouterConfig {
            sensor_interval: millis(
                schedule.sensor_ms,
                timing::SENSOR_INTERVAL_MS,
                "schedule.sensor_ms",
            )?,
            position_interval: millis(
                schedule.position_ms,
                timing::POSITION_INTERVAL_MS,
                "schedule.position_ms",
            )?,
            status_interval: millis(
                schedule.status_ms,
                timing::STATUS_INTERVAL_MS,
                "schedule.status_ms",
            )?,
            pair_gap: Duration::from_millis(
                schedule.pair_gap_ms.unwrap_or(timing::SENSOR_PAIR_GAP_MS),
            ),
            fix_max_age: millis(
                self.position.fix_max_age_ms,
                timing::FIX_MAX_AGE_MS,
                "position.fix_max_age_ms",
            )?,
            fallback_position: (
                self.position.fallback_latitude.unwrap_or(FALLBACK_POSITION.0),
                self.position.fallback_longitude.unwrap_or(FALLBACK_POSITION.1),
            ),
            ..router_defaults
        };

        let sensors = resolve_sensors(self.sensors, &router)?;

        Ok(DeviceConfig {
            modem_port: non_empty(self.modem.port, DEFAULT_MODEM_PORT),
            modem_baud: self.modem.baud.unwrap_or(DEFAULT_MODEM_BAUD),
            cellular,
            wireless,
            wireless_interface: non_empty(self.wireless.interface, "wlan0"),
            session,
            link,
            router,
            sensors,
            door_gpio: self
                .security
                .door_gpio
                .unwrap_or_else(|| PathBuf::from("/sys/class/gpio/gpio13/value")),
            pass_interval: millis(
                schedule.pass_interval_ms,
                DEFAULT_PASS_INTERVAL_MS,
                "schedule.pass_interval_ms",
            )?,
        })
    }
}

fn resolve_sensors(input: SensorsInput, router: &RouterConfig) -> Result<SensorSettings, String> {
    let resolution_bits = input.resolution_bits.unwrap_or(12);
    if !(1..=24).contains(&resolution_bits) {
        return Err(format!("sensors.resolution_bits {} out of range", resolution_bits));
    }
    let volts_per_amp = input.current_volts_per_amp.unwrap_or(0.066);
    if volts_per_amp <= 0.0 {
        return Err("sensors.current_volts_per_amp must be positive".into());
    }

    let voltage = ChannelCalibration::divider(input.voltage_ratio.unwrap_or(7.576));
    let mut current =
        ChannelCalibration::hall_current(input.current_zero_volts.unwrap_or(1.65), volts_per_amp);
    if let Some(samples) = input.current_samples {
        current.samples = samples.max(1);
    }

    let mut channels = HashMap::new();
    for pair in &router.pairs {
        channels.insert(pair.voltage_channel, voltage.clone());
        channels.insert(pair.current_channel, current.clone());
    }

    Ok(SensorSettings {
        iio_device: input
            .iio_device
            .unwrap_or_else(|| PathBuf::from("/sys/bus/iio/devices/iio:device0")),
        reference_volts: input.reference_volts.unwrap_or(3.3),
        resolution_bits,
        channels,
    })
}
