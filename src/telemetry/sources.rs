//! Measurement, position and host sources read by the router

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use sysinfo::System;

/// Analog measurement channels
pub trait MeasurementSource: Send {
    /// Calibrated value of one channel (volts or amperes)
    fn read_measurement(&mut self, channel: u8) -> io::Result<f32>;
}

/// Position fix provider
pub trait PositionSource: Send {
    /// Consume pending receiver output
    fn poll(&mut self);

    /// Whether the receiver reports a valid location
    fn has_fix(&self) -> bool;

    /// Last known (latitude, longitude)
    fn position(&self) -> Option<(f64, f64)>;

    fn speed_kmh(&self) -> Option<f64>;

    fn satellite_count(&self) -> Option<u32>;

    /// Age of the last location update
    fn fix_age_millis(&self) -> Option<u64>;
}

/// Host resource figures for the status report
pub trait SystemInfo: Send {
    /// Free memory in bytes
    fn free_memory(&mut self) -> u64;
}

/// Everything the scheduled publishers read from
pub struct Sources {
    pub measurements: Box<dyn MeasurementSource>,
    pub position: Box<dyn PositionSource>,
    pub system: Box<dyn SystemInfo>,
}

/// Linear conversion from ADC volts to a physical value
///
/// `value = (adc_volts - offset) * scale`, averaged over `samples` reads.
/// With `rectify` the magnitude is used and anything under `deadband`
/// reads as zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelCalibration {
    pub scale: f32,
    pub offset: f32,
    pub samples: u32,
    pub rectify: bool,
    pub deadband: f32,
}

impl ChannelCalibration {
    /// Resistive divider voltage sensor
    pub fn divider(ratio: f32) -> Self {
        Self {
            scale: ratio,
            offset: 0.0,
            samples: 1,
            rectify: false,
            deadband: 0.0,
        }
    }

    /// Hall-effect current sensor centred on `zero_volts`
    pub fn hall_current(zero_volts: f32, volts_per_amp: f32) -> Self {
        Self {
            scale: 1.0 / volts_per_amp,
            offset: zero_volts,
            samples: 32,
            rectify: true,
            deadband: 0.1,
        }
    }

    pub fn apply(&self, adc_volts: f32) -> f32 {
        let value = (adc_volts - self.offset) * self.scale;
        if !self.rectify {
            return value;
        }
        let magnitude = value.abs();
        if magnitude < self.deadband {
            0.0
        } else {
            magnitude
        }
    }
}

/// ADC channels exposed by the Linux IIO subsystem
pub struct IioMeasurementSource {
    device_dir: PathBuf,
    reference_volts: f32,
    full_scale: f32,
    channels: HashMap<u8, ChannelCalibration>,
}

impl IioMeasurementSource {
    pub fn new(
        device_dir: impl Into<PathBuf>,
        reference_volts: f32,
        resolution_bits: u8,
        channels: HashMap<u8, ChannelCalibration>,
    ) -> Self {
        Self {
            device_dir: device_dir.into(),
            reference_volts,
            full_scale: (1u32 << resolution_bits) as f32,
            channels,
        }
    }

    fn read_raw(&self, channel: u8) -> io::Result<f32> {
        let path = self.device_dir.join(format!("in_voltage{}_raw", channel));
        let text = fs::read_to_string(&path)?;
        text.trim().parse::<f32>().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: {}", path.display(), e),
            )
        })
    }
}

impl MeasurementSource for IioMeasurementSource {
    fn read_measurement(&mut self, channel: u8) -> io::Result<f32> {
        let calibration = self.channels.get(&channel).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("channel {} not configured", channel))
        })?;

        let samples = calibration.samples.max(1);
        let mut sum = 0.0;
        for _ in 0..samples {
            sum += self.read_raw(channel)?;
        }
        let adc_volts = (sum / samples as f32) / self.full_scale * self.reference_volts;
        Ok(calibration.apply(adc_volts))
    }
}

/// Position source for builds without a receiver: never has a fix
#[derive(Debug, Default)]
pub struct NoFixPosition;

impl PositionSource for NoFixPosition {
    fn poll(&mut self) {}

    fn has_fix(&self) -> bool {
        false
    }

    fn position(&self) -> Option<(f64, f64)> {
        None
    }

    fn speed_kmh(&self) -> Option<f64> {
        None
    }

    fn satellite_count(&self) -> Option<u32> {
        None
    }

    fn fix_age_millis(&self) -> Option<u64> {
        None
    }
}

/// Available memory from `sysinfo`
pub struct SysinfoMemory {
    system: System,
}

impl SysinfoMemory {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemInfo for SysinfoMemory {
    fn free_memory(&mut self) -> u64 {
        self.system.refresh_memory();
        self.system.available_memory()
    }
}
