pub mod router;
pub mod sources;

pub use router::{position_report, RouterConfig, SensorPair, TelemetryRouter};
pub use sources::{
    ChannelCalibration, IioMeasurementSource, MeasurementSource, NoFixPosition, PositionSource,
    Sources, SysinfoMemory, SystemInfo,
};
