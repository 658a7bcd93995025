pub mod monitor;

pub use monitor::{BinaryInput, DoorEdge, Level, SecurityMonitor, SysfsGpioInput};
