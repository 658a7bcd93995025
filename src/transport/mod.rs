pub mod cellular;
pub mod error;
pub mod modem;
pub mod mqtt_session;
pub mod nmcli;
pub mod traits;
pub mod wireless;

pub use cellular::{CellularConfig, CellularTransport};
pub use error::TransportError;
pub use modem::{AtCommand, ModemChannel};
pub use mqtt_session::{MqttSession, SessionConfig};
pub use nmcli::NmcliLink;
pub use traits::Transport;
pub use wireless::{SessionClient, WirelessConfig, WirelessLink, WirelessTransport};
