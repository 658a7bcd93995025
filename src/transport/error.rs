//! Transport failure taxonomy

use thiserror::Error;
use wattscope_shared::FrameError;

/// Failures from a connect or publish attempt
///
/// Every variant is local to the attempt that produced it; none is fatal.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Modem unresponsive after {attempts} probe attempts")]
    ModemUnresponsive { attempts: u32 },

    #[error("Network registration not reached after {polls} polls")]
    NetworkRegistrationTimeout { polls: u32 },

    #[error("Bearer attach failed: {0}")]
    BearerAttachFailure(String),

    #[error("Session open failed: {0}")]
    SessionOpenFailure(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailure(String),

    #[error("Wireless association failed after {attempts} polls")]
    WirelessAssociationFailure { attempts: u32 },

    #[error("Wireless session failed: {0}")]
    WirelessSessionFailure(String),

    #[error("Publish failed: {0}")]
    PublishFailure(String),

    #[error("No active transport")]
    NoActiveTransport,

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
