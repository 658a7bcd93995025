//! Transport trait abstraction for the cellular and wireless links

use super::error::TransportError;
use async_trait::async_trait;

/// A publish/subscribe transport the link manager can arm
#[async_trait]
pub trait Transport: Send {
    /// Human-readable name for this transport
    fn name(&self) -> &'static str;

    /// Bring the link and broker session up
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Publish one message at QoS 0
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Whether the last connect succeeded and nothing has torn it down since
    fn is_connected(&self) -> bool;

    /// Release whatever the last connect attempt left open
    async fn teardown(&mut self);

    /// Per-pass upkeep while this transport is armed
    async fn maintain(&mut self) {}

    /// Protocol-level keep-alive, sent on the status tick
    async fn keep_alive(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Received signal strength in dBm, when the link reports one
    async fn signal_strength(&mut self) -> Option<i32> {
        None
    }
}
