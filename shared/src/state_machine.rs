//! Link State Machine
//!
//! Tracks which transport is serving publishes and the valid transitions
//! between them. `None` is a recovery state, never terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The transport currently serving publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    /// No transport; renegotiation pending
    #[default]
    None,
    /// Wireless fallback active, cellular retried in the background
    Wireless,
    /// Cellular primary active
    Cellular,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::None => write!(f, "NONE"),
            ConnectionState::Wireless => write!(f, "WIRELESS"),
            ConnectionState::Cellular => write!(f, "CELLULAR"),
        }
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Negotiation brought up the cellular transport
    CellularUp,
    /// Negotiation fell back to the wireless transport
    WirelessUp,
    /// Negotiation failed on both transports
    NegotiationFailed,
    /// Background cellular retry succeeded while on wireless
    CellularRetrySucceeded,
    /// Background cellular retry failed while on wireless
    CellularRetryFailed,
    /// Too many consecutive publish failures on the active transport
    PublishFailuresExceeded,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// State changed
    Changed {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Event accepted, state kept
    Unchanged(ConnectionState),
    /// Event not valid from the current state
    Invalid {
        from: ConnectionState,
        event: LinkEvent,
    },
}

/// The link selection state machine
#[derive(Debug, Default)]
pub struct LinkStateMachine {
    current_state: ConnectionState,
    switch_count: u32,
}

impl LinkStateMachine {
    /// Create a new state machine in the `None` state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    /// Number of state changes since creation
    pub fn switch_count(&self) -> u32 {
        self.switch_count
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent) -> TransitionResult {
        let from = self.current_state;
        match self.get_next_state(event) {
            Some(to) if to != from => {
                self.current_state = to;
                self.switch_count += 1;
                TransitionResult::Changed { from, to }
            }
            Some(_) => TransitionResult::Unchanged(from),
            None => TransitionResult::Invalid { from, event },
        }
    }

    fn get_next_state(&self, event: LinkEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        use LinkEvent::*;

        match (self.current_state, event) {
            // Negotiation only runs from None
            (None, CellularUp) => Some(Cellular),
            (None, WirelessUp) => Some(Wireless),
            (None, NegotiationFailed) => Some(None),

            // Fail-back from the fallback
            (Wireless, CellularRetrySucceeded) => Some(Cellular),
            (Wireless, CellularRetryFailed) => Some(Wireless),

            // Cellular drop detection
            (Cellular, PublishFailuresExceeded) => Some(None),

            _ => Option::None,
        }
    }
}

/// Check if a transition from one state to another is generally valid
pub fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;

    matches!(
        (from, to),
        (None, Cellular) | (None, Wireless) | (Wireless, Cellular) | (Cellular, None)
    ) || from == to
}
