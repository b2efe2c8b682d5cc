//! Broker connection state and the publish gate built on it.
//!
//! ```text
//! Connecting ──▶ Connected ──▶ Disconnected ──▶ Connecting ...
//!     │                              ▲
//!     └──▶ Failed(reason) ───────────┘
//! ```
//!
//! The state only ever changes in response to a [`TransportEvent`]; the gate
//! starts out `Connecting` because the transport is started alongside it.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Connection notifications emitted by the transport worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connecting,
    Connected,
    Disconnected,
    Failed(String),
}

#[derive(Debug)]
pub struct ConnectionGate {
    state: ConnectionState,
}

impl Default for ConnectionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionGate {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn can_publish(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Apply a transport event.  Returns `true` when the gate has just
    /// entered `Connected`, i.e. the telemetry subscription must be issued.
    pub fn on_transport_event(&mut self, event: TransportEvent) -> bool {
        let was_connected = self.can_publish();
        self.state = match event {
            TransportEvent::Connecting => ConnectionState::Connecting,
            TransportEvent::Connected => ConnectionState::Connected,
            TransportEvent::Disconnected => ConnectionState::Disconnected,
            TransportEvent::Failed(reason) => ConnectionState::Failed(reason),
        };
        !was_connected && self.can_publish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
