//! Operator commands: grammar, validation and publication on
//! `<account>/<mac>/cmd`.
//!
//! Current firmware understands `set temp N`, `set feed N` and
//! `force temp|ph|feed`.  Older revisions only know `temperature <v>`,
//! `ph <v>`, `feed` and `stop`, so those stay accepted and are sent verbatim.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::gate::ConnectionGate;
use crate::transport::{Transport, TransportError};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("not connected to the broker, try again once connected")]
    NotConnected,
    #[error("no target device selected")]
    InvalidTarget,
    #[error("interval must be a non-negative whole number of seconds, got '{0}'")]
    InvalidInterval(String),
    #[error("expected a number, got '{0}'")]
    InvalidValue(String),
    #[error("unrecognized command '{0}'")]
    Unrecognized(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Temperature/pH sampling interval in seconds; 0 disables it.
    SetTempInterval(u32),
    /// Feeding interval in seconds; 0 disables automatic feeding.
    SetFeedInterval(u32),
    ForceTemp,
    ForcePh,
    ForceFeed,
    LegacyTemperature(f64),
    LegacyPh(f64),
    LegacyFeed,
    LegacyStop,
}

/// Which device the operator is talking to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub account_id: String,
    pub target_mac: String,
}

impl DeviceIdentity {
    pub fn new(account_id: impl Into<String>, target_mac: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            target_mac: target_mac.into(),
        }
    }

    /// Telemetry from every device of the account.  Firmware logs live
    /// beside `data/`, not under it.
    pub fn telemetry_filters(&self) -> [String; 2] {
        [
            format!("{}/+/data/#", self.account_id),
            format!("{}/+/logs", self.account_id),
        ]
    }

    pub fn command_topic(&self) -> String {
        format!("{}/{}/cmd", self.account_id, self.target_mac.trim())
    }

    pub fn has_target(&self) -> bool {
        !self.target_mac.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetTempInterval(s) => write!(f, "set temp {s}"),
            Self::SetFeedInterval(s) => write!(f, "set feed {s}"),
            Self::ForceTemp => write!(f, "force temp"),
            Self::ForcePh => write!(f, "force ph"),
            Self::ForceFeed => write!(f, "force feed"),
            Self::LegacyTemperature(v) => write!(f, "temperature {v}"),
            Self::LegacyPh(v) => write!(f, "ph {v}"),
            Self::LegacyFeed => write!(f, "feed"),
            Self::LegacyStop => write!(f, "stop"),
        }
    }
}

fn parse_interval(token: &str) -> Result<u32, CommandError> {
    token
        .parse::<u32>()
        .map_err(|_| CommandError::InvalidInterval(token.to_string()))
}

fn parse_value(token: &str) -> Result<f64, CommandError> {
    token
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CommandError::InvalidValue(token.to_string()))
}

impl FromStr for Command {
    type Err = CommandError;

    /// Keywords are case-insensitive and may be separated by any whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let tokens: Vec<&str> = lowered.split_whitespace().collect();
        match tokens.as_slice() {
            ["set", "temp", n] => Ok(Self::SetTempInterval(parse_interval(n)?)),
            ["set", "feed", n] => Ok(Self::SetFeedInterval(parse_interval(n)?)),
            ["force", "temp"] => Ok(Self::ForceTemp),
            ["force", "ph"] => Ok(Self::ForcePh),
            ["force", "feed"] => Ok(Self::ForceFeed),
            ["temperature", v] => Ok(Self::LegacyTemperature(parse_value(v)?)),
            ["ph", v] => Ok(Self::LegacyPh(parse_value(v)?)),
            ["feed"] => Ok(Self::LegacyFeed),
            ["stop"] => Ok(Self::LegacyStop),
            _ => Err(CommandError::Unrecognized(s.trim().to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Publish `command` to the target device.  Nothing is queued: when the gate
/// is closed the caller gets `NotConnected` and the transport is not touched.
pub fn dispatch<T: Transport + ?Sized>(
    command: &Command,
    identity: &DeviceIdentity,
    gate: &ConnectionGate,
    transport: &T,
) -> Result<(), CommandError> {
    if !gate.can_publish() {
        return Err(CommandError::NotConnected);
    }
    if !identity.has_target() {
        return Err(CommandError::InvalidTarget);
    }
    let topic = identity.command_topic();
    let payload = command.to_string();
    transport.publish(&topic, payload.as_bytes())?;
    tracing::info!(%topic, command = %payload, "command published");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
