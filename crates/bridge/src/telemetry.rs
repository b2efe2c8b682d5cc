//! Decoding of device telemetry published on `<account>/<mac>/data/<kind>`
//! and of firmware log lines published on `<account>/<mac>/logs`.
//!
//! Payloads are small comma-separated strings produced by the aquarium
//! firmware.  Decoding is pure and never fails on payload content: a numeric
//! field that does not parse degrades to the raw text so the operator still
//! sees what the device sent.  Only a topic of the wrong shape is an error.

use std::fmt;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed telemetry topic '{0}' (expected <account>/<mac>/data/<kind> or .../logs)")]
    MalformedTopic(String),
    #[error("unsupported telemetry kind '{0}'")]
    UnsupportedKind(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryKind {
    Temperature,
    Ph,
    Feed,
    Logs,
}

impl TelemetryKind {
    fn from_segment(s: &str) -> Option<Self> {
        match s {
            "temperature" => Some(Self::Temperature),
            "ph" => Some(Self::Ph),
            "feed" => Some(Self::Feed),
            "logs" => Some(Self::Logs),
            _ => None,
        }
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temperature => write!(f, "temperature"),
            Self::Ph => write!(f, "ph"),
            Self::Feed => write!(f, "feed"),
            Self::Logs => write!(f, "logs"),
        }
    }
}

/// The addressing parts of a telemetry topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryTopic<'a> {
    pub account_id: &'a str,
    pub mac: &'a str,
    pub kind: TelemetryKind,
}

/// A temperature or pH reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// `None` when the first field was not a number.
    pub value: Option<f64>,
    pub timestamp: Option<i64>,
    /// The full payload as received (trimmed).
    pub raw: String,
}

impl Reading {
    /// Text shown to the operator: the value with two decimals, or the raw
    /// payload when it could not be parsed.
    pub fn display(&self) -> String {
        match self.value {
            Some(v) => format!("{v:.2}"),
            None => self.raw.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Success,
    Failure,
    Unknown,
}

impl FeedStatus {
    fn from_token(token: Option<&str>) -> Self {
        match token.map(str::trim) {
            Some(t) if t.eq_ignore_ascii_case("success") => Self::Success,
            Some(t) if t.eq_ignore_ascii_case("failure") => Self::Failure,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEvent {
    pub timestamp: Option<i64>,
    /// Pre-formatted time from the device ("MM/DD HH:MM"), or the raw payload
    /// when the device did not send one.
    pub display_time: String,
    pub status: FeedStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetrySample {
    Temperature(Reading),
    Ph(Reading),
    Feed(FeedEvent),
    Log(String),
}

// ---------------------------------------------------------------------------
// Topic / payload decoding
// ---------------------------------------------------------------------------

/// Split "<account>/<mac>/data/<kind>" or "<account>/<mac>/logs" into its
/// parts.
pub fn parse_topic(topic: &str) -> Result<TelemetryTopic<'_>, DecodeError> {
    let parts: Vec<&str> = topic.split('/').collect();
    let kind = match parts.as_slice() {
        [_, _, "logs"] => TelemetryKind::Logs,
        [_, _, "data", kind] => TelemetryKind::from_segment(kind)
            .ok_or_else(|| DecodeError::UnsupportedKind(kind.to_string()))?,
        _ => return Err(DecodeError::MalformedTopic(topic.to_string())),
    };
    Ok(TelemetryTopic {
        account_id: parts[0],
        mac: parts[1],
        kind,
    })
}

/// Decode a payload already known to belong to `kind`.
pub fn decode_payload(kind: TelemetryKind, payload: &[u8]) -> TelemetrySample {
    let text = String::from_utf8_lossy(payload).trim().to_string();
    match kind {
        TelemetryKind::Temperature => TelemetrySample::Temperature(decode_reading(text)),
        TelemetryKind::Ph => TelemetrySample::Ph(decode_reading(text)),
        TelemetryKind::Feed => TelemetrySample::Feed(decode_feed(text)),
        TelemetryKind::Logs => TelemetrySample::Log(text),
    }
}

pub fn decode(topic: &str, payload: &[u8]) -> Result<TelemetrySample, DecodeError> {
    let parsed = parse_topic(topic)?;
    Ok(decode_payload(parsed.kind, payload))
}

/// "<value>[,<epoch>]"
fn decode_reading(raw: String) -> Reading {
    let mut fields = raw.split(',').map(str::trim);
    let value = fields.next().and_then(|f| f.parse::<f64>().ok());
    let timestamp = match value {
        Some(_) => fields.next().and_then(|f| f.parse::<i64>().ok()),
        None => None,
    };
    Reading {
        value,
        timestamp,
        raw,
    }
}

/// "[<epoch>][,<display time>][,<status>]"
fn decode_feed(raw: String) -> FeedEvent {
    let fields: Vec<&str> = raw.splitn(3, ',').map(str::trim).collect();
    let timestamp = fields.first().and_then(|f| f.parse::<i64>().ok());
    let display_time = match fields.get(1) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => raw.clone(),
    };
    FeedEvent {
        timestamp,
        display_time,
        status: FeedStatus::from_token(fields.get(2).copied()),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
