//! The pub/sub operations the bridge needs from a broker client.
//!
//! Both calls are expected to enqueue and return immediately; delivery and
//! reconnection are the client's business.  Connection changes and inbound
//! publishes travel the other way as [`crate::bridge::BridgeEvent`]s.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("subscribe to '{filter}' failed: {reason}")]
    Subscribe { filter: String, reason: String },
}

pub trait Transport {
    fn subscribe(&self, filter: &str) -> Result<(), TransportError>;
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;
}
