//! What the bridge tells the operator's screen.
//!
//! Every call happens on the bridge's control task.  Implementations only
//! store or render the values; they never call back into the bridge.

use serde::Serialize;

use crate::gate::ConnectionState;
use crate::store::DeviceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Telemetry,
    Feed,
    Command,
    Device,
    Error,
    System,
}

pub trait Presenter {
    fn set_temperature(&mut self, display: &str);
    fn set_ph(&mut self, display: &str);
    fn set_last_feed(&mut self, display: &str);
    fn set_next_feed(&mut self, display: &str);
    fn set_status(&mut self, display: &str);

    fn set_connection(&mut self, _state: &ConnectionState) {}
    fn set_device(&mut self, _config: &DeviceConfig) {}
    fn record_event(&mut self, _kind: EventKind, _detail: &str) {}
}
