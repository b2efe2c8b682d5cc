use serde::Serialize;
use std::collections::VecDeque;
use time::OffsetDateTime;
use tokio::sync::watch;

use crate::gate::ConnectionState;
use crate::presenter::{EventKind, Presenter};
use crate::store::DeviceConfig;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct DashboardEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

/// What the API returns.  Events are kept newest first.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardStatus {
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub temperature: String,
    pub ph: String,
    pub last_feed: String,
    pub next_feed: String,
    pub status: String,
    pub connection: ConnectionState,
    pub device: DeviceConfig,
    pub events: VecDeque<DashboardEvent>,
}

impl Default for DashboardStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl DashboardStatus {
    pub fn new() -> Self {
        Self {
            started_at: OffsetDateTime::now_utc(),
            temperature: "--".into(),
            ph: "--".into(),
            last_feed: "--".into(),
            next_feed: "--".into(),
            status: String::new(),
            connection: ConnectionState::Connecting,
            device: DeviceConfig::default(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_back();
        }
        self.events.push_front(DashboardEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ---------------------------------------------------------------------------
// Presenter publishing snapshots to readers
// ---------------------------------------------------------------------------

/// Owned by the bridge's control task.  The snapshot is edited in place
/// inside the `watch` channel; readers only ever see complete updates.
pub struct Dashboard {
    tx: watch::Sender<DashboardStatus>,
}

impl Dashboard {
    pub fn new() -> (Self, watch::Receiver<DashboardStatus>) {
        let (tx, rx) = watch::channel(DashboardStatus::new());
        (Self { tx }, rx)
    }

    pub fn state(&self) -> watch::Ref<'_, DashboardStatus> {
        self.tx.borrow()
    }

    fn update(&self, edit: impl FnOnce(&mut DashboardStatus)) {
        self.tx.send_modify(edit);
    }
}

impl Presenter for Dashboard {
    fn set_temperature(&mut self, display: &str) {
        self.update(|s| s.temperature = display.to_string());
    }

    fn set_ph(&mut self, display: &str) {
        self.update(|s| s.ph = display.to_string());
    }

    fn set_last_feed(&mut self, display: &str) {
        self.update(|s| s.last_feed = display.to_string());
    }

    fn set_next_feed(&mut self, display: &str) {
        self.update(|s| s.next_feed = display.to_string());
    }

    fn set_status(&mut self, display: &str) {
        self.update(|s| s.status = display.to_string());
    }

    fn set_connection(&mut self, state: &ConnectionState) {
        self.update(|s| s.connection = state.clone());
    }

    fn set_device(&mut self, config: &DeviceConfig) {
        self.update(|s| s.device = config.clone());
    }

    fn record_event(&mut self, kind: EventKind, detail: &str) {
        self.update(|s| s.push_event(kind, detail.to_string()));
    }
}

// ===========================================================================
// Tests
// ===========================================================================
