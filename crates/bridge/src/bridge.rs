//! The control loop tying decoder, store, predictor, gate and dispatcher
//! together.
//!
//! A [`Bridge`] lives on one task and is the only thing that mutates device
//! config, connection state or the presenter.  The MQTT pump and the web
//! layer reach it through [`BridgeEvent`]s on a bounded channel.

use std::time::Duration;

use thiserror::Error;
use time::UtcOffset;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::now_unix;
use crate::command::{dispatch, Command, CommandError, DeviceIdentity};
use crate::config::Settings;
use crate::gate::{ConnectionGate, ConnectionState, TransportEvent};
use crate::presenter::{EventKind, Presenter};
use crate::schedule::{predict_next, ScheduledPrediction};
use crate::store::{ConfigStore, DeviceConfig, StoreError};
use crate::telemetry::{decode_payload, parse_topic, TelemetrySample};
use crate::transport::Transport;

// ---------------------------------------------------------------------------
// Control messages
// ---------------------------------------------------------------------------

pub type Reply = oneshot::Sender<Result<(), CommandError>>;

#[derive(Debug)]
pub enum BridgeEvent {
    Inbound { topic: String, payload: Vec<u8> },
    Transport(TransportEvent),
    Submit { command: Command, reply: Reply },
    SetTarget { mac: String, reply: Reply },
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("bridge is not running")]
    Closed,
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Cloneable front door for operator requests.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    tx: mpsc::Sender<BridgeEvent>,
}

impl BridgeHandle {
    pub fn new(tx: mpsc::Sender<BridgeEvent>) -> Self {
        Self { tx }
    }

    pub async fn submit(&self, command: Command) -> Result<(), SubmitError> {
        let (reply, rx) = oneshot::channel();
        self.request(BridgeEvent::Submit { command, reply }, rx).await
    }

    pub async fn set_target(&self, mac: impl Into<String>) -> Result<(), SubmitError> {
        let (reply, rx) = oneshot::channel();
        let mac = mac.into();
        self.request(BridgeEvent::SetTarget { mac, reply }, rx).await
    }

    async fn request(
        &self,
        event: BridgeEvent,
        rx: oneshot::Receiver<Result<(), CommandError>>,
    ) -> Result<(), SubmitError> {
        self.tx.send(event).await.map_err(|_| SubmitError::Closed)?;
        rx.await.map_err(|_| SubmitError::Closed)??;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

pub struct Bridge<T, P> {
    identity: DeviceIdentity,
    gate: ConnectionGate,
    store: ConfigStore,
    transport: T,
    presenter: P,
    /// "host:port", for status text.
    broker: String,
    offset: UtcOffset,
    refresh_every: Duration,
}

impl<T: Transport, P: Presenter> Bridge<T, P> {
    pub fn new(settings: &Settings, store: ConfigStore, transport: T, presenter: P) -> Self {
        Self {
            identity: DeviceIdentity::new(&settings.account_id, settings.target_mac.trim()),
            gate: ConnectionGate::new(),
            store,
            transport,
            presenter,
            broker: format!("{}:{}", settings.broker_host, settings.broker_port),
            offset: settings.utc_offset(),
            refresh_every: settings.refresh_interval(),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn connection(&self) -> &ConnectionState {
        self.gate.state()
    }

    pub fn config(&self) -> &DeviceConfig {
        self.store.config()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    // -- lifecycle ----------------------------------------------------------

    /// Load the device config and paint the initial screen.  The transport
    /// is expected to be connecting already.
    pub fn start(&mut self, now: i64) {
        let loaded = self.store.load(now);
        if let Some(warning) = loaded.warning {
            self.presenter
                .record_event(EventKind::Error, &format!("device config not loaded: {warning}"));
        }

        // A MAC remembered from an earlier session wins over the configured one.
        if !loaded.config.mac_address.is_empty() {
            self.identity.target_mac = loaded.config.mac_address.clone();
        } else if self.identity.has_target() {
            let mac = self.identity.target_mac.clone();
            let saved = self.store.set_mac(&mac);
            self.note_store_result(saved);
        }
        info!(
            account = %self.identity.account_id,
            target = %self.identity.target_mac,
            broker = %self.broker,
            "bridge started"
        );

        let last_feed = self
            .store
            .config()
            .last_feed_display_time
            .clone()
            .unwrap_or_else(|| "--".to_string());
        self.presenter.set_last_feed(&last_feed);
        self.presenter.set_device(self.store.config());
        self.presenter.set_connection(self.gate.state());
        self.refresh(now);
        self.presenter
            .set_status(&format!("Connecting to {}...", self.broker));
        self.presenter.record_event(EventKind::System, "bridge started");
    }

    /// Service control messages and the refresh tick until every sender
    /// has gone away.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<BridgeEvent>) {
        let mut ticker = tokio::time::interval(self.refresh_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => self.handle_event(event, now_unix()),
                    None => {
                        info!("control channel closed, bridge stopping");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.refresh(now_unix());
                }
            }
        }
    }

    pub fn handle_event(&mut self, event: BridgeEvent, now: i64) {
        match event {
            BridgeEvent::Inbound { topic, payload } => self.handle_message(&topic, &payload, now),
            BridgeEvent::Transport(event) => self.handle_transport_event(event, now),
            BridgeEvent::Submit { command, reply } => {
                let result = self.submit(&command, now);
                if reply.send(result).is_err() {
                    debug!(%command, "submitter went away before the reply");
                }
            }
            BridgeEvent::SetTarget { mac, reply } => {
                let result = self.set_target_mac(&mac);
                if reply.send(result).is_err() {
                    debug!(%mac, "submitter went away before the reply");
                }
            }
        }
    }

    // -- inbound telemetry --------------------------------------------------

    pub fn handle_message(&mut self, topic: &str, payload: &[u8], now: i64) {
        let parsed = match parse_topic(topic) {
            Ok(p) => p,
            Err(e) => {
                warn!(%topic, "dropping message: {e}");
                self.presenter.record_event(EventKind::Error, &e.to_string());
                return;
            }
        };
        if parsed.account_id != self.identity.account_id || !self.accepts(parsed.mac) {
            debug!(%topic, "ignoring telemetry from another device");
            return;
        }
        let mac = parsed.mac;

        match decode_payload(parsed.kind, payload) {
            TelemetrySample::Temperature(reading) => {
                let shown = reading.display();
                debug!(%mac, temperature = %shown, ts = ?reading.timestamp, "temperature");
                self.presenter.set_temperature(&shown);
                self.presenter
                    .record_event(EventKind::Telemetry, &format!("{mac} temperature {shown}"));
            }
            TelemetrySample::Ph(reading) => {
                let shown = reading.display();
                debug!(%mac, ph = %shown, ts = ?reading.timestamp, "ph");
                self.presenter.set_ph(&shown);
                self.presenter
                    .record_event(EventKind::Telemetry, &format!("{mac} pH {shown}"));
            }
            TelemetrySample::Feed(event) => {
                info!(%mac, at = %event.display_time, status = %event.status, "feed reported");
                let saved = self.store.apply_feed_event(&event, now);
                self.note_store_result(saved);
                self.presenter.set_last_feed(&event.display_time);
                self.presenter.set_device(self.store.config());
                self.refresh(now);
                self.presenter.record_event(
                    EventKind::Feed,
                    &format!("{mac} fed at {} ({})", event.display_time, event.status),
                );
            }
            TelemetrySample::Log(line) => {
                info!(%mac, "device log: {line}");
                self.presenter
                    .record_event(EventKind::Device, &format!("{mac}: {line}"));
            }
        }
    }

    fn accepts(&self, mac: &str) -> bool {
        !self.identity.has_target() || self.identity.target_mac.trim().eq_ignore_ascii_case(mac)
    }

    // -- connection ---------------------------------------------------------

    pub fn handle_transport_event(&mut self, event: TransportEvent, now: i64) {
        let entered = self.gate.on_transport_event(event);
        let state = self.gate.state();
        let status = match state {
            ConnectionState::Connecting => format!("Connecting to {}...", self.broker),
            ConnectionState::Connected => format!("Connected to {}", self.broker),
            ConnectionState::Disconnected => format!("Disconnected from {}", self.broker),
            ConnectionState::Failed(reason) => {
                format!("Connection to {} failed: {reason}", self.broker)
            }
        };
        info!(broker = %self.broker, state = %state, "connection state changed");
        self.presenter.set_connection(state);
        self.presenter.set_status(&status);
        self.presenter.record_event(EventKind::System, &status);

        if entered {
            // Failure is already on screen; the next Connected retries.
            let _ = self.resubscribe();
            self.refresh(now);
        }
    }

    /// Issue the telemetry and log subscriptions again.
    pub fn resubscribe(&mut self) -> Result<(), CommandError> {
        if !self.gate.can_publish() {
            return Err(CommandError::NotConnected);
        }
        for filter in self.identity.telemetry_filters() {
            if let Err(e) = self.transport.subscribe(&filter) {
                warn!(%filter, "subscription failed: {e}");
                let text = format!("Subscription failed: {e}");
                self.presenter.set_status(&text);
                self.presenter.record_event(EventKind::Error, &text);
                return Err(e.into());
            }
            info!(%filter, "subscribed to telemetry");
        }
        Ok(())
    }

    // -- operator -----------------------------------------------------------

    /// Send `command` to the target device.  Interval changes are applied to
    /// the local config as soon as the publish is accepted; the device does
    /// not acknowledge them.
    pub fn submit(&mut self, command: &Command, now: i64) -> Result<(), CommandError> {
        if let Err(e) = dispatch(command, &self.identity, &self.gate, &self.transport) {
            warn!(%command, "command not sent: {e}");
            let text = format!("Command '{command}' not sent: {e}");
            self.presenter.set_status(&text);
            self.presenter.record_event(EventKind::Error, &text);
            return Err(e);
        }

        match command {
            Command::SetTempInterval(secs) => {
                let saved = self.store.set_temp_interval(*secs);
                self.note_store_result(saved);
                self.presenter.set_device(self.store.config());
            }
            Command::SetFeedInterval(secs) => {
                let saved = self.store.set_feed_interval(*secs);
                self.note_store_result(saved);
                self.presenter.set_device(self.store.config());
                self.refresh(now);
            }
            _ => {}
        }

        let text = format!("Sent '{command}' to {}", self.identity.target_mac);
        self.presenter.set_status(&text);
        self.presenter.record_event(EventKind::Command, &text);
        Ok(())
    }

    /// Point the bridge at another device.  A blank MAC clears the target:
    /// telemetry from every device is shown and commands are refused.
    pub fn set_target_mac(&mut self, mac: &str) -> Result<(), CommandError> {
        let mac = mac.trim();
        if mac.contains(['/', '+', '#']) {
            let text = format!("Invalid device address '{mac}'");
            self.presenter.set_status(&text);
            return Err(CommandError::InvalidTarget);
        }
        self.identity.target_mac = mac.to_string();
        let saved = self.store.set_mac(mac);
        self.note_store_result(saved);
        self.presenter.set_device(self.store.config());

        let text = if mac.is_empty() {
            "Target device cleared".to_string()
        } else {
            format!("Target device set to {mac}")
        };
        info!(target = %mac, "target device changed");
        self.presenter.set_status(&text);
        self.presenter.record_event(EventKind::Device, &text);
        Ok(())
    }

    /// Re-derive the next feed time and show it.
    pub fn refresh(&mut self, now: i64) -> ScheduledPrediction {
        let config = self.store.config();
        let prediction = predict_next(config.last_feed_timestamp, config.feed_interval_sec, now);
        self.presenter
            .set_next_feed(&prediction.describe(now, self.offset));
        prediction
    }

    fn note_store_result(&mut self, result: Result<(), StoreError>) {
        if let Err(e) = result {
            warn!("device config not saved: {e}");
            self.presenter
                .record_event(EventKind::Error, &format!("device config not saved: {e}"));
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::read_record;
    use crate::transport::TransportError;
    use std::cell::{Cell, RefCell};
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    const NOW: i64 = 1_700_000_000;
    const MAC: &str = "AA:BB:CC:DD:EE:FF";

    #[derive(Default)]
    struct Wire {
        published: RefCell<Vec<(String, String)>>,
        subscribed: RefCell<Vec<String>>,
        refuse_subscribe: Cell<bool>,
    }

    impl Transport for Wire {
        fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
            if self.refuse_subscribe.get() {
                return Err(TransportError::Subscribe {
                    filter: filter.into(),
                    reason: "not authorized".into(),
                });
            }
            self.subscribed.borrow_mut().push(filter.to_string());
            Ok(())
        }

        fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
            self.published.borrow_mut().push((
                topic.to_string(),
                String::from_utf8_lossy(payload).to_string(),
            ));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Screen {
        temperature: String,
        ph: String,
        last_feed: String,
        next_feed: String,
        status: String,
        connection: Option<ConnectionState>,
        events: Vec<(EventKind, String)>,
    }

    impl Presenter for Screen {
        fn set_temperature(&mut self, display: &str) {
            self.temperature = display.into();
        }
        fn set_ph(&mut self, display: &str) {
            self.ph = display.into();
        }
        fn set_last_feed(&mut self, display: &str) {
            self.last_feed = display.into();
        }
        fn set_next_feed(&mut self, display: &str) {
            self.next_feed = display.into();
        }
        fn set_status(&mut self, display: &str) {
            self.status = display.into();
        }
        fn set_connection(&mut self, state: &ConnectionState) {
            self.connection = Some(state.clone());
        }
        fn record_event(&mut self, kind: EventKind, detail: &str) {
            self.events.push((kind, detail.to_string()));
        }
    }

    /// A record path in a fresh directory, removed when the guard drops.
    fn scratch_path(name: &str) -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join(format!("{name}.json"));
        (dir, path)
    }

    fn settings(target: &str) -> Settings {
        Settings {
            broker_host: "broker.local".into(),
            target_mac: target.into(),
            ..Settings::default()
        }
    }

    fn bridge_at(path: &PathBuf, target: &str) -> Bridge<Wire, Screen> {
        let store = ConfigStore::new(path, UtcOffset::UTC);
        let mut bridge = Bridge::new(&settings(target), store, Wire::default(), Screen::default());
        bridge.start(NOW);
        bridge
    }

    fn connected(path: &PathBuf) -> Bridge<Wire, Screen> {
        let mut bridge = bridge_at(path, MAC);
        bridge.handle_transport_event(TransportEvent::Connected, NOW);
        bridge
    }

    fn topic(kind: &str) -> String {
        format!("f8e87394/{MAC}/data/{kind}")
    }

    // -- start --------------------------------------------------------------

    #[test]
    fn start_paints_placeholders_and_connecting_status() {
        let (_dir, path) = scratch_path("start");
        let bridge = bridge_at(&path, "");
        let screen = bridge.presenter();
        assert_eq!(screen.status, "Connecting to broker.local:1883...");
        assert_eq!(screen.last_feed, "--");
        assert_eq!(screen.next_feed, "disabled");
        assert_eq!(screen.connection, Some(ConnectionState::Connecting));
    }

    #[test]
    fn persisted_mac_wins_over_configured_target() {
        let (_dir, path) = scratch_path("persisted-mac");
        crate::store::write_record(
            &path,
            &DeviceConfig {
                mac_address: "11:22:33:44:55:66".into(),
                feed_interval_sec: 3600,
                last_feed_timestamp: Some(NOW - 600),
                last_feed_display_time: Some("11/14 22:03".into()),
                ..DeviceConfig::default()
            },
        )
        .unwrap();

        let bridge = bridge_at(&path, MAC);
        assert_eq!(bridge.identity().target_mac, "11:22:33:44:55:66");
        assert_eq!(bridge.presenter().last_feed, "11/14 22:03");
        assert_eq!(bridge.presenter().next_feed, "11/14 23:03");
    }

    #[test]
    fn configured_target_is_remembered_when_none_persisted() {
        let (_dir, path) = scratch_path("configured-mac");
        let _bridge = bridge_at(&path, MAC);
        let on_disk = read_record(&path, NOW, UtcOffset::UTC).unwrap().unwrap();
        assert_eq!(on_disk.mac_address, MAC);
    }

    #[test]
    fn corrupt_config_is_surfaced_not_fatal() {
        let (_dir, path) = scratch_path("corrupt");
        std::fs::write(&path, "not json").unwrap();
        let bridge = bridge_at(&path, "");
        assert_eq!(bridge.config(), &DeviceConfig::default());
        assert!(bridge
            .presenter()
            .events
            .iter()
            .any(|(k, d)| *k == EventKind::Error && d.contains("device config not loaded")));
    }

    // -- connection ---------------------------------------------------------

    #[test]
    fn connected_subscribes_once() {
        let (_dir, path) = scratch_path("subscribe");
        let mut bridge = connected(&path);
        bridge.handle_transport_event(TransportEvent::Connected, NOW);
        assert_eq!(
            bridge.transport().subscribed.borrow().as_slice(),
            &["f8e87394/+/data/#".to_string(), "f8e87394/+/logs".to_string()]
        );
        assert_eq!(bridge.presenter().status, "Connected to broker.local:1883");
    }

    #[test]
    fn reconnect_subscribes_again() {
        let (_dir, path) = scratch_path("reconnect");
        let mut bridge = connected(&path);
        bridge.handle_transport_event(TransportEvent::Failed("reset by peer".into()), NOW);
        assert_eq!(
            bridge.presenter().status,
            "Connection to broker.local:1883 failed: reset by peer"
        );
        bridge.handle_transport_event(TransportEvent::Connecting, NOW);
        bridge.handle_transport_event(TransportEvent::Connected, NOW);
        assert_eq!(bridge.transport().subscribed.borrow().len(), 4);
    }

    #[test]
    fn subscription_failure_keeps_connection() {
        let (_dir, path) = scratch_path("sub-fail");
        let mut bridge = bridge_at(&path, MAC);
        bridge.transport.refuse_subscribe.set(true);
        bridge.handle_transport_event(TransportEvent::Connected, NOW);

        assert_eq!(bridge.connection(), &ConnectionState::Connected);
        assert!(bridge.presenter().status.starts_with("Subscription failed"));

        bridge.transport.refuse_subscribe.set(false);
        bridge.resubscribe().unwrap();
        assert_eq!(bridge.transport().subscribed.borrow().len(), 2);
    }

    #[test]
    fn resubscribe_requires_connection() {
        let (_dir, path) = scratch_path("resub-closed");
        let mut bridge = bridge_at(&path, MAC);
        assert_eq!(bridge.resubscribe(), Err(CommandError::NotConnected));
        assert!(bridge.transport().subscribed.borrow().is_empty());
    }

    // -- telemetry ----------------------------------------------------------

    #[test]
    fn readings_reach_the_screen() {
        let (_dir, path) = scratch_path("readings");
        let mut bridge = connected(&path);
        bridge.handle_message(&topic("temperature"), b"25.5,1700000000", NOW);
        bridge.handle_message(&topic("ph"), b"7.1", NOW);
        assert_eq!(bridge.presenter().temperature, "25.50");
        assert_eq!(bridge.presenter().ph, "7.10");
    }

    #[test]
    fn readings_are_traced_at_debug_level() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let (_dir, path) = scratch_path("traced");
            let mut bridge = connected(&path);
            bridge.handle_message(&topic("temperature"), b"24.25,1700000000", NOW);
            bridge.handle_message(&topic("ph"), b"6.9", NOW);
            assert_eq!(bridge.presenter().temperature, "24.25");
            assert_eq!(bridge.presenter().ph, "6.90");
        });
    }

    #[test]
    fn unparseable_reading_shows_raw_text() {
        let (_dir, path) = scratch_path("raw-reading");
        let mut bridge = connected(&path);
        bridge.handle_message(&topic("temperature"), b"sensor fault", NOW);
        assert_eq!(bridge.presenter().temperature, "sensor fault");
    }

    #[test]
    fn feed_updates_store_and_prediction() {
        let (_dir, path) = scratch_path("feed");
        let mut bridge = connected(&path);
        bridge.submit(&Command::SetFeedInterval(3600), NOW).unwrap();
        bridge.handle_message(&topic("feed"), b"1700000000,11/14 22:13,success", NOW);

        assert_eq!(bridge.config().last_feed_timestamp, Some(1_700_000_000));
        assert_eq!(bridge.presenter().last_feed, "11/14 22:13");
        assert_eq!(bridge.refresh(NOW).next_feed_time, Some(1_700_003_600));
        assert_eq!(bridge.presenter().next_feed, "11/14 23:13");

        let on_disk = read_record(&path, NOW, UtcOffset::UTC).unwrap().unwrap();
        assert_eq!(on_disk.last_feed_timestamp, Some(1_700_000_000));
    }

    #[test]
    fn overdue_feed_is_flagged() {
        let (_dir, path) = scratch_path("overdue");
        let mut bridge = connected(&path);
        bridge.submit(&Command::SetFeedInterval(60), NOW).unwrap();
        bridge.handle_message(&topic("feed"), b"1700000000,11/14 22:13,success", NOW);
        bridge.refresh(NOW + 3600);
        assert_eq!(bridge.presenter().next_feed, "11/14 22:14 (overdue)");
    }

    #[test]
    fn undated_feed_keeps_the_schedule_overdue_capable() {
        let (_dir, path) = scratch_path("undated-feed");
        let mut bridge = connected(&path);
        bridge.submit(&Command::SetFeedInterval(60), NOW).unwrap();
        bridge.handle_message(&topic("feed"), b"1700000000,11/14 22:13,success", NOW);

        let later = NOW + 90_000;
        bridge.handle_message(&topic("feed"), b"", later);
        assert_eq!(bridge.config().last_feed_timestamp, Some(later));

        bridge.refresh(later + 3600);
        assert_eq!(bridge.presenter().next_feed, "11/15 23:14 (overdue)");
    }

    #[test]
    fn other_devices_are_ignored_when_targeted() {
        let (_dir, path) = scratch_path("other-device");
        let mut bridge = connected(&path);
        bridge.handle_message("f8e87394/11:22:33:44:55:66/data/temperature", b"30.0", NOW);
        bridge.handle_message("deadbeef/AA:BB:CC:DD:EE:FF/data/temperature", b"31.0", NOW);
        assert_eq!(bridge.presenter().temperature, "");
    }

    #[test]
    fn every_device_is_shown_without_target() {
        let (_dir, path) = scratch_path("no-target");
        let mut bridge = bridge_at(&path, "");
        bridge.handle_message("f8e87394/11:22/data/ph", b"6.8,1", NOW);
        assert_eq!(bridge.presenter().ph, "6.80");
    }

    #[test]
    fn malformed_topics_are_dropped() {
        let (_dir, path) = scratch_path("malformed");
        let mut bridge = connected(&path);
        bridge.handle_message("f8e87394/data/temperature", b"25.0", NOW);
        bridge.handle_message(&topic("salinity"), b"35", NOW);
        assert_eq!(bridge.presenter().temperature, "");
        let errors = bridge
            .presenter()
            .events
            .iter()
            .filter(|(k, _)| *k == EventKind::Error)
            .count();
        assert_eq!(errors, 2);
    }

    #[test]
    fn device_logs_become_events() {
        let (_dir, path) = scratch_path("logs");
        let mut bridge = connected(&path);
        bridge.handle_message(&topic("logs"), b"Feeder motor stalled", NOW);
        assert!(bridge
            .presenter()
            .events
            .iter()
            .any(|(k, d)| *k == EventKind::Device && d.ends_with("Feeder motor stalled")));
    }

    #[test]
    fn firmware_log_topic_becomes_event() {
        let (_dir, path) = scratch_path("firmware-logs");
        let mut bridge = connected(&path);
        bridge.handle_message(&format!("f8e87394/{MAC}/logs"), b"Feeding completed", NOW);
        assert!(bridge
            .presenter()
            .events
            .iter()
            .any(|(k, d)| *k == EventKind::Device && d.ends_with("Feeding completed")));
        assert!(!bridge
            .presenter()
            .events
            .iter()
            .any(|(k, _)| *k == EventKind::Error));
    }

    // -- commands -----------------------------------------------------------

    #[test]
    fn abandoned_replies_still_apply_the_request() {
        let (_dir, path) = scratch_path("abandoned");
        let mut bridge = connected(&path);

        let (reply, rx) = oneshot::channel();
        drop(rx);
        bridge.handle_event(
            BridgeEvent::SetTarget {
                mac: "11:22".into(),
                reply,
            },
            NOW,
        );
        assert_eq!(bridge.identity().target_mac, "11:22");

        let (reply, rx) = oneshot::channel();
        drop(rx);
        bridge.handle_event(
            BridgeEvent::Submit {
                command: Command::ForceTemp,
                reply,
            },
            NOW,
        );
        assert_eq!(bridge.transport().published.borrow().len(), 1);
    }

    #[test]
    fn submit_while_connecting_is_refused() {
        let (_dir, path) = scratch_path("refused");
        let mut bridge = bridge_at(&path, MAC);
        assert_eq!(
            bridge.submit(&Command::ForceFeed, NOW),
            Err(CommandError::NotConnected)
        );
        assert!(bridge.transport().published.borrow().is_empty());
        assert!(bridge.presenter().status.contains("not sent"));
    }

    #[test]
    fn interval_commands_apply_optimistically() {
        let (_dir, path) = scratch_path("intervals");
        let mut bridge = connected(&path);
        bridge.submit(&Command::SetTempInterval(120), NOW).unwrap();
        bridge.submit(&Command::SetFeedInterval(0), NOW).unwrap();

        assert_eq!(bridge.config().temp_interval_sec, 120);
        assert_eq!(bridge.config().feed_interval_sec, 0);
        assert_eq!(bridge.presenter().next_feed, "disabled");
        assert_eq!(bridge.presenter().status, format!("Sent 'set feed 0' to {MAC}"));
        assert_eq!(
            bridge.transport().published.borrow().last().unwrap(),
            &(format!("f8e87394/{MAC}/cmd"), "set feed 0".to_string())
        );
    }

    #[test]
    fn refused_interval_leaves_config_alone() {
        let (_dir, path) = scratch_path("refused-interval");
        let mut bridge = bridge_at(&path, MAC);
        let _ = bridge.submit(&Command::SetFeedInterval(900), NOW);
        assert_eq!(bridge.config().feed_interval_sec, 0);
    }

    #[test]
    fn retarget_moves_commands_and_persists() {
        let (_dir, path) = scratch_path("retarget");
        let mut bridge = connected(&path);
        bridge.set_target_mac(" 11:22:33:44:55:66 ").unwrap();
        bridge.submit(&Command::ForceTemp, NOW).unwrap();

        assert_eq!(
            bridge.transport().published.borrow()[0].0,
            "f8e87394/11:22:33:44:55:66/cmd"
        );
        let on_disk = read_record(&path, NOW, UtcOffset::UTC).unwrap().unwrap();
        assert_eq!(on_disk.mac_address, "11:22:33:44:55:66");
    }

    #[test]
    fn wildcard_target_rejected() {
        let (_dir, path) = scratch_path("wildcard");
        let mut bridge = connected(&path);
        assert_eq!(bridge.set_target_mac("+"), Err(CommandError::InvalidTarget));
        assert_eq!(bridge.identity().target_mac, MAC);
    }

    #[test]
    fn cleared_target_refuses_commands() {
        let (_dir, path) = scratch_path("cleared");
        let mut bridge = connected(&path);
        bridge.set_target_mac("").unwrap();
        assert_eq!(
            bridge.submit(&Command::ForcePh, NOW),
            Err(CommandError::InvalidTarget)
        );
    }

    // -- control channel ----------------------------------------------------

    #[tokio::test]
    async fn handle_round_trips_through_run_loop() {
        let (_dir, path) = scratch_path("run");
        let mut bridge = bridge_at(&path, MAC);
        let (tx, rx) = mpsc::channel(8);
        let handle = BridgeHandle::new(tx.clone());

        let client = tokio::spawn(async move {
            let early = handle.submit(Command::ForceFeed).await;
            tx.send(BridgeEvent::Transport(TransportEvent::Connected))
                .await
                .unwrap();
            let late = handle.submit(Command::ForceFeed).await;
            let target = handle.set_target("#").await;
            (early, late, target)
        });

        bridge.run(rx).await;
        let (early, late, target) = client.await.unwrap();
        assert!(matches!(
            early,
            Err(SubmitError::Command(CommandError::NotConnected))
        ));
        assert!(late.is_ok());
        assert!(matches!(
            target,
            Err(SubmitError::Command(CommandError::InvalidTarget))
        ));
        assert_eq!(bridge.transport().published.borrow().len(), 1);
    }

    #[tokio::test]
    async fn handle_reports_stopped_bridge() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = BridgeHandle::new(tx);
        assert!(matches!(
            handle.submit(Command::ForceTemp).await,
            Err(SubmitError::Closed)
        ));
    }
}
