//! The simulated controller's firmware logic: what it publishes and how it
//! reacts to commands.  No I/O here; `main` moves [`Outgoing`] messages to
//! the broker.

use aquarium_bridge::clock::format_display_time;
use aquarium_bridge::command::{Command, DeviceIdentity};
use aquarium_bridge::telemetry::{FeedStatus, TelemetryKind};
use time::UtcOffset;

use crate::sim::WaterSim;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub topic: String,
    pub payload: String,
}

pub struct Device {
    identity: DeviceIdentity,
    temp_interval_sec: u32,
    feed_interval_sec: u32,
    water: WaterSim,
    offset: UtcOffset,
}

impl Device {
    pub fn new(
        identity: DeviceIdentity,
        temp_interval_sec: u32,
        feed_interval_sec: u32,
        water: WaterSim,
        offset: UtcOffset,
    ) -> Self {
        Self {
            identity,
            temp_interval_sec,
            feed_interval_sec,
            water,
            offset,
        }
    }

    pub fn command_topic(&self) -> String {
        self.identity.command_topic()
    }

    /// 0 = paused
    pub fn temp_interval_sec(&self) -> u32 {
        self.temp_interval_sec
    }

    /// 0 = paused
    pub fn feed_interval_sec(&self) -> u32 {
        self.feed_interval_sec
    }

    fn data(&self, kind: TelemetryKind, payload: String) -> Outgoing {
        Outgoing {
            topic: format!(
                "{}/{}/data/{kind}",
                self.identity.account_id, self.identity.target_mac
            ),
            payload,
        }
    }

    pub fn temperature(&mut self, now: i64) -> Outgoing {
        let value = self.water.sample_temperature();
        self.data(TelemetryKind::Temperature, format!("{value:.2},{now}"))
    }

    pub fn ph(&mut self, now: i64) -> Outgoing {
        let value = self.water.sample_ph();
        self.data(TelemetryKind::Ph, format!("{value:.2},{now}"))
    }

    /// Both probes, as the periodic sampler sends them.
    pub fn readings(&mut self, now: i64) -> Vec<Outgoing> {
        vec![self.temperature(now), self.ph(now)]
    }

    pub fn feed(&mut self, now: i64) -> Outgoing {
        let status = if self.water.feed() {
            FeedStatus::Success
        } else {
            FeedStatus::Failure
        };
        let display = format_display_time(now, self.offset);
        self.data(TelemetryKind::Feed, format!("{now},{display},{status}"))
    }

    /// Log lines go to `<account>/<mac>/logs`, beside the data topics.
    pub fn log(&self, line: &str) -> Outgoing {
        Outgoing {
            topic: format!(
                "{}/{}/{}",
                self.identity.account_id,
                self.identity.target_mac,
                TelemetryKind::Logs
            ),
            payload: line.to_string(),
        }
    }

    /// React to a payload received on the command topic.
    pub fn handle(&mut self, payload: &[u8], now: i64) -> Vec<Outgoing> {
        let text = String::from_utf8_lossy(payload);
        let command: Command = match text.parse() {
            Ok(c) => c,
            Err(e) => return vec![self.log(&format!("Ignored command: {e}"))],
        };

        let mut out = Vec::new();
        match command {
            Command::SetTempInterval(secs) => self.temp_interval_sec = secs,
            Command::SetFeedInterval(secs) => self.feed_interval_sec = secs,
            Command::ForceTemp => out.push(self.temperature(now)),
            Command::ForcePh => out.push(self.ph(now)),
            Command::ForceFeed | Command::LegacyFeed => out.push(self.feed(now)),
            Command::LegacyTemperature(v) => self.water.nudge_temperature(v),
            Command::LegacyPh(v) => self.water.nudge_ph(v),
            Command::LegacyStop => {
                self.temp_interval_sec = 0;
                self.feed_interval_sec = 0;
            }
        }
        out.push(self.log(&format!("Handled command: {command}")));
        out
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Scenario;

    const NOW: i64 = 1_700_000_000;

    fn device() -> Device {
        Device::new(
            DeviceIdentity::new("f8e87394", "AA:BB"),
            60,
            3600,
            WaterSim::new(Scenario::Stable),
            UtcOffset::UTC,
        )
    }

    #[test]
    fn readings_use_bridge_wire_format() {
        let mut d = device();
        let out = d.readings(NOW);
        assert_eq!(out[0].topic, "f8e87394/AA:BB/data/temperature");
        assert_eq!(out[1].topic, "f8e87394/AA:BB/data/ph");

        let (value, ts) = out[0].payload.split_once(',').unwrap();
        assert!(value.parse::<f64>().is_ok());
        assert_eq!(value.split_once('.').unwrap().1.len(), 2);
        assert_eq!(ts, "1700000000");
    }

    #[test]
    fn feed_payload_decodes_on_the_bridge() {
        let mut d = device();
        let out = d.feed(NOW);
        let sample =
            aquarium_bridge::telemetry::decode(&out.topic, out.payload.as_bytes()).unwrap();
        match sample {
            aquarium_bridge::telemetry::TelemetrySample::Feed(ev) => {
                assert_eq!(ev.timestamp, Some(NOW));
                assert_eq!(ev.display_time, "11/14 22:13");
                assert_ne!(ev.status, FeedStatus::Unknown);
            }
            _ => panic!("expected feed sample"),
        }
    }

    #[test]
    fn log_lines_decode_on_the_bridge() {
        let d = device();
        let out = d.log("Device booted");
        let sample =
            aquarium_bridge::telemetry::decode(&out.topic, out.payload.as_bytes()).unwrap();
        assert_eq!(
            sample,
            aquarium_bridge::telemetry::TelemetrySample::Log("Device booted".into())
        );
    }

    #[test]
    fn interval_commands_reschedule() {
        let mut d = device();
        d.handle(b"set temp 10", NOW);
        d.handle(b"SET FEED 0", NOW);
        assert_eq!(d.temp_interval_sec(), 10);
        assert_eq!(d.feed_interval_sec(), 0);
    }

    #[test]
    fn force_commands_publish_immediately() {
        let mut d = device();
        let out = d.handle(b"force ph", NOW);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].topic, "f8e87394/AA:BB/data/ph");
        assert_eq!(out[1].topic, "f8e87394/AA:BB/logs");
        assert_eq!(out[1].payload, "Handled command: force ph");

        let out = d.handle(b"feed", NOW);
        assert_eq!(out[0].topic, "f8e87394/AA:BB/data/feed");
    }

    #[test]
    fn stop_pauses_everything() {
        let mut d = device();
        d.handle(b"stop", NOW);
        assert_eq!(d.temp_interval_sec(), 0);
        assert_eq!(d.feed_interval_sec(), 0);
    }

    #[test]
    fn legacy_value_nudges_water() {
        let mut d = device();
        d.handle(b"temperature 29", NOW);
        let out = d.temperature(NOW);
        let value: f64 = out.payload.split(',').next().unwrap().parse().unwrap();
        assert!((28.0..30.0).contains(&value), "temperature after nudge: {value}");
    }

    #[test]
    fn unknown_command_is_logged_only() {
        let mut d = device();
        let out = d.handle(b"water change", NOW);
        assert_eq!(out.len(), 1);
        assert!(out[0].payload.starts_with("Ignored command"));
        assert_eq!(d.temp_interval_sec(), 60);
    }
}
