//! Bridge settings: optional TOML file, environment overrides, validation.
//!
//! ```toml
//! broker_host = "10.88.236.219"
//! broker_port = 1883
//! account_id = "f8e87394"
//! target_mac = "AA:BB:CC:DD:EE:FF"
//! device_config_path = "/var/lib/aquarium/device.json"
//! utc_offset_minutes = 60
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use time::UtcOffset;

use crate::clock::offset_from_minutes;

// ---------------------------------------------------------------------------
// Settings structure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub keep_alive_sec: u64,
    /// Fixed account segment of every topic.
    pub account_id: String,
    /// Device to command when the persisted device config names none.
    pub target_mac: String,
    pub device_config_path: String,
    pub web_port: u16,
    /// How often the next-feed prediction is re-rendered.
    pub refresh_sec: u64,
    /// Offset used to render and parse "MM/DD HH:MM" times.
    pub utc_offset_minutes: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".into(),
            broker_port: 1883,
            client_id: "aquarium-bridge".into(),
            keep_alive_sec: 30,
            account_id: "f8e87394".into(),
            target_mac: String::new(),
            device_config_path: "aquarium_config.json".into(),
            web_port: 8080,
            refresh_sec: 30,
            utc_offset_minutes: 0,
        }
    }
}

/// Characters with a meaning in MQTT topics.
const TOPIC_RESERVED: &[char] = &['/', '+', '#'];

/// rumqttc refuses keep-alives below this.
const MIN_KEEP_ALIVE_SEC: u64 = 5;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Settings {
    pub fn utc_offset(&self) -> UtcOffset {
        offset_from_minutes(self.utc_offset_minutes)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_sec)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_sec)
    }

    /// Validate every field.  Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.broker_host.trim().is_empty() {
            errors.push("broker_host is empty".into());
        }
        if self.broker_port == 0 {
            errors.push("broker_port must be non-zero".into());
        }
        if self.client_id.trim().is_empty() {
            errors.push("client_id is empty".into());
        }
        if self.keep_alive_sec < MIN_KEEP_ALIVE_SEC {
            errors.push(format!(
                "keep_alive_sec must be at least {MIN_KEEP_ALIVE_SEC}, got {}",
                self.keep_alive_sec
            ));
        }

        if self.account_id.trim().is_empty() {
            errors.push("account_id is empty".into());
        } else if self.account_id.contains(TOPIC_RESERVED) {
            errors.push(format!(
                "account_id '{}' contains a reserved topic character (/ + #)",
                self.account_id
            ));
        }
        if self.target_mac.contains(TOPIC_RESERVED) {
            errors.push(format!(
                "target_mac '{}' contains a reserved topic character (/ + #)",
                self.target_mac
            ));
        }

        if self.device_config_path.trim().is_empty() {
            errors.push("device_config_path is empty".into());
        }
        if self.web_port == 0 {
            errors.push("web_port must be non-zero".into());
        }
        if self.refresh_sec == 0 {
            errors.push("refresh_sec must be positive".into());
        }
        if !(-1439..=1439).contains(&self.utc_offset_minutes) {
            errors.push(format!(
                "utc_offset_minutes {} out of range [-1439, 1439]",
                self.utc_offset_minutes
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "settings validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    /// Overlay environment variables.  `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("MQTT_HOST") {
            self.broker_host = v;
        }
        if let Some(v) = lookup("MQTT_PORT") {
            self.broker_port = v
                .trim()
                .parse()
                .with_context(|| format!("MQTT_PORT is not a port number: {v}"))?;
        }
        if let Some(v) = lookup("ACCOUNT_ID") {
            self.account_id = v;
        }
        if let Some(v) = lookup("TARGET_MAC") {
            self.target_mac = v;
        }
        if let Some(v) = lookup("DEVICE_CONFIG_PATH") {
            self.device_config_path = v;
        }
        if let Some(v) = lookup("WEB_PORT") {
            self.web_port = v
                .trim()
                .parse()
                .with_context(|| format!("WEB_PORT is not a port number: {v}"))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML settings file.  A missing file means defaults.
pub fn load(path: &str) -> Result<Settings> {
    if !Path::new(path).exists() {
        tracing::info!(path, "no settings file, using defaults");
        return Ok(Settings::default());
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read settings: {path}"))?;
    let settings: Settings =
        toml::from_str(&contents).with_context(|| format!("failed to parse settings: {path}"))?;
    Ok(settings)
}

/// File (from `BRIDGE_CONFIG`, default `bridge.toml`), then environment,
/// then validation.
pub fn from_env() -> Result<Settings> {
    let path = std::env::var("BRIDGE_CONFIG").unwrap_or_else(|_| "bridge.toml".to_string());
    let mut settings = load(&path)?;
    settings.apply_env(|k| std::env::var(k).ok())?;
    settings
        .validate()
        .with_context(|| format!("invalid settings (file: {path})"))?;
    Ok(settings)
}

// ===========================================================================
// Tests
// ===========================================================================
