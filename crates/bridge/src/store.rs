//! Device configuration: the in-memory copy owned by the bridge and its JSON
//! record on disk.
//!
//! The record is always written whole (temp file + rename).  A missing record
//! yields defaults; an unreadable or corrupt one yields defaults plus a
//! warning, never an error that stops the bridge.
//!
//! Record layout:
//!
//! ```json
//! { "mac_address": "AA:BB:CC:DD:EE:FF", "temp_interval_sec": 300,
//!   "feed_interval_sec": 43200, "last_feed_time": "11/14 10:00",
//!   "last_feed_epoch": 1699956000 }
//! ```
//!
//! Older records carry no `last_feed_epoch`; some carry `last_feed_timestamp`
//! instead.  Both are migrated on read.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use time::UtcOffset;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{format_display_time, reconstruct_display_time};
use crate::telemetry::FeedEvent;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceConfig {
    pub mac_address: String,
    /// 0 = disabled
    pub temp_interval_sec: u32,
    /// 0 = disabled
    pub feed_interval_sec: u32,
    pub last_feed_timestamp: Option<i64>,
    pub last_feed_display_time: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("corrupt config record {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to encode config record: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("config writer has stopped")]
    WriterClosed,
}

/// Result of [`ConfigStore::load`]: the config now in effect and, when the
/// record could not be used, why defaults were chosen instead.
#[derive(Debug)]
pub struct Loaded {
    pub config: DeviceConfig,
    pub warning: Option<StoreError>,
}

// ---------------------------------------------------------------------------
// On-disk record
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigRecord {
    #[serde(default)]
    mac_address: String,
    #[serde(default)]
    temp_interval_sec: u32,
    #[serde(default)]
    feed_interval_sec: u32,
    #[serde(default)]
    last_feed_time: Option<String>,
    /// Outer `None` = key absent (record from an older bridge).
    #[serde(default, deserialize_with = "present")]
    last_feed_epoch: Option<Option<i64>>,
    #[serde(default, skip_serializing)]
    last_feed_timestamp: Option<i64>,
}

fn present<'de, D>(d: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i64>::deserialize(d).map(Some)
}

impl ConfigRecord {
    fn from_config(c: &DeviceConfig) -> Self {
        Self {
            mac_address: c.mac_address.clone(),
            temp_interval_sec: c.temp_interval_sec,
            feed_interval_sec: c.feed_interval_sec,
            last_feed_time: c.last_feed_display_time.clone(),
            last_feed_epoch: Some(c.last_feed_timestamp),
            last_feed_timestamp: None,
        }
    }

    fn into_config(self, now: i64, offset: UtcOffset) -> DeviceConfig {
        let (timestamp, display) = match self.last_feed_epoch {
            Some(epoch) => (epoch, self.last_feed_time),
            None => {
                let timestamp = self.last_feed_timestamp.or_else(|| {
                    self.last_feed_time
                        .as_deref()
                        .and_then(|d| reconstruct_display_time(d, now, offset))
                });
                let display = self.last_feed_time.or_else(|| {
                    self.last_feed_timestamp
                        .map(|ts| format_display_time(ts, offset))
                });
                (timestamp, display)
            }
        };
        DeviceConfig {
            mac_address: self.mac_address,
            temp_interval_sec: self.temp_interval_sec,
            feed_interval_sec: self.feed_interval_sec,
            last_feed_timestamp: timestamp,
            last_feed_display_time: display,
        }
    }
}

/// Read the record at `path`.  `Ok(None)` when there is no record yet.
pub fn read_record(
    path: &Path,
    now: i64,
    offset: UtcOffset,
) -> Result<Option<DeviceConfig>, StoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let record: ConfigRecord =
        serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Some(record.into_config(now, offset)))
}

/// Overwrite the record at `path` with `config`.
pub fn write_record(path: &Path, config: &DeviceConfig) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(&ConfigRecord::from_config(config))
        .map_err(StoreError::Encode)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let write_err = |source: io::Error| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    std::fs::write(&tmp, json).map_err(write_err)?;
    std::fs::rename(&tmp, path).map_err(write_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Background writer
// ---------------------------------------------------------------------------

/// Spawn the task that performs disk writes for a [`ConfigStore`].  Bursts of
/// updates are coalesced; only the newest snapshot is written.
pub fn spawn_writer(path: PathBuf) -> (mpsc::UnboundedSender<DeviceConfig>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<DeviceConfig>();
    let handle = tokio::spawn(async move {
        while let Some(mut config) = rx.recv().await {
            while let Ok(newer) = rx.try_recv() {
                config = newer;
            }
            let path = path.clone();
            match tokio::task::spawn_blocking(move || write_record(&path, &config)).await {
                Ok(Ok(())) => debug!("config record written"),
                Ok(Err(e)) => warn!("config save failed: {e}"),
                Err(e) => warn!("config writer task failed: {e}"),
            }
        }
    });
    (tx, handle)
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct ConfigStore {
    path: PathBuf,
    offset: UtcOffset,
    config: DeviceConfig,
    loaded: bool,
    writer: Option<mpsc::UnboundedSender<DeviceConfig>>,
}

impl ConfigStore {
    /// Starts with default values.  Nothing is written until [`load`] has run,
    /// so a fresh store can never clobber the record it is about to read.
    ///
    /// [`load`]: ConfigStore::load
    pub fn new(path: impl Into<PathBuf>, offset: UtcOffset) -> Self {
        Self {
            path: path.into(),
            offset,
            config: DeviceConfig::default(),
            loaded: false,
            writer: None,
        }
    }

    /// Route saves through a writer task instead of writing inline.
    pub fn with_writer(mut self, writer: mpsc::UnboundedSender<DeviceConfig>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn load(&mut self, now: i64) -> Loaded {
        let (config, warning) = match read_record(&self.path, now, self.offset) {
            Ok(Some(c)) => {
                info!(path = %self.path.display(), mac = %c.mac_address, "config loaded");
                (c, None)
            }
            Ok(None) => {
                info!(path = %self.path.display(), "no config record yet, using defaults");
                (DeviceConfig::default(), None)
            }
            Err(e) => {
                warn!("{e}; using defaults");
                (DeviceConfig::default(), Some(e))
            }
        };
        self.config = config.clone();
        self.loaded = true;
        Loaded { config, warning }
    }

    /// Write `config` to the record synchronously.
    pub fn save(&self, config: &DeviceConfig) -> Result<(), StoreError> {
        write_record(&self.path, config)
    }

    fn persist(&self) -> Result<(), StoreError> {
        if !self.loaded {
            debug!("save suppressed until config is loaded");
            return Ok(());
        }
        match &self.writer {
            Some(tx) => tx
                .send(self.config.clone())
                .map_err(|_| StoreError::WriterClosed),
            None => self.save(&self.config),
        }
    }

    /// Record a feed reported by the device.  When the event carries no epoch
    /// one is rebuilt from its display time (see
    /// [`reconstruct_display_time`] for the caveats).  A feed whose time
    /// cannot be recovered is dated at receipt, so the history is never lost.
    pub fn apply_feed_event(&mut self, event: &FeedEvent, now: i64) -> Result<(), StoreError> {
        let at = event
            .timestamp
            .or_else(|| reconstruct_display_time(&event.display_time, now, self.offset))
            .unwrap_or(now);
        self.config.last_feed_timestamp = Some(at);
        self.config.last_feed_display_time = Some(event.display_time.clone());
        self.persist()
    }

    pub fn set_mac(&mut self, mac: &str) -> Result<(), StoreError> {
        self.config.mac_address = mac.trim().to_string();
        self.persist()
    }

    pub fn set_temp_interval(&mut self, secs: u32) -> Result<(), StoreError> {
        self.config.temp_interval_sec = secs;
        self.persist()
    }

    pub fn set_feed_interval(&mut self, secs: u32) -> Result<(), StoreError> {
        self.config.feed_interval_sec = secs;
        self.persist()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
