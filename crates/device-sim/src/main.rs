mod device;
mod sim;

use anyhow::{anyhow, bail, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::fmt::Display;
use std::str::FromStr;
use std::{env, time::Duration};
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use aquarium_bridge::clock::{now_unix, offset_from_minutes};
use aquarium_bridge::command::DeviceIdentity;
use device::{Device, Outgoing};
use sim::{Scenario, WaterSim};

/// Parse `value` (an env var's contents) or fall back to `default` when unset.
fn parse_or<T>(key: &str, value: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match value {
        Some(v) => v.trim().parse().map_err(|e| anyhow!("{key}={v}: {e}")),
        None => Ok(default),
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    parse_or(key, env::var(key).ok(), default)
}

fn deadline(interval_sec: u32) -> Option<Instant> {
    (interval_sec > 0).then(|| Instant::now() + Duration::from_secs(interval_sec.into()))
}

/// Completes at `deadline`; never, when the schedule is paused.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => sleep_until(d).await,
        None => std::future::pending().await,
    }
}

async fn publish_all(client: &AsyncClient, out: Vec<Outgoing>) {
    for Outgoing { topic, payload } in out {
        debug!(%topic, %payload, "publishing");
        if let Err(e) = client
            .publish(&topic, QoS::AtLeastOnce, false, payload.into_bytes())
            .await
        {
            warn!(%topic, "publish error: {e}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env_or("MQTT_PORT", 1883)?;
    let account_id = env::var("ACCOUNT_ID").unwrap_or_else(|_| "f8e87394".to_string());
    let mac = env::var("DEVICE_MAC").unwrap_or_else(|_| "AA:BB:CC:DD:EE:FF".to_string());
    let temp_interval: u32 = env_or("TEMP_INTERVAL_SEC", 60)?;
    let feed_interval: u32 = env_or("FEED_INTERVAL_SEC", 43_200)?;
    let offset_minutes: i32 = env_or("UTC_OFFSET_MINUTES", 0)?;
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());

    let mut device = Device::new(
        DeviceIdentity::new(account_id, mac.clone()),
        temp_interval,
        feed_interval,
        WaterSim::new(scenario),
        offset_from_minutes(offset_minutes),
    );

    let mut options = MqttOptions::new(format!("aquarium-device-{mac}"), broker, port);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    // The pump subscribes on every (re)connect and forwards commands.
    let cmd_topic = device.command_topic();
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Vec<u8>>(16);
    let pump_client = client.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("device connected to mqtt");
                    if let Err(e) = pump_client.try_subscribe(&cmd_topic, QoS::AtLeastOnce) {
                        warn!(topic = %cmd_topic, "subscribe failed: {e}");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) if p.topic == cmd_topic => {
                    if cmd_tx.send(p.payload.to_vec()).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e}. retrying...");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    info!(%scenario, %mac, temp_interval, feed_interval, "device simulator running");
    publish_all(&client, vec![device.log("Device booted")]).await;

    let mut next_sample = deadline(device.temp_interval_sec());
    let mut next_feed = deadline(device.feed_interval_sec());
    loop {
        tokio::select! {
            payload = cmd_rx.recv() => {
                let Some(payload) = payload else {
                    bail!("mqtt pump stopped");
                };
                let (temp_before, feed_before) =
                    (device.temp_interval_sec(), device.feed_interval_sec());
                let out = device.handle(&payload, now_unix());
                if device.temp_interval_sec() != temp_before {
                    next_sample = deadline(device.temp_interval_sec());
                }
                if device.feed_interval_sec() != feed_before {
                    next_feed = deadline(device.feed_interval_sec());
                }
                publish_all(&client, out).await;
            }
            _ = wait_until(next_sample) => {
                publish_all(&client, device.readings(now_unix())).await;
                next_sample = deadline(device.temp_interval_sec());
            }
            _ = wait_until(next_feed) => {
                let fed = device.feed(now_unix());
                info!(payload = %fed.payload, "scheduled feed");
                publish_all(&client, vec![fed]).await;
                next_feed = deadline(device.feed_interval_sec());
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
