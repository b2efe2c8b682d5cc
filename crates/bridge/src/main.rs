use anyhow::{Context, Result};
use rumqttc::AsyncClient;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use aquarium_bridge::bridge::{Bridge, BridgeHandle};
use aquarium_bridge::clock::now_unix;
use aquarium_bridge::dashboard::Dashboard;
use aquarium_bridge::store::{spawn_writer, ConfigStore};
use aquarium_bridge::web::WebState;
use aquarium_bridge::{config, mqtt, web};

/// Bounded so a stalled control task pushes back on the MQTT pump.
const CONTROL_CAPACITY: usize = 64;
const MQTT_QUEUE_CAPACITY: usize = 20;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Settings ────────────────────────────────────────────────────
    let settings = config::from_env().context("failed to load bridge settings")?;
    info!(
        broker = %format!("{}:{}", settings.broker_host, settings.broker_port),
        account = %settings.account_id,
        config = %settings.device_config_path,
        "aquarium bridge starting"
    );

    // ── Device config (written off the control task) ────────────────
    let (writer_tx, writer) = spawn_writer(PathBuf::from(&settings.device_config_path));
    let store = ConfigStore::new(&settings.device_config_path, settings.utc_offset())
        .with_writer(writer_tx);

    // ── MQTT ────────────────────────────────────────────────────────
    let (client, eventloop) = AsyncClient::new(mqtt::mqtt_options(&settings), MQTT_QUEUE_CAPACITY);
    let (tx, rx) = mpsc::channel(CONTROL_CAPACITY);
    tokio::spawn(mqtt::run_event_loop(eventloop, tx.clone()));

    // ── Web API ─────────────────────────────────────────────────────
    let (dashboard, status) = Dashboard::new();
    let web_state = WebState {
        status,
        handle: BridgeHandle::new(tx),
    };
    let web_port = settings.web_port;
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_state, web_port).await {
            error!("web api stopped: {e:#}");
        }
    });

    // ── Control loop ────────────────────────────────────────────────
    let mut bridge = Bridge::new(&settings, store, client, dashboard);
    bridge.start(now_unix());

    tokio::select! {
        _ = bridge.run(rx) => {}
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            info!("shutting down");
        }
    }

    // Dropping the bridge closes the writer channel; wait for the last save.
    drop(bridge);
    if let Err(e) = writer.await {
        error!("config writer ended abnormally: {e}");
    }
    Ok(())
}
