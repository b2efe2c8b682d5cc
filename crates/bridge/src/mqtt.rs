use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::bridge::BridgeEvent;
use crate::config::Settings;
use crate::gate::TransportEvent;
use crate::transport::{Transport, TransportError};

/// Pause between a connection error and the next poll, which reconnects.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

pub fn mqtt_options(settings: &Settings) -> MqttOptions {
    let mut options = MqttOptions::new(
        settings.client_id.clone(),
        settings.broker_host.clone(),
        settings.broker_port,
    );
    options.set_keep_alive(settings.keep_alive());
    options.set_clean_session(true);
    options
}

/// `try_*` only enqueue for the event loop, so neither call waits on the
/// network or blocks the control task.
impl Transport for AsyncClient {
    fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.try_subscribe(filter, QoS::AtLeastOnce)
            .map_err(|e| TransportError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            })
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Event-loop pump
// ---------------------------------------------------------------------------

/// What the bridge needs to hear about a polled event, if anything.
pub(crate) fn translate(event: Event) -> Option<BridgeEvent> {
    match event {
        Event::Incoming(Packet::Publish(p)) => Some(BridgeEvent::Inbound {
            topic: p.topic,
            payload: p.payload.to_vec(),
        }),
        Event::Incoming(Packet::ConnAck(_)) => {
            Some(BridgeEvent::Transport(TransportEvent::Connected))
        }
        Event::Incoming(Packet::Disconnect) => {
            Some(BridgeEvent::Transport(TransportEvent::Disconnected))
        }
        _ => None,
    }
}

/// Poll the rumqttc event loop forever, forwarding to the bridge.  Returns
/// once the bridge has stopped listening.
pub async fn run_event_loop(mut eventloop: EventLoop, tx: mpsc::Sender<BridgeEvent>) {
    info!("mqtt event loop started");
    loop {
        let event = match eventloop.poll().await {
            Ok(event) => match translate(event) {
                Some(e) => e,
                None => continue,
            },
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                let failed = BridgeEvent::Transport(TransportEvent::Failed(e.to_string()));
                if tx.send(failed).await.is_err() {
                    break;
                }
                sleep(RECONNECT_DELAY).await;
                BridgeEvent::Transport(TransportEvent::Connecting)
            }
        };
        if tx.send(event).await.is_err() {
            break;
        }
    }
    debug!("control channel closed, mqtt event loop stopping");
}

// ===========================================================================
// Tests
// ===========================================================================
