//! Real-time publish interface
//!
//! The engine announces status and schedule changes as string payloads on a
//! named channel. Delivery is fire-and-forget: publishing never fails the
//! caller.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

pub const PUBLIC_CHANNEL: &str = "public-channel";

pub const HOST_SERVICE_STATUS_CHANGED: &str = "host-service-status-changed";
pub const HOST_SERVICE_COUNT_CHANGED: &str = "host-service-count-changed";
pub const SCHEDULE_CHANGED: &str = "schedule-changed-event";
pub const SCHEDULE_ITEM_REMOVED: &str = "schedule-item-removed-event";
pub const NEXT_RUN: &str = "next-run-event";
pub const APP_STARTING: &str = "app-starting";
pub const APP_STOPPING: &str = "app-stopping";

pub type Payload = HashMap<String, String>;

/// Build a payload from key/value pairs
pub fn payload<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Payload
where
    K: Into<String>,
    V: Into<String>,
{
    entries
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

/// One published message
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastEvent {
    pub channel: String,
    pub event_type: String,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

/// Publish-only capability consumed by the engine and the scheduler
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, channel: &str, event_type: &str, payload: Payload);
}

/// Broadcaster backed by a tokio broadcast channel
///
/// Any number of transports (websocket bridges, loggers, tests) can
/// subscribe. Slow subscribers lag and lose messages.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }

    /// Forward every published event to the log until the broadcaster is
    /// dropped.
    pub fn spawn_logger(&self) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        info!(
                            channel = %event.channel,
                            event_type = %event.event_type,
                            "broadcast: {:?}",
                            event.payload
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("broadcast logger lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("broadcast channel closed, stopping logger");
                        break;
                    }
                }
            }
        })
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn publish(&self, channel: &str, event_type: &str, payload: Payload) {
        let event = BroadcastEvent {
            channel: channel.to_string(),
            event_type: event_type.to_string(),
            payload,
            timestamp: Utc::now(),
        };

        if self.tx.send(event).is_err() {
            trace!("no subscribers for {} on {}", event_type, channel);
        }
    }
}
