//! Notification sinks that carry task events to the host

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::mpsc;

/// Fire-and-forget delivery of `(event name, payload)` pairs.
///
/// Implementations must not block and must keep the order in which
/// `emit` is called.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

/// One delivered notification.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkMessage {
    pub event: String,
    pub payload: Value,
}

/// Sink backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn emit(&self, event: &str, payload: Value) {
        let message = SinkMessage {
            event: event.to_string(),
            payload,
        };
        if self.tx.send(message).is_err() {
            debug!("sink: receiver dropped, discarding {}", event);
        }
    }
}

#[cfg(feature = "tauri")]
impl<R: tauri::Runtime> NotificationSink for tauri::AppHandle<R> {
    fn emit(&self, event: &str, payload: Value) {
        use tauri::Emitter;
        if let Err(e) = Emitter::emit(self, event, payload) {
            warn!("sink: failed to emit {}: {}", event, e);
        }
    }
}

/// Sink that only logs; for hosts that poll task state instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn emit(&self, event: &str, payload: Value) {
        if event.ends_with("error") {
            warn!("sink: {} {}", event, payload);
        } else {
            debug!("sink: {} {}", event, payload);
        }
    }
}
