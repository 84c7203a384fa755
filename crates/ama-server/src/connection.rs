use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::Mutex;

/// Why a frame could not be pushed to a subscriber.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
}

/// Outbound half of a subscriber's connection.
///
/// `send_text` writes one complete frame. Concurrent callers are serialized
/// so frames are never interleaved on the wire.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send_text(&self, frame: &str) -> Result<(), DeliveryError>;

    /// Best-effort close. Errors are swallowed; the peer may already be gone.
    async fn close(&self);
}

/// WebSocket-backed connection: owns the write half of a split socket.
pub struct WsConnection {
    sink: Mutex<SplitSink<WebSocket, WsMessage>>,
}

impl WsConnection {
    pub fn new(sink: SplitSink<WebSocket, WsMessage>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send_text(&self, frame: &str) -> Result<(), DeliveryError> {
        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::Text(frame.to_owned().into()))
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
    }
}
