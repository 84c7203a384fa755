//! Room fan-out: turns one [`RoomEvent`] into a frame written to every
//! current subscriber of its room.

use std::sync::Arc;
use std::time::Duration;

use ama_core::{RoomEvent, RoomId};
use futures::future::join_all;
use tracing::{debug, error, warn};

use crate::connection::DeliveryError;
use crate::registry::{Subscriber, SubscriberRegistry};

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// How a write handler hands its event to the broadcaster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// Deliver before the handler continues.
    Inline,
    /// Spawn the delivery and return immediately.
    Detached,
}

#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<SubscriberRegistry>,
    write_timeout: Duration,
}

impl Broadcaster {
    pub fn new(registry: Arc<SubscriberRegistry>, write_timeout: Duration) -> Self {
        Self {
            registry,
            write_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Hand off an event using the given mode. Never fails from the
    /// caller's point of view.
    pub async fn dispatch(&self, event: RoomEvent, mode: DispatchMode) {
        match mode {
            DispatchMode::Inline => self.notify(&event).await,
            DispatchMode::Detached => {
                let broadcaster = self.clone();
                tokio::spawn(async move {
                    broadcaster.notify(&event).await;
                });
            }
        }
    }

    /// Deliver `event` to every subscriber of its room.
    ///
    /// The registry lock is only held while taking the snapshot. A subscriber
    /// whose write fails or stalls past the write timeout is cancelled and
    /// removed; the others still get the frame.
    pub async fn notify(&self, event: &RoomEvent) {
        let room_id = event.room_id();
        let subscribers = self.registry.snapshot_for(room_id);
        if subscribers.is_empty() {
            return;
        }

        let frame = match event.to_wire() {
            Ok(frame) => frame,
            Err(e) => {
                error!(room_id = %room_id, kind = event.kind(), error = %e, "failed to encode event");
                return;
            }
        };

        let deliveries = subscribers
            .iter()
            .filter(|subscriber| !subscriber.is_cancelled())
            .map(|subscriber| self.deliver(room_id, subscriber, &frame));
        let delivered = join_all(deliveries).await.into_iter().filter(|ok| *ok).count();

        debug!(
            room_id = %room_id,
            kind = event.kind(),
            subscribers = subscribers.len(),
            delivered,
            "event broadcast"
        );
    }

    async fn deliver(&self, room_id: &RoomId, subscriber: &Subscriber, frame: &str) -> bool {
        let result = match tokio::time::timeout(
            self.write_timeout,
            subscriber.connection().send_text(frame),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.write_timeout)),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    room_id = %room_id,
                    subscriber_id = %subscriber.id(),
                    error = %e,
                    "failed to send event to subscriber"
                );
                subscriber.cancel();
                self.registry.unregister(room_id, subscriber.id());
                false
            }
        }
    }
}
