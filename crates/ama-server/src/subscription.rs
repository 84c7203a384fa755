//! Observer lifecycle: admission, registration, the parked wait, and removal.
//!
//! Admission (`admit`) runs before anything is registered; a rejected
//! observer never touches the registry. An admitted observer becomes a
//! [`Subscription`], which is `Registered`, then `Parked` until it is
//! cancelled or the peer goes away, then `Removed`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ama_core::RoomId;
use ama_store::{RoomRepo, StoreError};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::SplitStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::connection::{Connection, WsConnection};
use crate::registry::{Subscriber, SubscriberRegistry};
use crate::server::AppState;

/// Why an observer was turned away before being registered.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("invalid room ID")]
    InvalidRoomId,
    #[error("room not found")]
    RoomNotFound,
    #[error("something went wrong")]
    Store(#[source] StoreError),
    #[error("failed to upgrade to ws connection")]
    Upgrade,
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidRoomId | Self::Upgrade => StatusCode::BAD_REQUEST,
            Self::RoomNotFound => StatusCode::NOT_FOUND,
            Self::Store(e) => {
                error!(error = %e, "room lookup failed during admission");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// Validate the room an observer asked for.
pub fn admit(rooms: &RoomRepo, raw_room_id: &str) -> Result<RoomId, AdmissionError> {
    let room_id: RoomId = raw_room_id
        .parse()
        .map_err(|_| AdmissionError::InvalidRoomId)?;

    match rooms.exists(&room_id) {
        Ok(true) => Ok(room_id),
        Ok(false) => Err(AdmissionError::RoomNotFound),
        Err(e) => Err(AdmissionError::Store(e)),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Registered,
    Parked,
    Removed,
}

/// One admitted observer, owned by the task serving its connection.
pub struct Subscription {
    room_id: RoomId,
    subscriber: Subscriber,
    registry: Arc<SubscriberRegistry>,
    close_timeout: Duration,
    state: SubscriptionState,
}

impl Subscription {
    /// Insert a fresh subscriber for `connection`. Its cancellation handle is
    /// a child of `lifetime`, so cancelling `lifetime` tears it down too.
    /// Closing the connection on removal is bounded by `close_timeout`.
    pub fn register(
        registry: Arc<SubscriberRegistry>,
        room_id: RoomId,
        connection: Arc<dyn Connection>,
        lifetime: &CancellationToken,
        close_timeout: Duration,
    ) -> Self {
        let subscriber = Subscriber::new(connection, lifetime.child_token());
        registry.register(room_id, subscriber.clone());

        Self {
            room_id,
            subscriber,
            registry,
            close_timeout,
            state: SubscriptionState::Registered,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Wait until the subscriber is cancelled or `closed` resolves, then
    /// unregister and release the connection.
    pub async fn park<F>(mut self, closed: F) -> SubscriptionState
    where
        F: Future<Output = ()>,
    {
        self.state = SubscriptionState::Parked;

        let reason = tokio::select! {
            _ = self.subscriber.cancelled() => "cancelled",
            _ = closed => "closed by peer",
        };

        self.remove(reason).await;
        self.state
    }

    async fn remove(&mut self, reason: &'static str) {
        self.registry.unregister(&self.room_id, self.subscriber.id());
        // A peer that stopped reading never acknowledges the close.
        let closed = tokio::time::timeout(
            self.close_timeout,
            self.subscriber.connection().close(),
        )
        .await;
        if closed.is_err() {
            warn!(
                room_id = %self.room_id,
                subscriber_id = %self.subscriber.id(),
                "close handshake timed out, dropping connection"
            );
        }
        self.state = SubscriptionState::Removed;
        info!(
            room_id = %self.room_id,
            subscriber_id = %self.subscriber.id(),
            reason,
            "client disconnected"
        );
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Serving task aborted mid-park.
        if self.state != SubscriptionState::Removed {
            self.subscriber.cancel();
            self.registry.unregister(&self.room_id, self.subscriber.id());
        }
    }
}

/// `GET /subscribers/{room_id}`: admit, upgrade, and serve one observer.
pub async fn subscribe(
    State(state): State<AppState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    Path(raw_room_id): Path<String>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AdmissionError> {
    let room_id = admit(&state.rooms, &raw_room_id)?;

    let upgrade = upgrade.map_err(|rejection| {
        warn!(room_id = %room_id, error = %rejection.body_text(), "failed to upgrade connection");
        AdmissionError::Upgrade
    })?;

    let registry = Arc::clone(&state.registry);
    let lifetime = state.shutdown.clone();
    let close_timeout = state.broadcaster.write_timeout();

    Ok(upgrade
        .on_failed_upgrade(move |e| {
            warn!(room_id = %room_id, client_ip = %client_addr.ip(), error = %e, "failed to upgrade connection");
        })
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            let subscription = Subscription::register(
                registry,
                room_id,
                Arc::new(WsConnection::new(sink)),
                &lifetime,
                close_timeout,
            );
            info!(
                room_id = %room_id,
                subscriber_id = %subscription.subscriber().id(),
                client_ip = %client_addr.ip(),
                "new client connected"
            );
            serve_socket(subscription, stream).await;
        }))
}

async fn serve_socket(subscription: Subscription, mut stream: SplitStream<WebSocket>) {
    // Inbound frames are discarded; reading is how a remote close shows up.
    let closed = async move {
        while let Some(Ok(message)) = stream.next().await {
            if let WsMessage::Close(_) = message {
                break;
            }
        }
    };

    subscription.park(closed).await;
}

#[cfg(test)]
mod tests {
    use ama_core::{MessageId, RoomEvent};
    use ama_store::Database;

    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::connection::test_support::{HangingCloseConnection, RecordingConnection};

    const CLOSE_TIMEOUT: Duration = Duration::from_millis(200);

    fn registry() -> Arc<SubscriberRegistry> {
        Arc::new(SubscriberRegistry::new())
    }

    #[test]
    fn admit_existing_room() {
        let rooms = RoomRepo::new(Database::in_memory().unwrap());
        let room = rooms.create("rust").unwrap();
        assert_eq!(admit(&rooms, &room.id.to_string()).unwrap(), room.id);
    }

    #[test]
    fn admit_rejects_malformed_id() {
        let rooms = RoomRepo::new(Database::in_memory().unwrap());
        assert!(matches!(
            admit(&rooms, "definitely-not-a-uuid"),
            Err(AdmissionError::InvalidRoomId)
        ));
    }

    #[test]
    fn admit_rejects_unknown_room() {
        let rooms = RoomRepo::new(Database::in_memory().unwrap());
        assert!(matches!(
            admit(&rooms, &RoomId::new().to_string()),
            Err(AdmissionError::RoomNotFound)
        ));
    }

    #[test]
    fn admission_error_statuses() {
        assert_eq!(
            AdmissionError::InvalidRoomId.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AdmissionError::RoomNotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AdmissionError::Store(StoreError::Database("boom".into()))
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AdmissionError::Upgrade.into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn register_inserts_into_registry() {
        let registry = registry();
        let room = RoomId::new();
        let sub = Subscription::register(
            Arc::clone(&registry),
            room,
            RecordingConnection::new(),
            &CancellationToken::new(),
            CLOSE_TIMEOUT,
        );
        assert_eq!(sub.state(), SubscriptionState::Registered);
        assert_eq!(sub.room_id(), &room);
        assert_eq!(registry.subscriber_count(&room), 1);
    }

    #[tokio::test]
    async fn peer_close_removes_subscriber() {
        let registry = registry();
        let room = RoomId::new();
        let conn = RecordingConnection::new();
        let sub = Subscription::register(
            Arc::clone(&registry),
            room,
            conn.clone(),
            &CancellationToken::new(),
            CLOSE_TIMEOUT,
        );

        let state = sub.park(async {}).await;
        assert_eq!(state, SubscriptionState::Removed);
        assert_eq!(registry.subscriber_count(&room), 0);
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn delivery_failure_wakes_parked_subscriber() {
        let registry = registry();
        let broadcaster = Broadcaster::new(Arc::clone(&registry), Duration::from_secs(1));
        let room = RoomId::new();

        let broken = RecordingConnection::failing();
        let healthy = RecordingConnection::new();
        let lifetime = CancellationToken::new();
        let broken_sub =
            Subscription::register(Arc::clone(&registry), room, broken.clone(), &lifetime, CLOSE_TIMEOUT);
        let healthy_sub =
            Subscription::register(Arc::clone(&registry), room, healthy.clone(), &lifetime, CLOSE_TIMEOUT);

        let broken_task = tokio::spawn(broken_sub.park(std::future::pending()));
        let healthy_task = tokio::spawn(healthy_sub.park(std::future::pending()));

        let msg = MessageId::new();
        broadcaster
            .notify(&RoomEvent::reaction_created(room, msg, 1))
            .await;

        let state = tokio::time::timeout(Duration::from_secs(1), broken_task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, SubscriptionState::Removed);
        assert!(broken.is_closed());
        assert_eq!(registry.subscriber_count(&room), 1);

        broadcaster
            .notify(&RoomEvent::reaction_deleted(room, msg, 0))
            .await;
        assert_eq!(broken.attempts(), 1);
        assert_eq!(healthy.frames().len(), 2);

        healthy_task.abort();
    }

    #[tokio::test]
    async fn lifetime_cancellation_wakes_all() {
        let registry = registry();
        let room = RoomId::new();
        let lifetime = CancellationToken::new();

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let sub = Subscription::register(
                    Arc::clone(&registry),
                    room,
                    RecordingConnection::new(),
                    &lifetime,
                    CLOSE_TIMEOUT,
                );
                tokio::spawn(sub.park(std::future::pending()))
            })
            .collect();
        assert_eq!(registry.subscriber_count(&room), 3);

        lifetime.cancel();
        for task in tasks {
            assert_eq!(task.await.unwrap(), SubscriptionState::Removed);
        }
        assert_eq!(registry.subscriber_count(&room), 0);
    }

    #[tokio::test]
    async fn aborted_task_still_unregisters() {
        let registry = registry();
        let room = RoomId::new();
        let sub = Subscription::register(
            Arc::clone(&registry),
            room,
            RecordingConnection::new(),
            &CancellationToken::new(),
            CLOSE_TIMEOUT,
        );

        let task = tokio::spawn(sub.park(std::future::pending()));
        tokio::task::yield_now().await;
        task.abort();
        let _ = task.await;

        assert_eq!(registry.subscriber_count(&room), 0);
    }

    #[test]
    fn admit_reports_store_failure() {
        let db = Database::in_memory().unwrap();
        let rooms = RoomRepo::new(db.clone());
        db.with_conn(|conn| Ok(conn.execute_batch("DROP TABLE messages; DROP TABLE rooms;")?))
            .unwrap();

        assert!(matches!(
            admit(&rooms, &RoomId::new().to_string()),
            Err(AdmissionError::Store(_))
        ));
    }

    #[tokio::test]
    async fn unacknowledged_close_does_not_hold_removal() {
        let registry = registry();
        let room = RoomId::new();
        let lifetime = CancellationToken::new();
        let sub = Subscription::register(
            Arc::clone(&registry),
            room,
            Arc::new(HangingCloseConnection),
            &lifetime,
            CLOSE_TIMEOUT,
        );

        let task = tokio::spawn(sub.park(std::future::pending()));
        lifetime.cancel();

        let state = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("removal waited on close")
            .unwrap();
        assert_eq!(state, SubscriptionState::Removed);
        assert_eq!(registry.subscriber_count(&room), 0);
    }
}
