use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, RoomId};

/// Payload of a `message_created` notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCreated {
    pub id: MessageId,
    pub message: String,
}

/// Payload shared by both reaction notifications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionCount {
    pub id: MessageId,
    pub reaction_count: i64,
}

/// What changed. Serializes as `{"kind": ..., "value": {...}}`, which is
/// exactly the frame pushed to room subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum EventPayload {
    #[serde(rename = "message_created")]
    MessageCreated(MessageCreated),

    #[serde(rename = "message_reaction_created")]
    ReactionCreated(ReactionCount),

    #[serde(rename = "message_reaction_deleted")]
    ReactionDeleted(ReactionCount),
}

/// One state change inside a room. Immutable once built; the room id is
/// routing information only and never leaves the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomEvent {
    room_id: RoomId,
    payload: EventPayload,
}

impl RoomEvent {
    pub fn new(room_id: RoomId, payload: EventPayload) -> Self {
        Self { room_id, payload }
    }

    pub fn message_created(room_id: RoomId, id: MessageId, message: impl Into<String>) -> Self {
        Self::new(
            room_id,
            EventPayload::MessageCreated(MessageCreated {
                id,
                message: message.into(),
            }),
        )
    }

    pub fn reaction_created(room_id: RoomId, id: MessageId, reaction_count: i64) -> Self {
        Self::new(
            room_id,
            EventPayload::ReactionCreated(ReactionCount { id, reaction_count }),
        )
    }

    pub fn reaction_deleted(room_id: RoomId, id: MessageId, reaction_count: i64) -> Self {
        Self::new(
            room_id,
            EventPayload::ReactionDeleted(ReactionCount { id, reaction_count }),
        )
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            EventPayload::MessageCreated(_) => "message_created",
            EventPayload::ReactionCreated(_) => "message_reaction_created",
            EventPayload::ReactionDeleted(_) => "message_reaction_deleted",
        }
    }

    /// Encode the wire frame: `{"kind": ..., "value": ...}`.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.payload)
    }
}
