//! REST handlers for rooms and messages.
//!
//! Write handlers emit a [`RoomEvent`] only after the store write succeeds.
//! Dispatch modes per operation:
//! - message created: [`DispatchMode::Detached`], the response does not wait
//!   for fan-out.
//! - reaction added / removed: [`DispatchMode::Inline`], fan-out finishes
//!   (bounded by the write timeout) before the response is produced.
//! - message answered: no event.

use ama_core::{MessageId, RoomEvent, RoomId};
use ama_store::{MessageRow, RoomRow};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::broadcast::DispatchMode;
use crate::error::ApiError;
use crate::server::AppState;

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct CreateRoomBody {
    pub theme: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageBody {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse<T> {
    pub id: T,
}

#[derive(Debug, Serialize)]
pub struct RoomsResponse {
    pub rooms: Vec<RoomRow>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<MessageRow>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: MessageRow,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionResponse {
    pub id: MessageId,
    pub reaction_count: i64,
}

fn parse_room_id(raw: &str) -> ApiResult<RoomId> {
    raw.parse().map_err(|_| ApiError::InvalidRoomId)
}

fn parse_message_path(room: &str, message: &str) -> ApiResult<(RoomId, MessageId)> {
    let room_id = parse_room_id(room)?;
    let message_id = message.parse().map_err(|_| ApiError::InvalidMessageId)?;
    Ok((room_id, message_id))
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(body)| body).map_err(|rejection| {
        tracing::debug!(error = %rejection.body_text(), "rejected request body");
        ApiError::InvalidJson
    })
}

/// POST /api/rooms
pub async fn create_room(
    State(state): State<AppState>,
    body: Result<Json<CreateRoomBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreatedResponse<RoomId>>)> {
    let body = json_body(body)?;
    let room = state.rooms.create(&body.theme)?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: room.id })))
}

/// GET /api/rooms
pub async fn list_rooms(State(state): State<AppState>) -> ApiResult<Json<RoomsResponse>> {
    let rooms = state.rooms.list()?;
    Ok(Json(RoomsResponse { rooms }))
}

/// GET /api/rooms/{room_id}/messages
pub async fn list_messages(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> ApiResult<Json<MessagesResponse>> {
    let room_id = parse_room_id(&room)?;
    state
        .rooms
        .get(&room_id)
        .map_err(|e| ApiError::from_store(e, ApiError::RoomNotFound))?;
    let messages = state.messages.list_for_room(&room_id)?;
    Ok(Json(MessagesResponse { messages }))
}

/// POST /api/rooms/{room_id}/messages
pub async fn create_message(
    State(state): State<AppState>,
    Path(room): Path<String>,
    body: Result<Json<CreateMessageBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreatedResponse<MessageId>>)> {
    let room_id = parse_room_id(&room)?;
    let body = json_body(body)?;
    let message = state
        .messages
        .create(&room_id, &body.message)
        .map_err(|e| ApiError::from_store(e, ApiError::RoomNotFound))?;

    state
        .broadcaster
        .dispatch(
            RoomEvent::message_created(room_id, message.id, message.message),
            DispatchMode::Detached,
        )
        .await;

    Ok((StatusCode::CREATED, Json(CreatedResponse { id: message.id })))
}

/// GET /api/rooms/{room_id}/messages/{message_id}
pub async fn get_message(
    State(state): State<AppState>,
    Path((room, message)): Path<(String, String)>,
) -> ApiResult<Json<MessageResponse>> {
    let (room_id, message_id) = parse_message_path(&room, &message)?;
    state
        .rooms
        .get(&room_id)
        .map_err(|e| ApiError::from_store(e, ApiError::RoomNotFound))?;
    let message = state
        .messages
        .get_in_room(&room_id, &message_id)
        .map_err(|e| ApiError::from_store(e, ApiError::MessageNotFound))?;
    Ok(Json(MessageResponse { message }))
}

/// PATCH /api/rooms/{room_id}/messages/{message_id}/reactions
pub async fn add_reaction(
    State(state): State<AppState>,
    Path((room, message)): Path<(String, String)>,
) -> ApiResult<(StatusCode, Json<ReactionResponse>)> {
    let (room_id, message_id) = parse_message_path(&room, &message)?;
    state
        .messages
        .get_in_room(&room_id, &message_id)
        .map_err(|e| ApiError::from_store(e, ApiError::MessageNotFound))?;

    let reaction_count = state
        .messages
        .add_reaction(&message_id)
        .map_err(|e| ApiError::from_store(e, ApiError::MessageNotFound))?;

    state
        .broadcaster
        .dispatch(
            RoomEvent::reaction_created(room_id, message_id, reaction_count),
            DispatchMode::Inline,
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(ReactionResponse {
            id: message_id,
            reaction_count,
        }),
    ))
}

/// DELETE /api/rooms/{room_id}/messages/{message_id}/reactions
pub async fn remove_reaction(
    State(state): State<AppState>,
    Path((room, message)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let (room_id, message_id) = parse_message_path(&room, &message)?;
    let current = state
        .messages
        .get_in_room(&room_id, &message_id)
        .map_err(|e| ApiError::from_store(e, ApiError::MessageNotFound))?;

    if current.reaction_count == 0 {
        return Ok(StatusCode::NO_CONTENT);
    }

    let reaction_count = state
        .messages
        .remove_reaction(&message_id)
        .map_err(|e| ApiError::from_store(e, ApiError::MessageNotFound))?;

    state
        .broadcaster
        .dispatch(
            RoomEvent::reaction_deleted(room_id, message_id, reaction_count),
            DispatchMode::Inline,
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /api/rooms/{room_id}/messages/{message_id}/answers
pub async fn mark_answered(
    State(state): State<AppState>,
    Path((room, message)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let (room_id, message_id) = parse_message_path(&room, &message)?;
    state
        .messages
        .get_in_room(&room_id, &message_id)
        .map_err(|e| ApiError::from_store(e, ApiError::MessageNotFound))?;
    state
        .messages
        .mark_answered(&message_id)
        .map_err(|e| ApiError::from_store(e, ApiError::MessageNotFound))?;
    Ok(StatusCode::NO_CONTENT)
}
