use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use ama_core::{MessageId, RoomId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const SELECT_COLUMNS: &str =
    "SELECT id, room_id, message, reaction_count, answered, created_at FROM messages";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    pub id: MessageId,
    pub room_id: RoomId,
    pub message: String,
    pub reaction_count: i64,
    pub answered: bool,
    pub created_at: String,
}

fn map_row(row: &rusqlite::Row<'_>) -> Result<MessageRow, StoreError> {
    let id: String = row_helpers::get(row, 0, "messages", "id")?;
    let room_id: String = row_helpers::get(row, 1, "messages", "room_id")?;
    Ok(MessageRow {
        id: row_helpers::parse_id(&id, "messages", "id")?,
        room_id: row_helpers::parse_id(&room_id, "messages", "room_id")?,
        message: row_helpers::get(row, 2, "messages", "message")?,
        reaction_count: row_helpers::get(row, 3, "messages", "reaction_count")?,
        answered: row_helpers::get(row, 4, "messages", "answered")?,
        created_at: row_helpers::get(row, 5, "messages", "created_at")?,
    })
}

#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Post a message into a room. Fails with `NotFound` if the room is gone.
    #[instrument(skip(self, text), fields(room_id = %room_id))]
    pub fn create(&self, room_id: &RoomId, text: &str) -> Result<MessageRow, StoreError> {
        let id = MessageId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let room_exists: i64 = conn.query_row(
                "SELECT COUNT(*) FROM rooms WHERE id = ?1",
                [room_id.to_string()],
                |row| row.get(0),
            )?;
            if room_exists == 0 {
                return Err(StoreError::NotFound(format!("room {room_id}")));
            }

            conn.execute(
                "INSERT INTO messages (id, room_id, message, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.to_string(), room_id.to_string(), text, now],
            )?;
            Ok(())
        })?;

        Ok(MessageRow {
            id,
            room_id: *room_id,
            message: text.to_string(),
            reaction_count: 0,
            answered: false,
            created_at: now,
        })
    }

    /// All messages of a room, oldest first.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub fn list_for_room(&self, room_id: &RoomId) -> Result<Vec<MessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE room_id = ?1 ORDER BY created_at ASC, id ASC"
            ))?;
            let mut rows = stmt.query([room_id.to_string()])?;
            let mut messages = Vec::new();
            while let Some(row) = rows.next()? {
                messages.push(map_row(row)?);
            }
            Ok(messages)
        })
    }

    /// Get a message, scoped to the room it was posted in.
    #[instrument(skip(self), fields(room_id = %room_id, message_id = %id))]
    pub fn get_in_room(&self, room_id: &RoomId, id: &MessageId) -> Result<MessageRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE room_id = ?1 AND id = ?2"))?;
            let mut rows = stmt.query([room_id.to_string(), id.to_string()])?;
            let message = match rows.next()? {
                Some(row) => map_row(row)?,
                None => return Err(StoreError::NotFound(format!("message {id}"))),
            };
            Ok(message)
        })
    }

    /// Add one reaction and return the new count.
    #[instrument(skip(self), fields(message_id = %id))]
    pub fn add_reaction(&self, id: &MessageId) -> Result<i64, StoreError> {
        self.update_reactions(
            id,
            "UPDATE messages SET reaction_count = reaction_count + 1 WHERE id = ?1 RETURNING reaction_count",
        )
    }

    /// Remove one reaction and return the new count. Never goes below zero.
    #[instrument(skip(self), fields(message_id = %id))]
    pub fn remove_reaction(&self, id: &MessageId) -> Result<i64, StoreError> {
        self.update_reactions(
            id,
            "UPDATE messages SET reaction_count = MAX(reaction_count - 1, 0) WHERE id = ?1 RETURNING reaction_count",
        )
    }

    /// Flag a message as answered.
    #[instrument(skip(self), fields(message_id = %id))]
    pub fn mark_answered(&self, id: &MessageId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET answered = 1 WHERE id = ?1",
                [id.to_string()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("message {id}")));
            }
            Ok(())
        })
    }

    fn update_reactions(&self, id: &MessageId, sql: &str) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([id.to_string()])?;
            let count = match rows.next()? {
                Some(row) => row_helpers::get(row, 0, "messages", "reaction_count")?,
                None => return Err(StoreError::NotFound(format!("message {id}"))),
            };
            Ok(count)
        })
    }
}
