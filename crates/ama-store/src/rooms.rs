use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use ama_core::RoomId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRow {
    pub id: RoomId,
    pub theme: String,
    pub created_at: String,
}

fn map_row(row: &rusqlite::Row<'_>) -> Result<RoomRow, StoreError> {
    let id: String = row_helpers::get(row, 0, "rooms", "id")?;
    Ok(RoomRow {
        id: row_helpers::parse_id(&id, "rooms", "id")?,
        theme: row_helpers::get(row, 1, "rooms", "theme")?,
        created_at: row_helpers::get(row, 2, "rooms", "created_at")?,
    })
}

#[derive(Clone)]
pub struct RoomRepo {
    db: Database,
}

impl RoomRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new room with the given theme.
    #[instrument(skip(self))]
    pub fn create(&self, theme: &str) -> Result<RoomRow, StoreError> {
        let id = RoomId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rooms (id, theme, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.to_string(), theme, now],
            )?;
            Ok(())
        })?;

        Ok(RoomRow {
            id,
            theme: theme.to_string(),
            created_at: now,
        })
    }

    /// List all rooms, oldest first.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<RoomRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, theme, created_at FROM rooms ORDER BY created_at ASC, id ASC")?;
            let mut rows = stmt.query([])?;
            let mut rooms = Vec::new();
            while let Some(row) = rows.next()? {
                rooms.push(map_row(row)?);
            }
            Ok(rooms)
        })
    }

    /// Get a room by ID.
    #[instrument(skip(self), fields(room_id = %id))]
    pub fn get(&self, id: &RoomId) -> Result<RoomRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, theme, created_at FROM rooms WHERE id = ?1")?;
            let mut rows = stmt.query([id.to_string()])?;
            let room = match rows.next()? {
                Some(row) => map_row(row)?,
                None => return Err(StoreError::NotFound(format!("room {id}"))),
            };
            Ok(room)
        })
    }

    /// Whether a room with this ID exists. Database failures are errors,
    /// not `false`.
    #[instrument(skip(self), fields(room_id = %id))]
    pub fn exists(&self, id: &RoomId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM rooms WHERE id = ?1",
                [id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }
}
