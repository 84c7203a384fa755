use std::str::FromStr;

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a TEXT id column into one of the uuid-backed id types.
pub fn parse_id<T: FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid id: {raw}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ama_core::RoomId;

    #[test]
    fn parse_id_accepts_uuid() {
        let id = RoomId::new();
        let parsed: RoomId = parse_id(&id.to_string(), "rooms", "id").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_id_reports_column() {
        let err = parse_id::<RoomId>("garbage", "messages", "room_id").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("messages.room_id"), "got: {msg}");
        assert!(msg.contains("garbage"), "got: {msg}");
    }
}
