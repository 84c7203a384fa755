use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;
use crate::schema;

/// Shared handle to the single SQLite connection backing rooms and messages.
/// Cloning is cheap; every clone serializes on the same lock.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open or create a database file, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create {}: {e}", parent.display())))?;
        }

        let conn = Connection::open(path)?;
        let db = Self::prepare(conn, path.to_owned())?;
        info!(path = %path.display(), "database opened");
        Ok(db)
    }

    /// Private in-memory database, used by tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::prepare(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn prepare(conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        conn.execute_batch(schema::PRAGMAS)
            .map_err(|e| StoreError::Database(format!("pragmas: {e}")))?;
        conn.execute_batch(schema::CREATE_TABLES)
            .map_err(|e| StoreError::Database(format!("schema: {e}")))?;
        check_schema_version(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Run `f` while holding the connection lock.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Stamp a fresh database with the current version, and refuse one written
/// by a different schema.
fn check_schema_version(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO schema_version (version)
         SELECT ?1 WHERE NOT EXISTS (SELECT 1 FROM schema_version)",
        [schema::SCHEMA_VERSION],
    )?;

    let version: u32 = conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
        row.get(0)
    })?;
    if version != schema::SCHEMA_VERSION {
        return Err(StoreError::Database(format!(
            "unsupported schema version {version}, expected {}",
            schema::SCHEMA_VERSION
        )));
    }
    Ok(())
}
