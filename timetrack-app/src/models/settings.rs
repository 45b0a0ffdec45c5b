//! The `settings` table, and the engine's view of it.

use crate::db::connection::DbPool;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use timetrack_backup::{BackupError, SettingsStore};

pub fn get(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM settings WHERE key = ?",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .optional()
}

pub fn set(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// [`SettingsStore`] backed by the datastore's own `settings` table.
#[derive(Clone)]
pub struct SqliteSettings {
    pool: DbPool,
}

impl SqliteSettings {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> timetrack_backup::Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| BackupError::Settings(format!("no database connection: {e}")))
    }
}

impl SettingsStore for SqliteSettings {
    fn get(&self, key: &str) -> timetrack_backup::Result<Option<String>> {
        get(&*self.conn()?, key).map_err(|e| BackupError::Settings(format!("reading {key}: {e}")))
    }

    fn set(&self, key: &str, value: &str) -> timetrack_backup::Result<()> {
        set(&*self.conn()?, key, value)
            .map_err(|e| BackupError::Settings(format!("writing {key}: {e}")))
    }
}
