//! Key-value persistence for the gate.
//!
//! The browser keeps the quota record in `localStorage`; here the same
//! string pairs live in a SQLite `kv` table, or in memory for tests and
//! embedders that bring their own storage.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};

use super::data_dir;
use crate::error::{CoreError, DatabaseError};

/// String key-value storage, the shape of `localStorage`.
pub trait KeyValue: Send {
    fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError>;
    fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError>;
    fn kv_delete(&self, key: &str) -> Result<(), DatabaseError>;
}

/// Shared storage, as several page loads see the same `localStorage`.
impl<T: KeyValue + Sync + ?Sized> KeyValue for Arc<T> {
    fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        (**self).kv_get(key)
    }

    fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        (**self).kv_set(key, value)
    }

    fn kv_delete(&self, key: &str) -> Result<(), DatabaseError> {
        (**self).kv_delete(key)
    }
}

/// SQLite database holding the `kv` table.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `~/.config/reverscodes/reverscodes.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the data directory is unavailable or the
    /// database cannot be opened or migrated.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("reverscodes.db");
        Ok(Self::open_at(&path)?)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }
}

impl KeyValue for Database {
    fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let mut stmt = self.conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let result = stmt.query_row(params![key], |row| row.get::<_, String>(0));
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn kv_delete(&self, key: &str) -> Result<(), DatabaseError> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// In-memory key-value map.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored pair.
    pub fn entries(&self) -> HashMap<String, String> {
        self.entries
            .lock()
            .map(|map| map.clone())
            .unwrap_or_default()
    }
}

impl KeyValue for MemoryKv {
    fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let map = self.entries.lock().map_err(|_| DatabaseError::Locked)?;
        Ok(map.get(key).cloned())
    }

    fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let mut map = self.entries.lock().map_err(|_| DatabaseError::Locked)?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn kv_delete(&self, key: &str) -> Result<(), DatabaseError> {
        let mut map = self.entries.lock().map_err(|_| DatabaseError::Locked)?;
        map.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_store() {
        let db = Database::open_memory().unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
        db.kv_set("test", "hello").unwrap();
        assert_eq!(db.kv_get("test").unwrap().unwrap(), "hello");
        db.kv_set("test", "again").unwrap();
        assert_eq!(db.kv_get("test").unwrap().unwrap(), "again");
        db.kv_delete("test").unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
    }

    #[test]
    fn file_database_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gate.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.kv_set("adBlockDeferrals", "2").unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.kv_get("adBlockDeferrals").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn memory_kv_behaves_like_database() {
        let kv = MemoryKv::new();
        assert!(kv.kv_get("k").unwrap().is_none());
        kv.kv_set("k", "v").unwrap();
        assert_eq!(kv.entries().get("k").map(String::as_str), Some("v"));
        kv.kv_delete("k").unwrap();
        assert!(kv.entries().is_empty());
    }
}
