//! Box store persistence.
//!
//! One SQLite row per fingerprint. The connection is not `Sync`, so it is
//! guarded by a `tokio::sync::Mutex` the same way the teacher's `Database`
//! wrapper guards its connection; unlike the teacher, schema creation is not
//! performed ad hoc at open time but by a dedicated migration runner invoked
//! from the `migrate` CLI subcommand (and idempotently again at `serve`
//! startup).

mod boxes;
mod migrations;

pub use boxes::{Box, BoxStatus, BoxStore};

use std::path::Path;

use rusqlite::Connection;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// Errors surfaced by the box store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Box store database handle.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and apply pending migrations.
    pub fn open(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        migrations::runner().to_latest(&mut conn)?;

        info!(path = %path.display(), "box store opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database with migrations applied, for tests.
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrations::runner().to_latest(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Apply pending migrations without opening a long-lived handle. Used by
    /// the `migrate` CLI subcommand.
    pub fn migrate(path: impl AsRef<Path>) -> DatabaseResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(path)?;
        migrations::runner().to_latest(&mut conn)?;
        info!(path = %path.display(), "migrations applied");
        Ok(())
    }

    /// Box store view over this connection.
    pub fn boxes(&self) -> BoxStoreWithConn<'_> {
        BoxStoreWithConn { db: self }
    }
}

/// Borrowed handle scoping box-store operations to this `Database`.
pub struct BoxStoreWithConn<'a> {
    db: &'a Database,
}

impl BoxStoreWithConn<'_> {
    pub async fn create(&self, fingerprint: &str, container_id: &str) -> DatabaseResult<Box> {
        let conn = self.db.conn.lock().await;
        BoxStore.create(&conn, fingerprint, container_id)
    }

    pub async fn get_by_fingerprint(&self, fingerprint: &str) -> DatabaseResult<Option<Box>> {
        let conn = self.db.conn.lock().await;
        BoxStore.get_by_fingerprint(&conn, fingerprint)
    }

    pub async fn get_by_container_id(&self, container_id: &str) -> DatabaseResult<Option<Box>> {
        let conn = self.db.conn.lock().await;
        BoxStore.get_by_container_id(&conn, container_id)
    }

    pub async fn touch(&self, fingerprint: &str) -> DatabaseResult<()> {
        let conn = self.db.conn.lock().await;
        BoxStore.touch(&conn, fingerprint)
    }

    pub async fn update_status(&self, fingerprint: &str, status: BoxStatus) -> DatabaseResult<()> {
        let conn = self.db.conn.lock().await;
        BoxStore.update_status(&conn, fingerprint, status)
    }

    pub async fn list_expired(&self, cutoff: chrono::DateTime<chrono::Utc>) -> DatabaseResult<Vec<Box>> {
        let conn = self.db.conn.lock().await;
        BoxStore.list_expired(&conn, cutoff)
    }

    pub async fn delete(&self, fingerprint: &str) -> DatabaseResult<()> {
        let conn = self.db.conn.lock().await;
        BoxStore.delete(&conn, fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_runs_migrations() {
        let db = Database::open_in_memory().unwrap();
        let boxes = db.boxes();
        assert!(boxes.get_by_fingerprint("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_on_disk_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gobox.sqlite3");

        {
            let db = Database::open(&path).unwrap();
            db.boxes().create("fp-1", "container-1").await.unwrap();
        }

        let db = Database::open(&path).unwrap();
        let row = db.boxes().get_by_fingerprint("fp-1").await.unwrap().unwrap();
        assert_eq!(row.container_id, "container-1");
    }

    #[test]
    fn migrate_standalone_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate-only.sqlite3");

        Database::migrate(&path).unwrap();
        Database::migrate(&path).unwrap();
    }
}
