//! Box record and its CRUD operations against the `boxes` table.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use super::{DatabaseError, DatabaseResult};

/// A box's lifecycle state, per spec §4.6: a box is either attached to a
/// running container or has been paused pending reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxStatus {
    Running,
    Paused,
}

impl BoxStatus {
    fn as_str(self) -> &'static str {
        match self {
            BoxStatus::Running => "running",
            BoxStatus::Paused => "paused",
        }
    }

    fn parse(s: &str) -> DatabaseResult<Self> {
        match s {
            "running" => Ok(BoxStatus::Running),
            "paused" => Ok(BoxStatus::Paused),
            other => Err(DatabaseError::Sqlite(rusqlite::Error::InvalidColumnType(
                0,
                format!("unknown box status {other}"),
                rusqlite::types::Type::Text,
            ))),
        }
    }
}

/// One fingerprint's bound container, as persisted in the box store.
#[derive(Debug, Clone)]
pub struct Box {
    pub id: Uuid,
    pub fingerprint: String,
    pub container_id: String,
    pub status: BoxStatus,
    pub last_active: DateTime<Utc>,
}

fn row_to_box(row: &rusqlite::Row) -> rusqlite::Result<(String, String, String, String, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn assemble(row: (String, String, String, String, i64)) -> DatabaseResult<Box> {
    let (id, fingerprint, container_id, status, last_active) = row;
    Ok(Box {
        id: Uuid::parse_str(&id)
            .map_err(|e| DatabaseError::Sqlite(rusqlite::Error::InvalidColumnType(
                0,
                e.to_string(),
                rusqlite::types::Type::Text,
            )))?,
        fingerprint,
        container_id,
        status: BoxStatus::parse(&status)?,
        last_active: Utc
            .timestamp_opt(last_active, 0)
            .single()
            .unwrap_or_else(Utc::now),
    })
}

const SELECT_COLUMNS: &str = "id, fingerprint, container_id, status, last_active";

pub struct BoxStore;

impl BoxStore {
    pub fn create(&self, conn: &Connection, fingerprint: &str, container_id: &str) -> DatabaseResult<Box> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let result = conn.execute(
            "INSERT INTO boxes (id, fingerprint, container_id, status, last_active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                id.to_string(),
                fingerprint,
                container_id,
                BoxStatus::Running.as_str(),
                now.timestamp(),
            ],
        );

        match result {
            Ok(_) => Ok(Box {
                id,
                fingerprint: fingerprint.to_string(),
                container_id: container_id.to_string(),
                status: BoxStatus::Running,
                last_active: now,
            }),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(DatabaseError::Conflict(format!(
                    "box already exists for fingerprint {fingerprint}"
                )))
            }
            Err(e) => Err(DatabaseError::from(e)),
        }
    }

    pub fn get_by_fingerprint(&self, conn: &Connection, fingerprint: &str) -> DatabaseResult<Option<Box>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM boxes WHERE fingerprint = ?1"
        ))?;

        match stmt.query_row([fingerprint], row_to_box) {
            Ok(row) => Ok(Some(assemble(row)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DatabaseError::from(e)),
        }
    }

    pub fn get_by_container_id(&self, conn: &Connection, container_id: &str) -> DatabaseResult<Option<Box>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM boxes WHERE container_id = ?1"
        ))?;

        match stmt.query_row([container_id], row_to_box) {
            Ok(row) => Ok(Some(assemble(row)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DatabaseError::from(e)),
        }
    }

    /// Bump `last_active` to now. Used on every acquire.
    pub fn touch(&self, conn: &Connection, fingerprint: &str) -> DatabaseResult<()> {
        let changed = conn.execute(
            "UPDATE boxes SET last_active = ?2 WHERE fingerprint = ?1",
            rusqlite::params![fingerprint, Utc::now().timestamp()],
        )?;

        if changed == 0 {
            return Err(DatabaseError::NotFound(format!(
                "no box for fingerprint {fingerprint}"
            )));
        }
        Ok(())
    }

    pub fn update_status(&self, conn: &Connection, fingerprint: &str, status: BoxStatus) -> DatabaseResult<()> {
        let changed = conn.execute(
            "UPDATE boxes SET status = ?2 WHERE fingerprint = ?1",
            rusqlite::params![fingerprint, status.as_str()],
        )?;

        if changed == 0 {
            return Err(DatabaseError::NotFound(format!(
                "no box for fingerprint {fingerprint}"
            )));
        }
        Ok(())
    }

    /// Boxes whose `last_active` is older than `cutoff`, candidates for the reaper.
    pub fn list_expired(&self, conn: &Connection, cutoff: DateTime<Utc>) -> DatabaseResult<Vec<Box>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM boxes WHERE last_active < ?1"
        ))?;

        let rows = stmt
            .query_map([cutoff.timestamp()], row_to_box)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(assemble).collect()
    }

    pub fn delete(&self, conn: &Connection, fingerprint: &str) -> DatabaseResult<()> {
        conn.execute("DELETE FROM boxes WHERE fingerprint = ?1", [fingerprint])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations;

    fn setup_db() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        migrations::runner().to_latest(&mut conn).unwrap();
        conn
    }

    #[test]
    fn create_and_get_by_fingerprint() {
        let conn = setup_db();
        let store = BoxStore;

        let created = store.create(&conn, "fp-1", "container-1").unwrap();
        assert_eq!(created.status, BoxStatus::Running);

        let found = store.get_by_fingerprint(&conn, "fp-1").unwrap().unwrap();
        assert_eq!(found.container_id, "container-1");
        assert_eq!(found.id, created.id);
    }

    #[test]
    fn create_duplicate_fingerprint_is_conflict() {
        let conn = setup_db();
        let store = BoxStore;

        store.create(&conn, "fp-1", "container-1").unwrap();
        let err = store.create(&conn, "fp-1", "container-2").unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));
    }

    #[test]
    fn touch_updates_last_active() {
        let conn = setup_db();
        let store = BoxStore;
        store.create(&conn, "fp-1", "container-1").unwrap();

        // backdate so the touch is observable
        conn.execute(
            "UPDATE boxes SET last_active = 0 WHERE fingerprint = 'fp-1'",
            [],
        )
        .unwrap();

        store.touch(&conn, "fp-1").unwrap();
        let found = store.get_by_fingerprint(&conn, "fp-1").unwrap().unwrap();
        assert!(found.last_active.timestamp() > 0);
    }

    #[test]
    fn touch_missing_fingerprint_is_not_found() {
        let conn = setup_db();
        let store = BoxStore;
        let err = store.touch(&conn, "ghost").unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(_)));
    }

    #[test]
    fn list_expired_respects_cutoff() {
        let conn = setup_db();
        let store = BoxStore;
        store.create(&conn, "fp-old", "container-old").unwrap();
        store.create(&conn, "fp-new", "container-new").unwrap();

        conn.execute(
            "UPDATE boxes SET last_active = 1 WHERE fingerprint = 'fp-old'",
            [],
        )
        .unwrap();

        let cutoff = Utc.timestamp_opt(1000, 0).single().unwrap();
        let expired = store.list_expired(&conn, cutoff).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].fingerprint, "fp-old");
    }

    #[test]
    fn delete_removes_row() {
        let conn = setup_db();
        let store = BoxStore;
        store.create(&conn, "fp-1", "container-1").unwrap();
        store.delete(&conn, "fp-1").unwrap();
        assert!(store.get_by_fingerprint(&conn, "fp-1").unwrap().is_none());
    }
}
