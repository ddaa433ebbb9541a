//! Schema migrations for the box store, run as their own startup phase
//! (`gobox-daemon migrate`) rather than ad hoc `CREATE TABLE IF NOT EXISTS`.

use rusqlite_migration::{Migrations, M};

pub fn runner() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        r#"
        CREATE TABLE boxes (
            id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL UNIQUE,
            container_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('running', 'paused')),
            last_active INTEGER NOT NULL
        );

        CREATE INDEX idx_boxes_container_id ON boxes(container_id);
        CREATE INDEX idx_boxes_last_active ON boxes(last_active);
        "#,
    )])
}
