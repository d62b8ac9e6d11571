//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: key/value settings
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        key              TEXT PRIMARY KEY,
        value            TEXT NOT NULL,
        updated_at       DATETIME NOT NULL
    );
    "#,
    // Version 2: completed raids
    r#"
    CREATE TABLE IF NOT EXISTS raid_history (
        id               TEXT PRIMARY KEY,
        raid_id          TEXT,
        map_name         TEXT,
        map_key          TEXT,
        raid_type        TEXT NOT NULL,
        game_mode        TEXT NOT NULL,
        server_address   TEXT,
        session_id       TEXT,
        short_id         TEXT,
        is_party         INTEGER NOT NULL DEFAULT 0,
        party_leader     TEXT,
        party            JSON,
        started_at       DATETIME,
        ended_at         DATETIME,
        created_at       DATETIME NOT NULL,
        recorded_at      DATETIME NOT NULL,

        -- Last network sample
        network          JSON NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_raid_history_created ON raid_history(created_at);
    CREATE INDEX IF NOT EXISTS idx_raid_history_map ON raid_history(map_key);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["settings", "raid_history"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_upgrade_from_settings_only() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0]).unwrap();
        conn.execute("PRAGMA user_version = 1", []).unwrap();
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES ('k', 'v', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        run_migrations(&conn).unwrap();

        let value: String = conn
            .query_row("SELECT value FROM settings WHERE key = 'k'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(value, "v");
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }
}
