//! Database schema migrations for pomoloop.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::Connection;
use tracing::{info, warn};

use super::backfill::backfill_legacy_rows;
use crate::error::StorageError;
use crate::timer::TimePoint;

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 4;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// `catalog` is the list of known time points the ActiveTimePoint backfill
/// matches legacy rows against.
///
/// # Errors
/// Returns `StorageError::MigrationFailed` naming the step that failed.
pub fn migrate(conn: &Connection, catalog: &[TimePoint]) -> Result<(), StorageError> {
    create_schema_version_table(conn).map_err(|e| failed(0, e))?;

    let current_version = get_schema_version(conn);
    if current_version > SCHEMA_VERSION {
        return Err(StorageError::MigrationFailed(format!(
            "database schema v{current_version} is newer than supported v{SCHEMA_VERSION}"
        )));
    }

    if current_version < 1 {
        migrate_v1(conn).map_err(|e| failed(1, e))?;
    }
    if current_version < 2 {
        migrate_v2(conn).map_err(|e| failed(2, e))?;
    }
    if current_version < 3 {
        migrate_v3(conn, catalog).map_err(|e| failed(3, e))?;
    }
    if current_version < 4 {
        migrate_v4(conn).map_err(|e| failed(4, e))?;
    }

    if current_version < SCHEMA_VERSION {
        info!(from = current_version, to = SCHEMA_VERSION, "database migrated");
    }
    Ok(())
}

fn failed(version: i32, e: impl std::fmt::Display) -> StorageError {
    StorageError::MigrationFailed(format!("v{version}: {e}"))
}

fn create_schema_version_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: work items and the bare event ledger.
///
/// Matches the layout of ledgers written before ActiveTimePoints existed,
/// so it is a no-op on those.
fn migrate_v1(conn: &Connection) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS work (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            number      TEXT,
            title       TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS work_event (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            work_id     INTEGER NOT NULL REFERENCES work(id),
            event_json  TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        );",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: denormalised event name for filtering.
fn migrate_v2(conn: &Connection) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "ALTER TABLE work_event ADD COLUMN event_name TEXT NOT NULL DEFAULT '';
         UPDATE work_event
            SET event_name = COALESCE(json_extract(event_json, '$.type'), '')
          WHERE event_name = '';",
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}

/// Migration v3: ActiveTimePoint table and per-event interval id.
///
/// Existing started rows are backfilled against `catalog`.
fn migrate_v3(conn: &Connection, catalog: &[TimePoint]) -> Result<(), StorageError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS active_time_point (
            id           TEXT PRIMARY KEY,
            original_id  TEXT NOT NULL,
            name         TEXT NOT NULL,
            kind         TEXT NOT NULL,
            kind_alias   TEXT NOT NULL,
            duration_ms  INTEGER NOT NULL,
            created_at   INTEGER NOT NULL
        );

        ALTER TABLE work_event ADD COLUMN active_time_point_id TEXT;",
    )?;
    backfill_legacy_rows(&tx, catalog)?;
    set_schema_version(&tx, 3)?;
    tx.commit()?;
    Ok(())
}

/// Migration v4: indexes for period and per-work queries.
fn migrate_v4(conn: &Connection) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_work_event_work_created ON work_event(work_id, created_at);
         CREATE INDEX IF NOT EXISTS idx_work_event_created ON work_event(created_at);
         CREATE INDEX IF NOT EXISTS idx_work_event_atp ON work_event(active_time_point_id);",
    )?;
    set_schema_version(&tx, 4)?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::default_time_points;

    fn legacy_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE work (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                number TEXT,
                title TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE work_event (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                work_id INTEGER NOT NULL,
                event_json TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            INSERT INTO work (number, title, created_at, updated_at) VALUES ('42', 'Legacy', 0, 0);",
        )
        .unwrap();
        conn
    }

    fn insert_legacy(conn: &Connection, json: &str, created_at: i64) {
        conn.execute(
            "INSERT INTO work_event (work_id, event_json, created_at) VALUES (1, ?1, ?2)",
            rusqlite::params![json, created_at],
        )
        .unwrap();
    }

    #[test]
    fn test_migrate_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn, &default_time_points()).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        // Query should not fail (columns exist)
        conn.prepare("SELECT event_name, active_time_point_id FROM work_event")
            .unwrap();
        conn.prepare("SELECT id, original_id, kind_alias FROM active_time_point")
            .unwrap();
    }

    #[test]
    fn test_migrate_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn, &default_time_points()).unwrap();
        migrate(&conn, &default_time_points()).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn test_legacy_rows_are_backfilled() {
        let conn = legacy_db();
        insert_legacy(
            &conn,
            r#"{"type":"WorkStarted","at":"2024-03-01T09:00:00Z","time_point_name":"Focus 1"}"#,
            1_709_283_600_000,
        );
        insert_legacy(&conn, r#"{"type":"Stopped","at":"2024-03-01T09:05:00Z"}"#, 1_709_283_900_000);
        insert_legacy(
            &conn,
            r#"{"type":"WorkStarted","at":"2024-03-01T09:06:00Z","time_point_name":"Focus 1"}"#,
            1_709_283_960_000,
        );
        insert_legacy(
            &conn,
            r#"{"type":"WorkReduced","at":"2024-03-01T09:07:00Z","delta_ms":60000}"#,
            1_709_284_020_000,
        );
        insert_legacy(
            &conn,
            r#"{"type":"BreakStarted","at":"2024-03-01T09:30:00Z","time_point_name":"Coffee"}"#,
            1_709_285_400_000,
        );

        migrate(&conn, &default_time_points()).unwrap();

        let ids: Vec<Option<String>> = conn
            .prepare("SELECT active_time_point_id FROM work_event ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(ids[0].is_some());
        assert_eq!(ids[0], ids[2]);
        assert_eq!(ids[1], None);
        assert_eq!(ids[3], None);
        assert_eq!(ids[4].as_deref(), Some("00000000-0000-0000-0000-000000000000"));

        let atps: i64 = conn
            .query_row("SELECT COUNT(*) FROM active_time_point", [], |row| row.get(0))
            .unwrap();
        assert_eq!(atps, 1);

        let names: Vec<String> = conn
            .prepare("SELECT event_name FROM work_event ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            names,
            vec!["WorkStarted", "Stopped", "WorkStarted", "WorkReduced", "BreakStarted"]
        );

        let reduced: String = conn
            .query_row("SELECT event_json FROM work_event WHERE id = 4", [], |row| row.get(0))
            .unwrap();
        assert!(reduced.contains(r#""active_time_point_id":null"#));
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn, &[]).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();
        assert!(matches!(
            migrate(&conn, &[]),
            Err(StorageError::MigrationFailed(_))
        ));
    }
}
