//! Integration test for opening a ledger written before active time points
//! existed.

use pomoloop_core::stats::Replay;
use pomoloop_core::storage::{migrations, ActiveTimePointRepository, WorkEventRepository};
use pomoloop_core::timer::default_time_points;
use pomoloop_core::{ActiveTimePointId, Database, WorkEvent};
use rusqlite::{params, Connection};

const LEGACY_ROWS: &[(&str, i64)] = &[
    (
        r#"{"type":"WorkStarted","at":"2024-03-01T09:00:00Z","time_point_name":"Focus 1"}"#,
        1_709_283_600_000,
    ),
    (r#"{"type":"Stopped","at":"2024-03-01T09:10:00Z"}"#, 1_709_284_200_000),
    (
        r#"{"type":"WorkStarted","at":"2024-03-01T09:15:00Z","time_point_name":"Focus 1"}"#,
        1_709_284_500_000,
    ),
    (
        r#"{"type":"WorkIncreased","at":"2024-03-01T09:16:00Z","delta_ms":120000}"#,
        1_709_284_560_000,
    ),
    (
        r#"{"type":"BreakStarted","at":"2024-03-01T09:30:00Z","time_point_name":"Break 1"}"#,
        1_709_285_400_000,
    ),
    (
        r#"{"type":"BreakStarted","at":"2024-03-01T09:35:00Z","time_point_name":"Stretch"}"#,
        1_709_285_700_000,
    ),
    (r#"{"type":"Stopped","at":"2024-03-01T09:40:00Z"}"#, 1_709_286_000_000),
];

fn write_legacy_ledger(path: &std::path::Path) {
    let conn = Connection::open(path).unwrap();
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
        INSERT INTO work (number, title, created_at, updated_at) VALUES (NULL, 'Old work', 0, 0);",
    )
    .unwrap();
    for (json, created_at) in LEGACY_ROWS {
        conn.execute(
            "INSERT INTO work_event (work_id, event_json, created_at) VALUES (1, ?1, ?2)",
            params![json, created_at],
        )
        .unwrap();
    }
}

#[test]
fn test_legacy_ledger_is_backfilled_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pomoloop.db");
    write_legacy_ledger(&path);

    let db = Database::open_at(&path, &default_time_points()).unwrap();
    assert_eq!(db.schema_version(), migrations::SCHEMA_VERSION);

    let events: Vec<WorkEvent> = db
        .events_for_work(1)
        .unwrap()
        .into_iter()
        .map(|r| r.event)
        .collect();
    assert_eq!(events.len(), LEGACY_ROWS.len());

    let ids: Vec<Option<ActiveTimePointId>> =
        events.iter().map(|e| e.active_time_point_id()).collect();
    // Both Focus 1 rows share one interval.
    assert_eq!(ids[0], ids[2]);
    assert!(!ids[0].unwrap().is_unknown());
    // Break 1 is its own interval; Stretch is not in the catalog.
    assert_ne!(ids[4], ids[0]);
    assert!(ids[5].unwrap().is_unknown());
    assert_eq!(ids[3], None);

    let catalog = db.active_time_points().unwrap();
    assert_eq!(catalog.len(), 2);

    let mut replay = Replay::new().with_catalog(&catalog);
    replay.apply_all(&events);
    let report = replay.finish(None);
    assert_eq!(report.totals.work_ms, 25 * 60_000);
    assert_eq!(report.totals.break_ms, 10 * 60_000);
    assert_eq!(report.intervals[0].planned_ms, Some(27 * 60_000));
    assert!(report.inconsistencies.is_empty());
}

#[test]
fn test_backfill_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pomoloop.db");
    write_legacy_ledger(&path);

    let first: Vec<_> = {
        let db = Database::open_at(&path, &default_time_points()).unwrap();
        db.events_for_work(1).unwrap()
    };
    let db = Database::open_at(&path, &default_time_points()).unwrap();
    assert_eq!(db.events_for_work(1).unwrap(), first);
    assert_eq!(db.active_time_points().unwrap().len(), 2);
}
