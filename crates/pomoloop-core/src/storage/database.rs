//! SQLite-backed ledger storage.
//!
//! Provides persistent storage for:
//! - Work items
//! - The append-only work event ledger
//! - ActiveTimePoint rows, one per opened interval

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::data_dir;
use super::ledger::{
    ActiveTimePointRepository, Work, WorkEventRecord, WorkEventRepository, WorkRepository,
};
use super::migrations;
use crate::error::StorageError;
use crate::events::WorkEvent;
use crate::timer::{default_time_points, ActiveTimePoint, ActiveTimePointId, Kind, TimePoint};

/// SQLite database for the work event ledger.
///
/// The connection sits behind a mutex so one handle can be shared between
/// the ledger writer and readers.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `~/.config/pomoloop/pomoloop.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be created or the
    /// database cannot be opened or migrated.
    pub fn open() -> crate::Result<Self> {
        let path = data_dir()?.join("pomoloop.db");
        Ok(Self::open_at(&path, &default_time_points())?)
    }

    /// Open (or create) a database file, backfilling legacy rows against
    /// `catalog`.
    pub fn open_at(path: &Path, catalog: &[TimePoint]) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(|source| StorageError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "database opened");
        Self::with_connection(conn, catalog)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, &default_time_points())
    }

    fn with_connection(conn: Connection, catalog: &[TimePoint]) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::migrate(&conn, catalog)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn schema_version(&self) -> i32 {
        migrations::get_schema_version(&self.conn())
    }

    fn query_events(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<WorkEventRecord>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, raw_event)?;
        let mut out = Vec::new();
        for row in rows {
            let (id, work_id, json) = row?;
            out.push(decode_event(id, work_id, &json)?);
        }
        Ok(out)
    }
}

type RawEvent = (i64, i64, String);

fn raw_event(row: &Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn decode_event(id: i64, work_id: i64, json: &str) -> Result<WorkEventRecord, StorageError> {
    let event = serde_json::from_str(json).map_err(|e| StorageError::CorruptRow {
        id,
        message: e.to_string(),
    })?;
    Ok(WorkEventRecord { id, work_id, event })
}

pub(crate) fn ms_to_datetime(id: i64, ms: i64) -> Result<DateTime<Utc>, StorageError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StorageError::CorruptRow {
            id,
            message: format!("timestamp {ms} out of range"),
        })
}

type AtpRow = (String, String, String, String, String, i64, i64);

pub(crate) fn atp_to_row(atp: &ActiveTimePoint) -> AtpRow {
    (
        atp.id.to_string(),
        atp.original_id.to_string(),
        atp.name.clone(),
        atp.kind.to_string(),
        atp.kind_alias.clone(),
        i64::try_from(atp.duration_ms).unwrap_or(i64::MAX),
        atp.created_at.timestamp_millis(),
    )
}

fn parse_kind(s: &str) -> Option<Kind> {
    match s {
        "work" => Some(Kind::Work),
        "break" => Some(Kind::Break),
        "long_break" => Some(Kind::LongBreak),
        _ => None,
    }
}

fn atp_from_row(row: AtpRow) -> Result<ActiveTimePoint, StorageError> {
    let (id, original_id, name, kind, kind_alias, duration_ms, created_at) = row;
    let corrupt = |message: String| StorageError::CorruptRow { id: 0, message };
    Ok(ActiveTimePoint {
        id: ActiveTimePointId(
            id.parse()
                .map_err(|e| corrupt(format!("active time point id '{id}': {e}")))?,
        ),
        original_id: original_id
            .parse()
            .map_err(|e| corrupt(format!("time point id '{original_id}': {e}")))?,
        name,
        kind: parse_kind(&kind).ok_or_else(|| corrupt(format!("unknown kind '{kind}'")))?,
        kind_alias,
        duration_ms: u64::try_from(duration_ms).unwrap_or(0),
        created_at: ms_to_datetime(0, created_at)?,
    })
}

fn raw_atp(row: &Row<'_>) -> rusqlite::Result<AtpRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn work_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, Option<String>, String, i64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn work_from_raw(raw: (i64, Option<String>, String, i64, i64)) -> Result<Work, StorageError> {
    let (id, number, title, created_at, updated_at) = raw;
    Ok(Work {
        id,
        number,
        title,
        created_at: ms_to_datetime(id, created_at)?,
        updated_at: ms_to_datetime(id, updated_at)?,
    })
}

impl WorkEventRepository for Database {
    fn insert_event(
        &self,
        work_id: i64,
        event: &WorkEvent,
        cancel: &CancellationToken,
    ) -> Result<i64, StorageError> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let json = serde_json::to_string(event)
            .map_err(|e| StorageError::QueryFailed(format!("encode work event: {e}")))?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO work_event (work_id, event_json, event_name, active_time_point_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                work_id,
                json,
                event.name(),
                event.active_time_point_id().map(|id| id.to_string()),
                event.at().timestamp_millis(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn events_for_work(&self, work_id: i64) -> Result<Vec<WorkEventRecord>, StorageError> {
        self.query_events(
            "SELECT id, work_id, event_json FROM work_event
             WHERE work_id = ?1
             ORDER BY id ASC",
            params![work_id],
        )
    }

    fn events_for_work_in_period(
        &self,
        work_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WorkEventRecord>, StorageError> {
        self.query_events(
            "SELECT id, work_id, event_json FROM work_event
             WHERE work_id = ?1 AND created_at >= ?2 AND created_at < ?3
             ORDER BY id ASC",
            params![work_id, from.timestamp_millis(), to.timestamp_millis()],
        )
    }

    fn events_in_period(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WorkEventRecord>, StorageError> {
        self.query_events(
            "SELECT id, work_id, event_json FROM work_event
             WHERE created_at >= ?1 AND created_at < ?2
             ORDER BY id ASC",
            params![from.timestamp_millis(), to.timestamp_millis()],
        )
    }

    fn last_event_before(
        &self,
        work_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<WorkEventRecord>, StorageError> {
        let raw = self
            .conn()
            .query_row(
                "SELECT id, work_id, event_json FROM work_event
                 WHERE work_id = ?1 AND created_at < ?2
                 ORDER BY id DESC
                 LIMIT 1",
                params![work_id, at.timestamp_millis()],
                raw_event,
            )
            .optional()?;
        raw.map(|(id, work_id, json)| decode_event(id, work_id, &json))
            .transpose()
    }
}

impl ActiveTimePointRepository for Database {
    fn insert_active_time_point(
        &self,
        atp: &ActiveTimePoint,
        cancel: &CancellationToken,
    ) -> Result<(), StorageError> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let row = atp_to_row(atp);
        self.conn().execute(
            "INSERT INTO active_time_point
                (id, original_id, name, kind, kind_alias, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![row.0, row.1, row.2, row.3, row.4, row.5, row.6],
        )?;
        Ok(())
    }

    fn active_time_point(
        &self,
        id: ActiveTimePointId,
    ) -> Result<Option<ActiveTimePoint>, StorageError> {
        let raw = self
            .conn()
            .query_row(
                "SELECT id, original_id, name, kind, kind_alias, duration_ms, created_at
                 FROM active_time_point WHERE id = ?1",
                params![id.to_string()],
                raw_atp,
            )
            .optional()?;
        raw.map(atp_from_row).transpose()
    }

    fn active_time_points(&self) -> Result<Vec<ActiveTimePoint>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, original_id, name, kind, kind_alias, duration_ms, created_at
             FROM active_time_point ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], raw_atp)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(atp_from_row(row?)?);
        }
        Ok(out)
    }
}

impl WorkRepository for Database {
    fn create_work(&self, number: Option<&str>, title: &str) -> Result<Work, StorageError> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO work (number, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![number, title, now],
        )?;
        let id = conn.last_insert_rowid();
        work_from_raw((id, number.map(str::to_string), title.to_string(), now, now))
    }

    fn work(&self, id: i64) -> Result<Option<Work>, StorageError> {
        let raw = self
            .conn()
            .query_row(
                "SELECT id, number, title, created_at, updated_at FROM work WHERE id = ?1",
                params![id],
                work_from_row,
            )
            .optional()?;
        raw.map(work_from_raw).transpose()
    }

    fn works(&self) -> Result<Vec<Work>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, number, title, created_at, updated_at FROM work ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], work_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(work_from_raw(row?)?);
        }
        Ok(out)
    }

    fn update_work(&self, id: i64, number: Option<&str>, title: &str) -> Result<Work, StorageError> {
        let now = Utc::now().timestamp_millis();
        let changed = self.conn().execute(
            "UPDATE work SET number = ?1, title = ?2, updated_at = ?3 WHERE id = ?4",
            params![number, title, now, id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound {
                entity: "work",
                id: id.to_string(),
            });
        }
        self.work(id)?.ok_or_else(|| StorageError::NotFound {
            entity: "work",
            id: id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap()
    }

    fn focus(at: DateTime<Utc>) -> ActiveTimePoint {
        ActiveTimePoint::from_time_point(&TimePoint::new("Focus 1", Kind::Work, 25 * 60), at)
    }

    #[test]
    fn events_read_back_in_insertion_order() {
        let db = Database::open_memory().unwrap();
        let work = db.create_work(Some("7"), "Write report").unwrap();
        let token = CancellationToken::new();
        let atp = focus(t0());

        let events = vec![
            WorkEvent::started(&atp, t0()),
            WorkEvent::adjusted(&atp, t0() + Duration::minutes(1), 60_000, true),
            WorkEvent::Stopped { at: t0() + Duration::minutes(10) },
        ];
        let mut ids = Vec::new();
        for ev in &events {
            ids.push(db.insert_event(work.id, ev, &token).unwrap());
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let stored: Vec<_> = db
            .events_for_work(work.id)
            .unwrap()
            .into_iter()
            .map(|r| r.event)
            .collect();
        assert_eq!(stored, events);
    }

    #[test]
    fn cancelled_token_refuses_insert() {
        let db = Database::open_memory().unwrap();
        let work = db.create_work(None, "w").unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let err = db
            .insert_event(work.id, &WorkEvent::Stopped { at: t0() }, &token)
            .unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
        assert!(matches!(
            db.insert_active_time_point(&focus(t0()), &token),
            Err(StorageError::Cancelled)
        ));
        assert!(db.events_for_work(work.id).unwrap().is_empty());
    }

    #[test]
    fn period_queries_are_half_open() {
        let db = Database::open_memory().unwrap();
        let a = db.create_work(None, "a").unwrap();
        let b = db.create_work(None, "b").unwrap();
        let token = CancellationToken::new();

        for (work, min) in [(a.id, 0), (b.id, 30), (a.id, 60), (a.id, 90)] {
            db.insert_event(
                work,
                &WorkEvent::Stopped { at: t0() + Duration::minutes(min) },
                &token,
            )
            .unwrap();
        }

        let from = t0() + Duration::minutes(30);
        let to = t0() + Duration::minutes(90);
        assert_eq!(db.events_in_period(from, to).unwrap().len(), 2);
        assert_eq!(db.events_for_work_in_period(a.id, from, to).unwrap().len(), 1);

        let last = db.last_event_before(a.id, from).unwrap().unwrap();
        assert_eq!(last.event.at(), t0());
        assert!(db.last_event_before(b.id, from).unwrap().is_none());
    }

    #[test]
    fn active_time_points_round_trip() {
        let db = Database::open_memory().unwrap();
        let token = CancellationToken::new();
        let atp = focus(t0());
        db.insert_active_time_point(&atp, &token).unwrap();

        assert_eq!(db.active_time_point(atp.id).unwrap(), Some(atp.clone()));
        assert_eq!(db.active_time_points().unwrap(), vec![atp]);
        assert!(db
            .active_time_point(ActiveTimePointId::unknown())
            .unwrap()
            .is_none());
    }

    #[test]
    fn duplicate_active_time_point_is_rejected() {
        let db = Database::open_memory().unwrap();
        let token = CancellationToken::new();
        let atp = focus(t0());
        db.insert_active_time_point(&atp, &token).unwrap();
        assert!(db.insert_active_time_point(&atp, &token).is_err());
    }

    #[test]
    fn work_update_and_missing() {
        let db = Database::open_memory().unwrap();
        let work = db.create_work(Some("1"), "Draft").unwrap();
        let updated = db.update_work(work.id, None, "Final").unwrap();
        assert_eq!(updated.title, "Final");
        assert_eq!(updated.number, None);
        assert_eq!(db.works().unwrap().len(), 1);

        assert!(matches!(
            db.update_work(99, None, "x"),
            Err(StorageError::NotFound { entity: "work", .. })
        ));
        assert!(db.work(99).unwrap().is_none());
    }

    #[test]
    fn event_for_unknown_work_fails() {
        let db = Database::open_memory().unwrap();
        let token = CancellationToken::new();
        assert!(db
            .insert_event(404, &WorkEvent::Stopped { at: t0() }, &token)
            .is_err());
    }

    #[test]
    fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pomoloop.db");
        let token = CancellationToken::new();
        {
            let db = Database::open_at(&path, &default_time_points()).unwrap();
            let work = db.create_work(None, "w").unwrap();
            db.insert_event(work.id, &WorkEvent::Stopped { at: t0() }, &token)
                .unwrap();
        }
        let db = Database::open_at(&path, &default_time_points()).unwrap();
        assert_eq!(db.events_for_work(1).unwrap().len(), 1);
        assert_eq!(db.schema_version(), migrations::SCHEMA_VERSION);
    }
}
