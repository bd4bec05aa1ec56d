//! Retrofit ActiveTimePoint identities onto legacy ledger rows.
//!
//! Old ledgers stored started events with a time point name only. The
//! backfill walks those rows in time order and assigns ids: a name that
//! matches the catalog opens a new ActiveTimePoint, a repeat of the previous
//! name reuses its id, and anything else gets the nil "unknown" id.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{info, warn};

use super::database::atp_to_row;
use crate::error::StorageError;
use crate::events::WorkEvent;
use crate::timer::{ActiveTimePoint, ActiveTimePointId, TimePoint};

/// Outcome of one name lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// A fresh interval; the row must be persisted.
    New(ActiveTimePoint),
    /// Same interval as the previous started event.
    Existing(ActiveTimePointId),
    /// Name not in the catalog.
    Unknown,
}

impl Assignment {
    pub fn id(&self) -> ActiveTimePointId {
        match self {
            Assignment::New(atp) => atp.id,
            Assignment::Existing(id) => *id,
            Assignment::Unknown => ActiveTimePointId::unknown(),
        }
    }
}

pub struct Backfill<'a> {
    catalog: HashMap<&'a str, &'a TimePoint>,
    last: Option<(String, ActiveTimePointId)>,
}

impl<'a> Backfill<'a> {
    pub fn new(catalog: &'a [TimePoint]) -> Self {
        Self {
            catalog: catalog.iter().map(|tp| (tp.name.as_str(), tp)).collect(),
            last: None,
        }
    }

    /// Assign an id to the next started event, in time order.
    ///
    /// An unknown name does not interrupt a run: the event after it still
    /// reuses the previous id when the names match.
    pub fn assign(&mut self, name: &str, at: DateTime<Utc>) -> Assignment {
        if let Some((last_name, id)) = &self.last {
            if last_name == name {
                return Assignment::Existing(*id);
            }
        }
        match self.catalog.get(name) {
            Some(tp) => {
                let atp = ActiveTimePoint::from_time_point(tp, at);
                self.last = Some((atp.name.clone(), atp.id));
                Assignment::New(atp)
            }
            None => Assignment::Unknown,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillSummary {
    pub created: usize,
    pub reused: usize,
    pub unknown: usize,
    pub adjustments: usize,
    pub skipped: usize,
}

/// Rewrite every started row that has no `active_time_point_id`, then give
/// legacy adjustment rows an explicit null id.
///
/// Runs inside the caller's transaction.
pub fn backfill_legacy_rows(
    conn: &Connection,
    catalog: &[TimePoint],
) -> Result<BackfillSummary, StorageError> {
    let mut summary = BackfillSummary::default();
    let mut backfill = Backfill::new(catalog);

    let rows: Vec<(i64, String, i64)> = {
        let mut stmt = conn.prepare(
            "SELECT id, event_json, created_at FROM work_event
             WHERE active_time_point_id IS NULL
               AND event_name IN ('WorkStarted', 'BreakStarted')
             ORDER BY created_at ASC, id ASC",
        )?;
        let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        mapped.collect::<Result<_, _>>()?
    };

    for (id, json, created_at) in rows {
        let event: WorkEvent = match serde_json::from_str(&json) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(row = id, error = %e, "skipping undecodable legacy row");
                summary.skipped += 1;
                continue;
            }
        };
        let (at, name) = match &event {
            WorkEvent::WorkStarted { at, time_point_name, .. }
            | WorkEvent::BreakStarted { at, time_point_name, .. } => (*at, time_point_name.clone()),
            _ => {
                summary.skipped += 1;
                continue;
            }
        };
        if at.timestamp_millis() != created_at {
            warn!(row = id, "legacy row timestamp differs from its column");
        }

        let assignment = backfill.assign(&name, at);
        match &assignment {
            Assignment::New(atp) => {
                let row = atp_to_row(atp);
                conn.execute(
                    "INSERT INTO active_time_point
                        (id, original_id, name, kind, kind_alias, duration_ms, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![row.0, row.1, row.2, row.3, row.4, row.5, row.6],
                )?;
                summary.created += 1;
            }
            Assignment::Existing(_) => summary.reused += 1,
            Assignment::Unknown => summary.unknown += 1,
        }

        let atp_id = assignment.id();
        let rewritten = match event {
            WorkEvent::WorkStarted { at, time_point_name, .. } => WorkEvent::WorkStarted {
                at,
                time_point_name,
                active_time_point_id: atp_id,
            },
            WorkEvent::BreakStarted { at, time_point_name, .. } => WorkEvent::BreakStarted {
                at,
                time_point_name,
                active_time_point_id: atp_id,
            },
            other => other,
        };
        let json = serde_json::to_string(&rewritten)
            .map_err(|e| StorageError::CorruptRow { id, message: e.to_string() })?;
        conn.execute(
            "UPDATE work_event SET event_json = ?1, active_time_point_id = ?2 WHERE id = ?3",
            params![json, atp_id.to_string(), id],
        )?;
    }

    summary.adjustments = conn.execute(
        "UPDATE work_event
         SET event_json = json_set(event_json, '$.active_time_point_id', json('null'))
         WHERE event_name IN ('WorkIncreased', 'WorkReduced', 'BreakIncreased', 'BreakReduced')
           AND json_type(event_json, '$.active_time_point_id') IS NULL",
        [],
    )?;

    info!(
        created = summary.created,
        reused = summary.reused,
        unknown = summary.unknown,
        adjustments = summary.adjustments,
        skipped = summary.skipped,
        "legacy ledger backfilled"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::default_time_points;
    use chrono::TimeZone;

    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + chrono::Duration::minutes(min)
    }

    #[test]
    fn consecutive_same_name_shares_id() {
        let catalog = default_time_points();
        let mut b = Backfill::new(&catalog);

        let first = b.assign("Focus 1", t(0));
        let again = b.assign("Focus 1", t(10));
        assert!(matches!(first, Assignment::New(_)));
        assert_eq!(again, Assignment::Existing(first.id()));
    }

    #[test]
    fn different_name_opens_new_interval() {
        let catalog = default_time_points();
        let mut b = Backfill::new(&catalog);

        let focus = b.assign("Focus 1", t(0));
        let brk = b.assign("Break 1", t(25));
        assert_ne!(focus.id(), brk.id());
        match brk {
            Assignment::New(atp) => {
                assert_eq!(atp.name, "Break 1");
                assert_eq!(atp.created_at, t(25));
            }
            other => panic!("expected new interval, got {other:?}"),
        }
    }

    #[test]
    fn unknown_name_gets_nil_id_and_keeps_run() {
        let catalog = default_time_points();
        let mut b = Backfill::new(&catalog);

        let focus = b.assign("Focus 1", t(0));
        let odd = b.assign("Deep Work", t(5));
        assert_eq!(odd, Assignment::Unknown);
        assert!(odd.id().is_unknown());
        assert_eq!(b.assign("Focus 1", t(6)), Assignment::Existing(focus.id()));
    }

    #[test]
    fn empty_catalog_assigns_unknown() {
        let mut b = Backfill::new(&[]);
        assert_eq!(b.assign("Focus 1", t(0)), Assignment::Unknown);
        assert_eq!(b.assign("Focus 1", t(1)), Assignment::Unknown);
    }
}
