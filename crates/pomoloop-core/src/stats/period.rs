//! Elapsed time per work item inside a period.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::replay::{IntervalKind, Replay, ReplayReport};
use crate::error::StorageError;
use crate::events::WorkEvent;
use crate::storage::WorkEventRepository;
use crate::timer::{ActiveTimePoint, ActiveTimePointId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkStatistic {
    pub work_id: i64,
    pub work_ms: u64,
    pub break_ms: u64,
    /// Intervals that overlap the period.
    pub work_intervals: usize,
    pub break_intervals: usize,
    pub inconsistencies: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodStatistics {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub works: Vec<WorkStatistic>,
    pub total_work_ms: u64,
    pub total_break_ms: u64,
}

/// The started event an interval open at `from` would have had, moved to `from`.
fn seed_at(previous: &WorkEvent, from: DateTime<Utc>) -> Option<WorkEvent> {
    match previous {
        WorkEvent::WorkStarted { time_point_name, active_time_point_id, .. } => {
            Some(WorkEvent::WorkStarted {
                at: from,
                time_point_name: time_point_name.clone(),
                active_time_point_id: *active_time_point_id,
            })
        }
        WorkEvent::BreakStarted { time_point_name, active_time_point_id, .. } => {
            Some(WorkEvent::BreakStarted {
                at: from,
                time_point_name: time_point_name.clone(),
                active_time_point_id: *active_time_point_id,
            })
        }
        WorkEvent::WorkIncreased { active_time_point_id, .. }
        | WorkEvent::WorkReduced { active_time_point_id, .. } => Some(WorkEvent::WorkStarted {
            at: from,
            time_point_name: String::new(),
            active_time_point_id: active_time_point_id.unwrap_or(ActiveTimePointId::unknown()),
        }),
        WorkEvent::BreakIncreased { active_time_point_id, .. }
        | WorkEvent::BreakReduced { active_time_point_id, .. } => Some(WorkEvent::BreakStarted {
            at: from,
            time_point_name: String::new(),
            active_time_point_id: active_time_point_id.unwrap_or(ActiveTimePointId::unknown()),
        }),
        WorkEvent::Stopped { .. } => None,
    }
}

/// Replay one work's events inside `[from, to)`.
///
/// An interval already open at `from` counts from `from`; one still open at
/// the end counts up to `to`.
pub fn work_report<R: WorkEventRepository + ?Sized>(
    repo: &R,
    work_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    catalog: &[ActiveTimePoint],
) -> Result<ReplayReport, StorageError> {
    let mut replay = Replay::new().with_catalog(catalog);
    if let Some(previous) = repo.last_event_before(work_id, from)? {
        if let Some(seed) = seed_at(&previous.event, from) {
            replay.apply(&seed);
        }
    }
    let records = repo.events_for_work_in_period(work_id, from, to)?;
    replay.apply_all(records.iter().map(|r| &r.event));
    Ok(replay.finish(Some(to)))
}

pub fn work_statistic<R: WorkEventRepository + ?Sized>(
    repo: &R,
    work_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<WorkStatistic, StorageError> {
    let report = work_report(repo, work_id, from, to, &[])?;
    let count = |kind: IntervalKind| report.intervals.iter().filter(|i| i.kind == kind).count();
    Ok(WorkStatistic {
        work_id,
        work_ms: report.totals.work_ms,
        break_ms: report.totals.break_ms,
        work_intervals: count(IntervalKind::Work),
        break_intervals: count(IntervalKind::Break),
        inconsistencies: report.inconsistencies.len(),
    })
}

/// Statistics for every listed work. Works with nothing in the period are
/// left out.
pub fn period_statistics<R: WorkEventRepository + ?Sized>(
    repo: &R,
    work_ids: impl IntoIterator<Item = i64>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<PeriodStatistics, StorageError> {
    let mut works = Vec::new();
    for work_id in work_ids {
        let stat = work_statistic(repo, work_id, from, to)?;
        if stat.work_intervals + stat.break_intervals > 0 {
            works.push(stat);
        }
    }
    let total_work_ms = works.iter().map(|w| w.work_ms).sum();
    let total_break_ms = works.iter().map(|w| w.break_ms).sum();
    Ok(PeriodStatistics {
        from,
        to,
        works,
        total_work_ms,
        total_break_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, WorkRepository};
    use crate::timer::{Kind, TimePoint};
    use chrono::{Duration, TimeZone};
    use tokio_util::sync::CancellationToken;

    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap() + Duration::minutes(min)
    }

    #[test]
    fn interval_open_at_period_start_is_clipped() {
        let db = Database::open_memory().unwrap();
        let work = db.create_work(None, "Report").unwrap();
        let token = CancellationToken::new();
        let focus = ActiveTimePoint::from_time_point(&TimePoint::new("Focus", Kind::Work, 1500), t(0));
        let brk = ActiveTimePoint::from_time_point(&TimePoint::new("Break", Kind::Break, 300), t(25));

        for ev in [
            WorkEvent::started(&focus, t(0)),
            WorkEvent::started(&brk, t(25)),
            WorkEvent::Stopped { at: t(30) },
        ] {
            db.insert_event(work.id, &ev, &token).unwrap();
        }

        let stat = work_statistic(&db, work.id, t(10), t(27)).unwrap();
        assert_eq!(stat.work_ms, 15 * 60_000);
        assert_eq!(stat.break_ms, 2 * 60_000);
        assert_eq!(stat.work_intervals, 1);
        assert_eq!(stat.break_intervals, 1);
    }

    #[test]
    fn period_totals_sum_works_and_skip_idle_ones() {
        let db = Database::open_memory().unwrap();
        let a = db.create_work(None, "a").unwrap();
        let b = db.create_work(None, "b").unwrap();
        let idle = db.create_work(None, "idle").unwrap();
        let token = CancellationToken::new();
        let focus = ActiveTimePoint::from_time_point(&TimePoint::new("Focus", Kind::Work, 1500), t(0));

        db.insert_event(a.id, &WorkEvent::started(&focus, t(0)), &token).unwrap();
        db.insert_event(a.id, &WorkEvent::Stopped { at: t(10) }, &token).unwrap();
        db.insert_event(b.id, &WorkEvent::started(&focus, t(10)), &token).unwrap();
        db.insert_event(b.id, &WorkEvent::Stopped { at: t(25) }, &token).unwrap();

        let stats = period_statistics(&db, [a.id, b.id, idle.id], t(0), t(60)).unwrap();
        assert_eq!(stats.works.len(), 2);
        assert_eq!(stats.total_work_ms, 25 * 60_000);
        assert_eq!(stats.total_break_ms, 0);
    }
}
