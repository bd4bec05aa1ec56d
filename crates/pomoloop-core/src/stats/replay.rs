//! Replay: fold a work event stream into elapsed time.
//!
//! The reducer keeps at most one open interval. A started event closes it
//! and opens the next, `Stopped` closes it, and adjustments only touch the
//! open interval's planned duration. Elapsed time is measured between event
//! timestamps, so pauses (recorded as `Stopped` then a started event for the
//! same interval) are excluded.
//!
//! Events that do not fit the current state are logged and collected as
//! [`ReplayInconsistency`] values; the reduction never fails.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ReplayInconsistency;
use crate::events::WorkEvent;
use crate::timer::{ActiveTimePoint, ActiveTimePointId};

/// Work or break, as the ledger records it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalKind {
    Work,
    Break,
}

/// One interval as reconstructed from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSummary {
    pub active_time_point_id: ActiveTimePointId,
    pub kind: IntervalKind,
    pub name: String,
    pub started_at: DateTime<Utc>,
    /// `None` while the interval is still open.
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    /// Sum of increases minus reductions.
    pub adjustment_ms: i64,
    /// Stored duration plus adjustments, when the interval is in the catalog.
    pub planned_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayTotals {
    pub work_ms: u64,
    pub break_ms: u64,
}

impl ReplayTotals {
    fn add(&mut self, kind: IntervalKind, ms: u64) {
        match kind {
            IntervalKind::Work => self.work_ms = self.work_ms.saturating_add(ms),
            IntervalKind::Break => self.break_ms = self.break_ms.saturating_add(ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub totals: ReplayTotals,
    pub intervals: Vec<IntervalSummary>,
    pub inconsistencies: Vec<ReplayInconsistency>,
}

#[derive(Debug, Clone)]
struct Open {
    kind: IntervalKind,
    /// Start of the current segment.
    since: DateTime<Utc>,
    /// Index into `intervals`.
    summary: usize,
}

/// Incremental reducer. Feed events in ledger order, then [`finish`](Self::finish).
#[derive(Debug, Default)]
pub struct Replay {
    catalog: HashMap<ActiveTimePointId, u64>,
    open: Option<Open>,
    index: usize,
    report: ReplayReport,
}

impl Replay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve planned durations through stored active time points.
    pub fn with_catalog<'a>(mut self, catalog: impl IntoIterator<Item = &'a ActiveTimePoint>) -> Self {
        self.catalog = catalog
            .into_iter()
            .map(|atp| (atp.id, atp.duration_ms))
            .collect();
        self
    }

    pub fn apply(&mut self, event: &WorkEvent) {
        let index = self.index;
        self.index += 1;

        match event {
            WorkEvent::WorkStarted { at, time_point_name, active_time_point_id } => {
                self.close(index, *at);
                self.open(IntervalKind::Work, *at, time_point_name, *active_time_point_id);
            }
            WorkEvent::BreakStarted { at, time_point_name, active_time_point_id } => {
                self.close(index, *at);
                self.open(IntervalKind::Break, *at, time_point_name, *active_time_point_id);
            }
            WorkEvent::Stopped { at } => {
                if self.open.is_none() {
                    self.inconsistent(ReplayInconsistency::StopWithoutStart { index });
                }
                self.close(index, *at);
            }
            WorkEvent::WorkIncreased { delta_ms, active_time_point_id, .. } => {
                self.adjust(index, IntervalKind::Work, *active_time_point_id, *delta_ms, true)
            }
            WorkEvent::WorkReduced { delta_ms, active_time_point_id, .. } => {
                self.adjust(index, IntervalKind::Work, *active_time_point_id, *delta_ms, false)
            }
            WorkEvent::BreakIncreased { delta_ms, active_time_point_id, .. } => {
                self.adjust(index, IntervalKind::Break, *active_time_point_id, *delta_ms, true)
            }
            WorkEvent::BreakReduced { delta_ms, active_time_point_id, .. } => {
                self.adjust(index, IntervalKind::Break, *active_time_point_id, *delta_ms, false)
            }
        }
    }

    pub fn apply_all<'a>(&mut self, events: impl IntoIterator<Item = &'a WorkEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    /// End the reduction. With `until`, a still-open interval is closed there;
    /// without it the interval stays open and uncounted.
    pub fn finish(mut self, until: Option<DateTime<Utc>>) -> ReplayReport {
        if let Some(until) = until {
            let index = self.index;
            self.close(index, until);
        }
        for summary in &mut self.report.intervals {
            summary.planned_ms = self.catalog.get(&summary.active_time_point_id).map(|&d| {
                let planned = i64::try_from(d).unwrap_or(i64::MAX).saturating_add(summary.adjustment_ms);
                u64::try_from(planned).unwrap_or(0)
            });
        }
        self.report
    }

    fn open(&mut self, kind: IntervalKind, at: DateTime<Utc>, name: &str, id: ActiveTimePointId) {
        // A resume re-opens the interval it paused.
        let resumed = self.report.intervals.last().is_some_and(|last| {
            !id.is_unknown() && last.active_time_point_id == id && last.kind == kind
        });
        let summary = if resumed {
            let i = self.report.intervals.len() - 1;
            self.report.intervals[i].ended_at = None;
            i
        } else {
            self.report.intervals.push(IntervalSummary {
                active_time_point_id: id,
                kind,
                name: name.to_string(),
                started_at: at,
                ended_at: None,
                elapsed_ms: 0,
                adjustment_ms: 0,
                planned_ms: None,
            });
            self.report.intervals.len() - 1
        };
        self.open = Some(Open { kind, since: at, summary });
    }

    fn close(&mut self, index: usize, at: DateTime<Utc>) {
        let Some(open) = self.open.take() else {
            return;
        };
        let diff = (at - open.since).num_milliseconds();
        if diff < 0 {
            self.inconsistent(ReplayInconsistency::WentBackInTime {
                index,
                by_ms: diff.unsigned_abs(),
            });
        }
        let elapsed = diff.max(0) as u64;
        self.report.totals.add(open.kind, elapsed);
        let summary = &mut self.report.intervals[open.summary];
        summary.elapsed_ms = summary.elapsed_ms.saturating_add(elapsed);
        summary.ended_at = Some(at.max(open.since));
    }

    fn adjust(
        &mut self,
        index: usize,
        kind: IntervalKind,
        id: Option<ActiveTimePointId>,
        delta_ms: u64,
        increase: bool,
    ) {
        let Some((open_kind, slot)) = self.open.as_ref().map(|o| (o.kind, o.summary)) else {
            self.inconsistent(ReplayInconsistency::AdjustmentWithoutStart { index });
            return;
        };
        let open_id = self.report.intervals[slot].active_time_point_id;
        let id_matches = id.map_or(true, |id| id == open_id);
        if open_kind != kind || !id_matches {
            self.inconsistent(ReplayInconsistency::AdjustmentMismatch {
                index,
                active_time_point_id: id,
            });
            return;
        }
        let delta = i64::try_from(delta_ms).unwrap_or(i64::MAX);
        let summary = &mut self.report.intervals[slot];
        summary.adjustment_ms = if increase {
            summary.adjustment_ms.saturating_add(delta)
        } else {
            summary.adjustment_ms.saturating_sub(delta)
        };
    }

    fn inconsistent(&mut self, inconsistency: ReplayInconsistency) {
        warn!(?inconsistency, "replay skipped an inconsistent event");
        self.report.inconsistencies.push(inconsistency);
    }
}

/// Replay a whole stream. Open intervals at the end stay uncounted.
pub fn replay<'a>(events: impl IntoIterator<Item = &'a WorkEvent>) -> ReplayReport {
    let mut replay = Replay::new();
    replay.apply_all(events);
    replay.finish(None)
}
