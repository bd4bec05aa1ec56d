use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::{ActiveTimePoint, ActiveTimePointId, Kind, LooperState};

/// One lifecycle transition in a work item's ledger.
///
/// Stored append-only; the order of a work's events is the order they
/// happened in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkEvent {
    WorkStarted {
        at: DateTime<Utc>,
        time_point_name: String,
        /// Nil for legacy rows that were never backfilled.
        #[serde(default = "ActiveTimePointId::unknown")]
        active_time_point_id: ActiveTimePointId,
    },
    BreakStarted {
        at: DateTime<Utc>,
        time_point_name: String,
        #[serde(default = "ActiveTimePointId::unknown")]
        active_time_point_id: ActiveTimePointId,
    },
    Stopped {
        at: DateTime<Utc>,
    },
    WorkIncreased {
        at: DateTime<Utc>,
        delta_ms: u64,
        #[serde(default)]
        active_time_point_id: Option<ActiveTimePointId>,
    },
    WorkReduced {
        at: DateTime<Utc>,
        delta_ms: u64,
        #[serde(default)]
        active_time_point_id: Option<ActiveTimePointId>,
    },
    BreakIncreased {
        at: DateTime<Utc>,
        delta_ms: u64,
        #[serde(default)]
        active_time_point_id: Option<ActiveTimePointId>,
    },
    BreakReduced {
        at: DateTime<Utc>,
        delta_ms: u64,
        #[serde(default)]
        active_time_point_id: Option<ActiveTimePointId>,
    },
}

impl WorkEvent {
    /// The started event for an interval, picked by its kind.
    pub fn started(atp: &ActiveTimePoint, at: DateTime<Utc>) -> Self {
        if atp.kind.is_break() {
            WorkEvent::BreakStarted {
                at,
                time_point_name: atp.name.clone(),
                active_time_point_id: atp.id,
            }
        } else {
            WorkEvent::WorkStarted {
                at,
                time_point_name: atp.name.clone(),
                active_time_point_id: atp.id,
            }
        }
    }

    /// Signed duration adjustment: positive deltas increase.
    pub fn adjusted(atp: &ActiveTimePoint, at: DateTime<Utc>, delta_ms: u64, increase: bool) -> Self {
        let active_time_point_id = Some(atp.id);
        match (atp.kind.is_break(), increase) {
            (false, true) => WorkEvent::WorkIncreased { at, delta_ms, active_time_point_id },
            (false, false) => WorkEvent::WorkReduced { at, delta_ms, active_time_point_id },
            (true, true) => WorkEvent::BreakIncreased { at, delta_ms, active_time_point_id },
            (true, false) => WorkEvent::BreakReduced { at, delta_ms, active_time_point_id },
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            WorkEvent::WorkStarted { at, .. }
            | WorkEvent::BreakStarted { at, .. }
            | WorkEvent::Stopped { at }
            | WorkEvent::WorkIncreased { at, .. }
            | WorkEvent::WorkReduced { at, .. }
            | WorkEvent::BreakIncreased { at, .. }
            | WorkEvent::BreakReduced { at, .. } => *at,
        }
    }

    /// Variant name, stored in its own column for filtering.
    pub fn name(&self) -> &'static str {
        match self {
            WorkEvent::WorkStarted { .. } => "WorkStarted",
            WorkEvent::BreakStarted { .. } => "BreakStarted",
            WorkEvent::Stopped { .. } => "Stopped",
            WorkEvent::WorkIncreased { .. } => "WorkIncreased",
            WorkEvent::WorkReduced { .. } => "WorkReduced",
            WorkEvent::BreakIncreased { .. } => "BreakIncreased",
            WorkEvent::BreakReduced { .. } => "BreakReduced",
        }
    }

    /// The interval this event belongs to, if it names one.
    pub fn active_time_point_id(&self) -> Option<ActiveTimePointId> {
        match self {
            WorkEvent::WorkStarted { active_time_point_id, .. }
            | WorkEvent::BreakStarted { active_time_point_id, .. } => Some(*active_time_point_id),
            WorkEvent::WorkIncreased { active_time_point_id, .. }
            | WorkEvent::WorkReduced { active_time_point_id, .. }
            | WorkEvent::BreakIncreased { active_time_point_id, .. }
            | WorkEvent::BreakReduced { active_time_point_id, .. } => *active_time_point_id,
            WorkEvent::Stopped { .. } => None,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, WorkEvent::WorkStarted { .. } | WorkEvent::BreakStarted { .. })
    }
}

/// Notifications for UI subscribers.
///
/// These are not persisted; the ledger gets [`WorkEvent`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LooperEvent {
    TimePointStarted {
        active: ActiveTimePoint,
        cursor: usize,
        at: DateTime<Utc>,
    },
    Tick {
        active_time_point_id: ActiveTimePointId,
        kind: Kind,
        remaining_ms: u64,
        elapsed_ms: u64,
        at: DateTime<Utc>,
    },
    Paused {
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    Resumed {
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    Stopped {
        /// True when the cycle ended on its own (wrap-around off).
        cycle_finished: bool,
        at: DateTime<Utc>,
    },
    DurationAdjusted {
        active_time_point_id: ActiveTimePointId,
        duration_ms: u64,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    WorkChanged {
        work_id: Option<i64>,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        state: LooperState,
        cursor: usize,
        active: Option<ActiveTimePoint>,
        remaining_ms: u64,
        elapsed_ms: u64,
        work_id: Option<i64>,
        at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{Kind, TimePoint};

    #[test]
    fn started_event_follows_kind() {
        let now = Utc::now();
        let work = ActiveTimePoint::from_time_point(&TimePoint::new("Focus", Kind::Work, 60), now);
        let long = ActiveTimePoint::from_time_point(&TimePoint::new("Long", Kind::LongBreak, 60), now);
        assert_eq!(WorkEvent::started(&work, now).name(), "WorkStarted");
        assert_eq!(WorkEvent::started(&long, now).name(), "BreakStarted");
    }

    #[test]
    fn legacy_started_row_gets_unknown_id() {
        let json = r#"{"type":"WorkStarted","at":"2024-03-01T09:00:00Z","time_point_name":"Focus 1"}"#;
        let ev: WorkEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.active_time_point_id(), Some(ActiveTimePointId::unknown()));
    }

    #[test]
    fn legacy_adjustment_row_has_no_id() {
        let json = r#"{"type":"BreakReduced","at":"2024-03-01T09:00:00Z","delta_ms":60000}"#;
        let ev: WorkEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.active_time_point_id(), None);
        assert_eq!(ev.name(), "BreakReduced");
    }
}
