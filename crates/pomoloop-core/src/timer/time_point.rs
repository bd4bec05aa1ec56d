use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;

/// Stable identity of a configured time point.
pub type TimePointId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Work,
    Break,
    LongBreak,
}

impl Kind {
    pub fn is_break(self) -> bool {
        matches!(self, Kind::Break | Kind::LongBreak)
    }

    pub fn default_alias(self) -> &'static str {
        match self {
            Kind::Work => "w",
            Kind::Break => "b",
            Kind::LongBreak => "lb",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Work => "work",
            Kind::Break => "break",
            Kind::LongBreak => "long_break",
        };
        f.write_str(s)
    }
}

/// Immutable interval template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePoint {
    pub id: TimePointId,
    pub name: String,
    pub kind: Kind,
    /// Short code, e.g. `w` or `lb`.
    pub alias: String,
    pub duration_secs: u64,
}

impl TimePoint {
    pub fn new(name: impl Into<String>, kind: Kind, duration_secs: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            alias: kind.default_alias().to_string(),
            duration_secs,
        }
    }

    /// Get duration in milliseconds.
    ///
    /// Uses saturating arithmetic to prevent overflow with large values.
    pub fn duration_ms(&self) -> u64 {
        self.duration_secs.saturating_mul(1000)
    }
}

/// Per-kind defaults used when expanding patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePointPrototype {
    pub kind: Kind,
    pub name: String,
    pub alias: String,
    pub duration_secs: u64,
}

impl TimePointPrototype {
    pub fn defaults() -> Vec<TimePointPrototype> {
        vec![
            TimePointPrototype {
                kind: Kind::Work,
                name: "Focus".into(),
                alias: Kind::Work.default_alias().into(),
                duration_secs: 25 * 60,
            },
            TimePointPrototype {
                kind: Kind::Break,
                name: "Break".into(),
                alias: Kind::Break.default_alias().into(),
                duration_secs: 5 * 60,
            },
            TimePointPrototype {
                kind: Kind::LongBreak,
                name: "Long Break".into(),
                alias: Kind::LongBreak.default_alias().into(),
                duration_secs: 20 * 60,
            },
        ]
    }
}

/// Check a time point list before it reaches a queue.
///
/// # Errors
/// Returns `ConfigError::InvalidTimePoints` for empty names, zero durations
/// or duplicated ids.
pub fn validate_time_points(time_points: &[TimePoint]) -> Result<(), ConfigError> {
    let mut seen = HashSet::with_capacity(time_points.len());
    for (i, tp) in time_points.iter().enumerate() {
        if tp.name.trim().is_empty() {
            return Err(ConfigError::InvalidTimePoints(format!(
                "time point #{i} has an empty name"
            )));
        }
        if tp.duration_secs == 0 {
            return Err(ConfigError::InvalidTimePoints(format!(
                "time point '{}' has zero duration",
                tp.name
            )));
        }
        if !seen.insert(tp.id) {
            return Err(ConfigError::InvalidTimePoints(format!(
                "time point id {} is used twice",
                tp.id
            )));
        }
    }
    Ok(())
}

/// Identity of one running instance of a time point.
///
/// The nil UUID is reserved for "unknown", used when a legacy ledger row
/// cannot be matched to a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActiveTimePointId(pub Uuid);

#[allow(clippy::new_without_default)]
impl ActiveTimePointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn unknown() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_unknown(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for ActiveTimePointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A time point as it was when an interval was opened.
///
/// Historical record: persisted once and never changed afterwards, even if the
/// prototype is edited or removed. `original_id` is a lookup key only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTimePoint {
    pub id: ActiveTimePointId,
    pub original_id: TimePointId,
    pub name: String,
    pub kind: Kind,
    pub kind_alias: String,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl ActiveTimePoint {
    pub fn from_time_point(tp: &TimePoint, created_at: DateTime<Utc>) -> Self {
        Self {
            id: ActiveTimePointId::new(),
            original_id: tp.id,
            name: tp.name.clone(),
            kind: tp.kind,
            kind_alias: tp.alias.clone(),
            duration_ms: tp.duration_ms(),
            created_at,
        }
    }
}

/// The default cycle: three focus/break pairs, a focus and a long break.
pub fn default_time_points() -> Vec<TimePoint> {
    let mut out = Vec::with_capacity(8);
    for i in 1..=4 {
        out.push(TimePoint::new(format!("Focus {i}"), Kind::Work, 25 * 60));
        if i < 4 {
            out.push(TimePoint::new(format!("Break {i}"), Kind::Break, 5 * 60));
        }
    }
    out.push(TimePoint::new("Long Break", Kind::LongBreak, 20 * 60));
    out
}
