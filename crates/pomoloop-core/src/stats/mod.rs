//! Statistics module for pomoloop
//!
//! Replays the work event ledger into elapsed work and break time, per
//! interval, per work item and per period.

mod period;
mod replay;

pub use period::{period_statistics, work_report, work_statistic, PeriodStatistics, WorkStatistic};
pub use replay::{replay, IntervalKind, IntervalSummary, Replay, ReplayReport, ReplayTotals};
