//! # Pomoloop Core Library
//!
//! This library provides the core logic for the Pomoloop interval timer: a
//! looping cycle of work and break intervals whose every lifecycle transition
//! is appended to a per-work-item ledger, and a replay that turns that ledger
//! back into time actually spent.
//!
//! ## Architecture
//!
//! - **Looper**: A wall-clock-based state machine over a cursor-addressed
//!   queue of time points. The caller passes `now` to every command and
//!   invokes `tick()` periodically
//! - **LooperService**: Lock-guarded monitor around the looper with a tokio
//!   ticker and an asynchronous ledger writer
//! - **Storage**: SQLite ledger of work events and active time points, and
//!   TOML-based configuration
//! - **Stats**: Pure replay of the ledger into elapsed work and break time
//!
//! ## Key Components
//!
//! - [`Looper`]: Interval scheduler state machine
//! - [`LooperRuntime`]: Looper plus its background tasks
//! - [`Database`]: Ledger persistence
//! - [`Config`]: Application configuration management
//! - [`Replay`]: Ledger reducer

pub mod error;
pub mod events;
pub mod notice;
pub mod stats;
pub mod storage;
pub mod timer;

pub use error::{ConfigError, CoreError, LooperError, ReplayInconsistency, Result, StorageError};
pub use events::{LooperEvent, WorkEvent};
pub use notice::{ErrorNotices, Notice};
pub use stats::{replay, IntervalSummary, PeriodStatistics, Replay, ReplayReport, WorkStatistic};
pub use storage::{Config, Database, TimePointSettings, Work, WorkEventRecord};
pub use timer::{
    ActiveTimePoint, ActiveTimePointId, Clock, Kind, Looper, LooperRuntime, LooperService,
    LooperState, SystemClock, TimePoint, TimePointQueue,
};
