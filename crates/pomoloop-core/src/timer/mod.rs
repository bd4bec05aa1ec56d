mod clock;
mod looper;
pub mod pattern;
mod queue;
mod service;
mod time_point;

pub use clock::{Clock, ManualClock, SystemClock};
pub use looper::{LedgerRecord, Looper, LooperState, Outcome};
pub use queue::TimePointQueue;
pub use service::{LooperRuntime, LooperService};
pub use time_point::{
    default_time_points, validate_time_points, ActiveTimePoint, ActiveTimePointId, Kind,
    TimePoint, TimePointId, TimePointPrototype,
};
