//! Looper: the interval scheduler state machine.
//!
//! The looper is a wall-clock-based state machine. It has no thread and never
//! reads the clock itself: every command takes `now`, and the caller is
//! responsible for calling `tick()` periodically (see
//! [`LooperService`](super::LooperService) for the threaded wrapper).
//!
//! ## State Transitions
//!
//! ```text
//! Stopped -> Running <-> Paused
//! Running -> Running   (expiry or skip opens the next interval)
//! Running | Paused -> Stopped
//! ```
//!
//! Elapsed time is always `now - anchor`, never a decremented counter, so a
//! missed tick or a suspended machine cannot make the countdown drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::clock::{elapsed_ms, ms};
use super::queue::TimePointQueue;
use super::time_point::{ActiveTimePoint, TimePoint, TimePointId};
use crate::error::LooperError;
use crate::events::{LooperEvent, WorkEvent};

/// Upper bound on intervals opened by a single tick when catching up after a
/// long suspend.
const MAX_CATCH_UP: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LooperState {
    Stopped,
    Running,
    Paused,
}

/// Something the ledger writer has to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerRecord {
    ActiveTimePoint(ActiveTimePoint),
    WorkEvent { work_id: i64, event: WorkEvent },
}

/// What a looper command produced, in the order it happened.
#[derive(Debug, Default, Clone)]
pub struct Outcome {
    pub records: Vec<LedgerRecord>,
    pub notifications: Vec<LooperEvent>,
}

impl Outcome {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.notifications.is_empty()
    }

    /// Ledger events only, dropping active time point rows.
    pub fn work_events(&self) -> impl Iterator<Item = &WorkEvent> {
        self.records.iter().filter_map(|r| match r {
            LedgerRecord::WorkEvent { event, .. } => Some(event),
            LedgerRecord::ActiveTimePoint(_) => None,
        })
    }
}

#[derive(Debug, Clone)]
struct OpenInterval {
    active: ActiveTimePoint,
    /// In-flight duration; diverges from `active.duration_ms` after adjustments.
    duration_ms: u64,
    /// Instant the interval would have started had it never been paused.
    anchor: DateTime<Utc>,
    /// Frozen elapsed time while paused.
    paused_elapsed_ms: Option<u64>,
}

impl OpenInterval {
    fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        self.paused_elapsed_ms
            .unwrap_or_else(|| elapsed_ms(self.anchor, now))
    }
}

#[derive(Debug)]
pub struct Looper {
    queue: TimePointQueue,
    state: LooperState,
    open: Option<OpenInterval>,
    work_id: Option<i64>,
    disable_skip_break: bool,
}

impl Looper {
    pub fn new(queue: TimePointQueue) -> Self {
        Self {
            queue,
            state: LooperState::Stopped,
            open: None,
            work_id: None,
            disable_skip_break: false,
        }
    }

    pub fn with_disable_skip_break(mut self, disable: bool) -> Self {
        self.disable_skip_break = disable;
        self
    }

    pub fn with_work(mut self, work_id: Option<i64>) -> Self {
        self.work_id = work_id;
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> LooperState {
        self.state
    }

    pub fn queue(&self) -> &TimePointQueue {
        &self.queue
    }

    pub fn work_id(&self) -> Option<i64> {
        self.work_id
    }

    pub fn active(&self) -> Option<&ActiveTimePoint> {
        self.open.as_ref().map(|o| &o.active)
    }

    /// Current in-flight duration of the open interval.
    pub fn duration_ms(&self) -> u64 {
        self.open.as_ref().map(|o| o.duration_ms).unwrap_or(0)
    }

    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        self.open.as_ref().map(|o| o.elapsed_ms(now)).unwrap_or(0)
    }

    pub fn remaining_ms(&self, now: DateTime<Utc>) -> u64 {
        self.duration_ms().saturating_sub(self.elapsed_ms(now))
    }

    /// Build a full state snapshot event.
    pub fn snapshot(&self, now: DateTime<Utc>) -> LooperEvent {
        LooperEvent::StateSnapshot {
            state: self.state,
            cursor: self.queue.cursor(),
            active: self.active().cloned(),
            remaining_ms: self.remaining_ms(now),
            elapsed_ms: self.elapsed_ms(now).min(self.duration_ms()),
            work_id: self.work_id,
            at: now,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Open an interval for the current time point.
    ///
    /// Starting while paused resumes; starting while running does nothing.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<Outcome, LooperError> {
        match self.state {
            LooperState::Running => Ok(Outcome::default()),
            LooperState::Paused => self.resume(now),
            LooperState::Stopped => {
                let tp = self.queue.current()?.clone();
                let mut out = Outcome::default();
                self.open_interval(&tp, now, &mut out);
                self.state = LooperState::Running;
                info!(time_point = %tp.name, kind = %tp.kind, "looper started");
                Ok(out)
            }
        }
    }

    /// Advance wall-clock time. Transitions on expiry, otherwise reports the
    /// remaining time.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Outcome {
        let mut out = self.catch_up(now);
        if self.state != LooperState::Running {
            return out;
        }
        if let Some(open) = &self.open {
            let elapsed = open.elapsed_ms(now);
            out.notifications.push(LooperEvent::Tick {
                active_time_point_id: open.active.id,
                kind: open.active.kind,
                remaining_ms: open.duration_ms.saturating_sub(elapsed),
                elapsed_ms: elapsed,
                at: now,
            });
        }
        out
    }

    /// Open every interval whose natural expiry lies at or before `now`.
    ///
    /// Every command runs this first, so a command that arrives after a
    /// missed tick acts on the interval that is actually current.
    pub fn catch_up(&mut self, now: DateTime<Utc>) -> Outcome {
        let mut out = Outcome::default();
        if self.state != LooperState::Running {
            return out;
        }

        let mut transitions = 0;
        while let Some(open) = &self.open {
            if open.elapsed_ms(now) < open.duration_ms {
                break;
            }

            // Carry the overshoot into the next interval by anchoring it at
            // the natural expiry instant.
            let expiry = open.anchor + ms(open.duration_ms);
            if !self.advance(expiry, &mut out) {
                break;
            }

            transitions += 1;
            if transitions >= MAX_CATCH_UP {
                warn!(transitions, "catch-up limit reached, re-anchoring at now");
                if let Some(open) = self.open.as_mut() {
                    open.anchor = now;
                }
                break;
            }
        }
        if transitions > 1 {
            debug!(transitions, "crossed several interval boundaries");
        }
        out
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<Outcome, LooperError> {
        match self.state {
            LooperState::Stopped => Err(LooperError::NotActive),
            LooperState::Paused => Ok(Outcome::default()),
            LooperState::Running => {
                let mut out = self.catch_up(now);
                // The cycle may have finished while nobody was ticking.
                let Some(open) = self.open.as_mut() else {
                    return Ok(out);
                };
                let elapsed = open.elapsed_ms(now).min(open.duration_ms);
                open.paused_elapsed_ms = Some(elapsed);
                let remaining = open.duration_ms - elapsed;
                self.state = LooperState::Paused;
                self.record(WorkEvent::Stopped { at: now }, &mut out);
                out.notifications.push(LooperEvent::Paused {
                    remaining_ms: remaining,
                    at: now,
                });
                Ok(out)
            }
        }
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<Outcome, LooperError> {
        match self.state {
            LooperState::Stopped => Err(LooperError::NotActive),
            LooperState::Running => Ok(Outcome::default()),
            LooperState::Paused => {
                let mut out = Outcome::default();
                let open = self.open.as_mut().ok_or(LooperError::NotActive)?;
                let elapsed = open.paused_elapsed_ms.take().unwrap_or(0);
                open.anchor = now - ms(elapsed);
                let remaining = open.duration_ms.saturating_sub(elapsed);
                let started = WorkEvent::started(&open.active, now);
                self.state = LooperState::Running;
                self.record(started, &mut out);
                out.notifications.push(LooperEvent::Resumed {
                    remaining_ms: remaining,
                    at: now,
                });
                Ok(out)
            }
        }
    }

    /// Close the current interval and open the next one, whatever the
    /// elapsed time.
    ///
    /// While stopped this only moves the cursor.
    pub fn skip(&mut self, now: DateTime<Utc>) -> Result<Outcome, LooperError> {
        let mut out = self.catch_up(now);
        if !out.is_empty() && self.state == LooperState::Stopped {
            return Ok(out);
        }
        match self.state {
            LooperState::Stopped => {
                if !self.queue.move_next() {
                    self.queue.reset();
                }
                out.notifications.push(self.snapshot(now));
            }
            LooperState::Running | LooperState::Paused => {
                let kind = self
                    .active()
                    .map(|a| a.kind)
                    .ok_or(LooperError::NotActive)?;
                if self.disable_skip_break && kind.is_break() {
                    return Err(LooperError::SkipBreakDisabled);
                }
                if self.advance(now, &mut out) {
                    self.state = LooperState::Running;
                }
            }
        }
        Ok(out)
    }

    pub fn increase(&mut self, now: DateTime<Utc>, delta_ms: u64) -> Result<Outcome, LooperError> {
        let mut out = self.catch_up(now);
        let open = match self.open.as_mut() {
            Some(open) => open,
            None if !out.is_empty() => return Ok(out),
            None => return Err(LooperError::NotActive),
        };
        if delta_ms == 0 {
            return Ok(out);
        }
        open.duration_ms = open.duration_ms.saturating_add(delta_ms);
        let event = WorkEvent::adjusted(&open.active, now, delta_ms, true);
        let notification = adjusted_notification(open, now);
        self.record(event, &mut out);
        out.notifications.push(notification);
        Ok(out)
    }

    /// Shorten the open interval. The new duration never drops below the
    /// time already spent, so remaining time bottoms out at zero.
    pub fn reduce(&mut self, now: DateTime<Utc>, delta_ms: u64) -> Result<Outcome, LooperError> {
        let mut out = self.catch_up(now);
        let open = match self.open.as_mut() {
            Some(open) => open,
            None if !out.is_empty() => return Ok(out),
            None => return Err(LooperError::NotActive),
        };
        let elapsed = open.elapsed_ms(now);
        let target = open.duration_ms.saturating_sub(delta_ms).max(elapsed);
        let applied = open.duration_ms.saturating_sub(target);
        if applied == 0 {
            return Ok(out);
        }
        open.duration_ms = target;
        let event = WorkEvent::adjusted(&open.active, now, applied, false);
        let notification = adjusted_notification(open, now);
        self.record(event, &mut out);
        out.notifications.push(notification);
        Ok(out)
    }

    /// Manual termination. The cursor stays where it is.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Outcome {
        let mut out = self.catch_up(now);
        match self.state {
            LooperState::Stopped => {}
            LooperState::Running | LooperState::Paused => {
                // A paused interval already has its `Stopped` in the ledger.
                if self.state == LooperState::Running {
                    self.record(WorkEvent::Stopped { at: now }, &mut out);
                }
                self.state = LooperState::Stopped;
                self.open = None;
                out.notifications.push(LooperEvent::Stopped {
                    cycle_finished: false,
                    at: now,
                });
                info!("looper stopped");
            }
        }
        out
    }

    /// Rewind the cursor to the first time point.
    pub fn reset(&mut self) -> Result<(), LooperError> {
        if self.state != LooperState::Stopped {
            return Err(LooperError::NotStopped("reset"));
        }
        self.queue.reset();
        Ok(())
    }

    /// Pick the time point the next `start` will open.
    pub fn move_to(&mut self, id: TimePointId) -> Result<(), LooperError> {
        if self.state != LooperState::Stopped {
            return Err(LooperError::NotStopped("choose a time point"));
        }
        self.queue.move_to(id)?;
        Ok(())
    }

    /// Swap the time point list. The open interval keeps its own copy and is
    /// not touched.
    pub fn replace_time_points(&mut self, time_points: Vec<TimePoint>) {
        self.queue.replace(time_points);
    }

    pub fn set_wrap_around(&mut self, wrap_around: bool) {
        let queue = std::mem::take(&mut self.queue);
        self.queue = queue.with_wrap_around(wrap_around);
    }

    pub fn set_disable_skip_break(&mut self, disable: bool) {
        self.disable_skip_break = disable;
    }

    /// Switch the work item the ledger is recorded for.
    ///
    /// A running interval is split: the old work gets `Stopped`, the new one
    /// gets a started event for the same active time point.
    pub fn set_work(&mut self, now: DateTime<Utc>, work_id: Option<i64>) -> Outcome {
        if self.work_id == work_id {
            return Outcome::default();
        }
        // Boundaries crossed so far belong to the old work.
        let mut out = self.catch_up(now);
        if self.state == LooperState::Running {
            self.record(WorkEvent::Stopped { at: now }, &mut out);
        }
        self.work_id = work_id;
        if self.state == LooperState::Running {
            if let Some(open) = &self.open {
                let started = WorkEvent::started(&open.active, now);
                self.record(started, &mut out);
            }
        }
        out.notifications.push(LooperEvent::WorkChanged { work_id, at: now });
        out
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn open_interval(&mut self, tp: &TimePoint, at: DateTime<Utc>, out: &mut Outcome) {
        let active = ActiveTimePoint::from_time_point(tp, at);
        out.records.push(LedgerRecord::ActiveTimePoint(active.clone()));
        self.record(WorkEvent::started(&active, at), out);
        out.notifications.push(LooperEvent::TimePointStarted {
            active: active.clone(),
            cursor: self.queue.cursor(),
            at,
        });
        self.open = Some(OpenInterval {
            duration_ms: active.duration_ms,
            active,
            anchor: at,
            paused_elapsed_ms: None,
        });
    }

    /// Move to the next time point and open it at `at`.
    ///
    /// Returns `false` when the cycle ended instead (wrap-around off); the
    /// looper is stopped and rewound then.
    fn advance(&mut self, at: DateTime<Utc>, out: &mut Outcome) -> bool {
        if !self.queue.move_next() {
            self.record(WorkEvent::Stopped { at }, out);
            self.state = LooperState::Stopped;
            self.open = None;
            self.queue.reset();
            out.notifications.push(LooperEvent::Stopped {
                cycle_finished: true,
                at,
            });
            info!("cycle finished");
            return false;
        }
        match self.queue.current() {
            Ok(tp) => {
                let tp = tp.clone();
                self.open_interval(&tp, at, out);
                true
            }
            Err(e) => {
                warn!(error = %e, "queue emptied under a running interval");
                let stopped = self.stop(at);
                out.records.extend(stopped.records);
                out.notifications.extend(stopped.notifications);
                false
            }
        }
    }

    fn record(&self, event: WorkEvent, out: &mut Outcome) {
        if let Some(work_id) = self.work_id {
            out.records.push(LedgerRecord::WorkEvent { work_id, event });
        }
    }
}

fn adjusted_notification(open: &OpenInterval, now: DateTime<Utc>) -> LooperEvent {
    LooperEvent::DurationAdjusted {
        active_time_point_id: open.active.id,
        duration_ms: open.duration_ms,
        remaining_ms: open.duration_ms.saturating_sub(open.elapsed_ms(now)),
        at: now,
    }
}
