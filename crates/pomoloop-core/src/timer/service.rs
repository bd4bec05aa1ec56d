//! Threaded wrapper around [`Looper`].
//!
//! [`LooperService`] is the monitor: one mutex guards the state machine, the
//! clock is read under it, and whatever a command produced is dispatched
//! before the lock is released. Ledger records therefore reach the writer in
//! the order they happened, and subscribers see notifications in that same
//! order.
//!
//! [`LooperRuntime`] adds the background tasks: the ticker and the ledger
//! writer, plus an orderly shutdown.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::looper::{Looper, LooperState, Outcome};
use super::time_point::{validate_time_points, TimePoint, TimePointId};
use crate::error::{ConfigError, LooperError};
use crate::events::LooperEvent;
use crate::notice::ErrorNotices;
use crate::storage::{spawn_writer, LedgerStore, LedgerWriter};

/// Subscribers that fall further behind than this miss notifications.
const EVENT_CAPACITY: usize = 256;

/// How long shutdown waits for the ledger writer to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LooperService {
    looper: Mutex<Looper>,
    clock: Arc<dyn Clock>,
    ledger: Mutex<Option<LedgerWriter>>,
    events: broadcast::Sender<LooperEvent>,
    notices: ErrorNotices,
}

impl LooperService {
    /// Without a ledger writer nothing is persisted.
    pub fn new(
        looper: Looper,
        clock: Arc<dyn Clock>,
        ledger: Option<LedgerWriter>,
        notices: ErrorNotices,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            looper: Mutex::new(looper),
            clock,
            ledger: Mutex::new(ledger),
            events,
            notices,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LooperEvent> {
        self.events.subscribe()
    }

    pub fn notices(&self) -> &ErrorNotices {
        &self.notices
    }

    fn lock(&self) -> MutexGuard<'_, Looper> {
        self.looper.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a command under the lock and dispatch its outcome.
    ///
    /// Boundaries crossed since the last tick are dispatched first, so they
    /// reach the ledger even when the command itself is refused.
    fn apply<F>(&self, command: F) -> Result<(), LooperError>
    where
        F: FnOnce(&mut Looper, DateTime<Utc>) -> Result<Outcome, LooperError>,
    {
        let mut looper = self.lock();
        let now = self.clock.now();
        let caught_up = looper.catch_up(now);
        self.dispatch(caught_up);
        let outcome = command(&mut looper, now)?;
        self.dispatch(outcome);
        Ok(())
    }

    fn dispatch(&self, outcome: Outcome) {
        if !outcome.records.is_empty() {
            let ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
            match ledger.as_ref() {
                Some(writer) => {
                    for record in outcome.records {
                        if let Err(e) = writer.send(record) {
                            warn!(error = %e, "ledger record dropped");
                            self.notices.push(format!("Failed to save timer event: {e}"));
                            break;
                        }
                    }
                }
                None => debug!(count = outcome.records.len(), "no ledger attached"),
            }
        }
        for event in outcome.notifications {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn start(&self) -> Result<(), LooperError> {
        self.apply(|l, now| l.start(now))
    }

    pub fn stop(&self) {
        // stop() never fails
        let _ = self.apply(|l, now| Ok(l.stop(now)));
    }

    pub fn pause(&self) -> Result<(), LooperError> {
        self.apply(|l, now| l.pause(now))
    }

    pub fn resume(&self) -> Result<(), LooperError> {
        self.apply(|l, now| l.resume(now))
    }

    pub fn skip(&self) -> Result<(), LooperError> {
        self.apply(|l, now| l.skip(now))
    }

    pub fn increase(&self, by: Duration) -> Result<(), LooperError> {
        let delta = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.apply(|l, now| l.increase(now, delta))
    }

    pub fn reduce(&self, by: Duration) -> Result<(), LooperError> {
        let delta = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.apply(|l, now| l.reduce(now, delta))
    }

    pub fn reset(&self) -> Result<(), LooperError> {
        self.apply(|l, now| {
            l.reset()?;
            Ok(Outcome {
                records: Vec::new(),
                notifications: vec![l.snapshot(now)],
            })
        })
    }

    pub fn move_to(&self, id: TimePointId) -> Result<(), LooperError> {
        self.apply(|l, now| {
            l.move_to(id)?;
            Ok(Outcome {
                records: Vec::new(),
                notifications: vec![l.snapshot(now)],
            })
        })
    }

    pub fn set_work(&self, work_id: Option<i64>) {
        let _ = self.apply(|l, now| Ok(l.set_work(now, work_id)));
    }

    /// Swap the cycle. The open interval keeps running unchanged.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidTimePoints` and keeps the old cycle when
    /// the list does not validate.
    pub fn replace_time_points(&self, time_points: Vec<TimePoint>) -> Result<(), ConfigError> {
        validate_time_points(&time_points)?;
        let count = time_points.len();
        self.lock().replace_time_points(time_points);
        info!(count, "time points replaced");
        Ok(())
    }

    pub fn set_wrap_around(&self, wrap_around: bool) {
        self.lock().set_wrap_around(wrap_around);
    }

    pub fn set_disable_skip_break(&self, disable: bool) {
        self.lock().set_disable_skip_break(disable);
    }

    /// Check for expiry, or report the remaining time.
    pub fn tick(&self) {
        let _ = self.apply(|l, now| Ok(l.tick(now)));
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> LooperState {
        self.lock().state()
    }

    pub fn snapshot(&self) -> LooperEvent {
        let looper = self.lock();
        looper.snapshot(self.clock.now())
    }

    /// Broadcast a snapshot, e.g. for a subscriber that just joined.
    pub fn publish_snapshot(&self) {
        let looper = self.lock();
        let _ = self.events.send(looper.snapshot(self.clock.now()));
    }

    /// Read-only access to the state machine.
    pub fn with_looper<R>(&self, f: impl FnOnce(&Looper) -> R) -> R {
        f(&self.lock())
    }

    /// Detach the ledger writer. Later records are dropped.
    pub fn close_ledger(&self) {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    /// Tick every `period` until `cancel` fires.
    ///
    /// A tick that panics is logged and reported; the loop keeps going.
    pub fn spawn_ticker(self: &Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_ms = period.as_millis() as u64, "ticker started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("ticker cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        let result = std::panic::catch_unwind(AssertUnwindSafe(|| service.tick()));
                        if result.is_err() {
                            error!("tick panicked");
                            service.notices.push("Timer tick failed; the timer keeps running");
                        }
                    }
                }
            }
        })
    }
}

/// A running looper with its ticker and ledger writer.
pub struct LooperRuntime {
    service: Arc<LooperService>,
    ticker: JoinHandle<()>,
    ticker_cancel: CancellationToken,
    writer: Option<(JoinHandle<()>, CancellationToken)>,
}

impl LooperRuntime {
    /// Start the background tasks. Must be called inside a tokio runtime.
    pub fn spawn(
        looper: Looper,
        clock: Arc<dyn Clock>,
        store: Option<Arc<dyn LedgerStore>>,
        notices: ErrorNotices,
        tick_interval: Duration,
    ) -> Self {
        let (ledger, writer) = match store {
            Some(store) => {
                let cancel = CancellationToken::new();
                let (ledger, handle) = spawn_writer(store, notices.clone(), cancel.clone());
                (Some(ledger), Some((handle, cancel)))
            }
            None => (None, None),
        };
        let service = Arc::new(LooperService::new(looper, clock, ledger, notices));
        let ticker_cancel = CancellationToken::new();
        let ticker = service.spawn_ticker(tick_interval, ticker_cancel.clone());
        Self {
            service,
            ticker,
            ticker_cancel,
            writer,
        }
    }

    pub fn service(&self) -> &Arc<LooperService> {
        &self.service
    }

    /// Stop ticking, close the open interval, and flush the ledger.
    pub async fn shutdown(self) {
        self.ticker_cancel.cancel();
        if let Err(e) = self.ticker.await {
            warn!(error = %e, "ticker task failed");
        }

        self.service.stop();
        self.service.close_ledger();

        if let Some((mut handle, cancel)) = self.writer {
            match tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "ledger writer task failed"),
                Err(_) => {
                    warn!("ledger writer did not drain in time");
                    cancel.cancel();
                    let _ = handle.await;
                }
            }
        }
        info!("looper shut down");
    }
}
