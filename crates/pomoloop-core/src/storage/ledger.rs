//! Ledger ports and the asynchronous writer.
//!
//! The looper never touches the store directly. It hands [`LedgerRecord`]s to
//! a [`LedgerWriter`], whose single background task persists them in the
//! order they were sent. A failed write is logged and queued as a notice; the
//! looper keeps its in-memory state either way.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::events::WorkEvent;
use crate::notice::ErrorNotices;
use crate::timer::{ActiveTimePoint, ActiveTimePointId, LedgerRecord};

/// A stored ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkEventRecord {
    /// Monotonic sequence number; insertion order.
    pub id: i64,
    pub work_id: i64,
    pub event: WorkEvent,
}

/// The work item a ledger stream belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Work {
    pub id: i64,
    pub number: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub trait WorkEventRepository: Send + Sync {
    /// Append one event to a work's stream.
    ///
    /// Refuses with `StorageError::Cancelled` when `cancel` already fired.
    fn insert_event(
        &self,
        work_id: i64,
        event: &WorkEvent,
        cancel: &CancellationToken,
    ) -> Result<i64, StorageError>;

    /// The full stream of a work, in insertion order.
    fn events_for_work(&self, work_id: i64) -> Result<Vec<WorkEventRecord>, StorageError>;

    /// Events of a work that happened in `[from, to)`.
    fn events_for_work_in_period(
        &self,
        work_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WorkEventRecord>, StorageError>;

    /// Events of every work that happened in `[from, to)`.
    fn events_in_period(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WorkEventRecord>, StorageError>;

    /// The newest event of a work strictly before `at`.
    fn last_event_before(
        &self,
        work_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<WorkEventRecord>, StorageError>;
}

pub trait ActiveTimePointRepository: Send + Sync {
    fn insert_active_time_point(
        &self,
        atp: &ActiveTimePoint,
        cancel: &CancellationToken,
    ) -> Result<(), StorageError>;

    fn active_time_point(&self, id: ActiveTimePointId) -> Result<Option<ActiveTimePoint>, StorageError>;

    fn active_time_points(&self) -> Result<Vec<ActiveTimePoint>, StorageError>;
}

pub trait WorkRepository: Send + Sync {
    fn create_work(&self, number: Option<&str>, title: &str) -> Result<Work, StorageError>;

    fn work(&self, id: i64) -> Result<Option<Work>, StorageError>;

    fn works(&self) -> Result<Vec<Work>, StorageError>;

    fn update_work(&self, id: i64, number: Option<&str>, title: &str) -> Result<Work, StorageError>;
}

/// Everything the ledger writer needs.
pub trait LedgerStore: WorkEventRepository + ActiveTimePointRepository {}

impl<T: WorkEventRepository + ActiveTimePointRepository> LedgerStore for T {}

fn persist(
    store: &dyn LedgerStore,
    record: &LedgerRecord,
    cancel: &CancellationToken,
) -> Result<(), StorageError> {
    match record {
        LedgerRecord::ActiveTimePoint(atp) => store.insert_active_time_point(atp, cancel),
        LedgerRecord::WorkEvent { work_id, event } => {
            store.insert_event(*work_id, event, cancel).map(|_| ())
        }
    }
}

/// Sending half of the ledger writer. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LedgerWriter {
    tx: mpsc::UnboundedSender<LedgerRecord>,
}

impl LedgerWriter {
    /// Queue a record. Never blocks.
    pub fn send(&self, record: LedgerRecord) -> Result<(), StorageError> {
        self.tx.send(record).map_err(|_| StorageError::WriterClosed)
    }
}

/// Spawn the writer task.
///
/// The task drains its queue and exits once every [`LedgerWriter`] is
/// dropped. Cancelling `cancel` stops it immediately; queued records are then
/// discarded.
pub fn spawn_writer(
    store: Arc<dyn LedgerStore>,
    notices: ErrorNotices,
    cancel: CancellationToken,
) -> (LedgerWriter, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<LedgerRecord>();

    let handle = tokio::spawn(async move {
        info!("ledger writer started");
        let mut written: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let mut dropped = 0usize;
                    while rx.try_recv().is_ok() {
                        dropped += 1;
                    }
                    if dropped > 0 {
                        warn!(dropped, "ledger writer cancelled with pending records");
                    }
                    break;
                }
                record = rx.recv() => {
                    let Some(record) = record else {
                        break;
                    };
                    let store = Arc::clone(&store);
                    let token = cancel.clone();
                    let job = tokio::task::spawn_blocking(move || {
                        let result = persist(store.as_ref(), &record, &token);
                        (record, result)
                    });
                    match job.await {
                        Ok((_, Ok(()))) => written += 1,
                        Ok((record, Err(e))) => {
                            warn!(error = %e, record = ?record, "ledger write failed");
                            notices.push(format!("Failed to save timer event: {e}"));
                        }
                        Err(e) => {
                            warn!(error = %e, "ledger write task failed");
                            notices.push(format!("Failed to save timer event: {e}"));
                        }
                    }
                }
            }
        }
        debug!(written, "ledger writer stopped");
    });

    (LedgerWriter { tx }, handle)
}
