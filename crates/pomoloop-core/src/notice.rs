//! Transient failure notices for the user.
//!
//! Background failures (a lost ledger write, a faulting tick) are logged and
//! also queued here so a front end can show them. Notices expire on their
//! own and can be dismissed earlier.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Oldest notices are dropped past this many.
pub const DEFAULT_CAPACITY: usize = 32;

/// How long a notice stays visible.
pub const NOTICE_TTL_SECS: i64 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub id: u64,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    items: VecDeque<Notice>,
}

/// Shared, bounded notice queue. Clones share the same queue.
#[derive(Debug, Clone)]
pub struct ErrorNotices {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
}

impl Default for ErrorNotices {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ErrorNotices {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Log `message` and queue it. Returns the notice id.
    pub fn push(&self, message: impl Into<String>) -> u64 {
        self.push_at(message, Utc::now())
    }

    pub fn push_at(&self, message: impl Into<String>, at: DateTime<Utc>) -> u64 {
        let message = message.into();
        error!("{message}");

        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.items.push_back(Notice { id, message, at });
        while inner.items.len() > self.capacity {
            inner.items.pop_front();
        }
        id
    }

    /// Notices still visible at `now`, oldest first. Expired ones are dropped.
    pub fn pending(&self, now: DateTime<Utc>) -> Vec<Notice> {
        let ttl = Duration::seconds(NOTICE_TTL_SECS);
        let mut inner = self.lock();
        inner.items.retain(|n| now - n.at < ttl);
        inner.items.iter().cloned().collect()
    }

    /// Take everything queued, expired or not.
    pub fn drain(&self) -> Vec<Notice> {
        self.lock().items.drain(..).collect()
    }

    /// Returns false when the notice was already gone.
    pub fn dismiss(&self, id: u64) -> bool {
        let mut inner = self.lock();
        let before = inner.items.len();
        inner.items.retain(|n| n.id != id);
        inner.items.len() != before
    }

    pub fn clear(&self) {
        self.lock().items.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
