//! Cursor-addressed sequence of time points.

use serde::{Deserialize, Serialize};

use super::time_point::{TimePoint, TimePointId};
use crate::error::LooperError;

/// Ordered time points plus a cursor.
///
/// The cursor is always a valid index unless the sequence is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimePointQueue {
    items: Vec<TimePoint>,
    cursor: usize,
    #[serde(default = "default_wrap_around")]
    wrap_around: bool,
}

fn default_wrap_around() -> bool {
    true
}

impl TimePointQueue {
    pub fn new(items: Vec<TimePoint>) -> Self {
        Self {
            items,
            cursor: 0,
            wrap_around: true,
        }
    }

    pub fn with_wrap_around(mut self, wrap_around: bool) -> Self {
        self.wrap_around = wrap_around;
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn current(&self) -> Result<&TimePoint, LooperError> {
        self.items.get(self.cursor).ok_or(LooperError::EmptyQueue)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn wrap_around(&self) -> bool {
        self.wrap_around
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimePoint> {
        self.items.iter()
    }

    pub fn position(&self, id: TimePointId) -> Option<usize> {
        self.items.iter().position(|tp| tp.id == id)
    }

    // ── Navigation ───────────────────────────────────────────────────

    /// Advance the cursor.
    ///
    /// Returns `false` when the queue is empty, or when the cursor is on the
    /// last element and wrap-around is off. The cursor does not move then.
    pub fn move_next(&mut self) -> bool {
        let len = self.items.len();
        if len == 0 {
            return false;
        }
        if self.cursor + 1 < len {
            self.cursor += 1;
            true
        } else if self.wrap_around {
            self.cursor = 0;
            true
        } else {
            false
        }
    }

    /// Step the cursor back, wrapping from the first element to the last.
    pub fn move_previous(&mut self) -> bool {
        let len = self.items.len();
        if len == 0 {
            return false;
        }
        if self.cursor > 0 {
            self.cursor -= 1;
            true
        } else if self.wrap_around {
            self.cursor = len - 1;
            true
        } else {
            false
        }
    }

    pub fn move_to(&mut self, id: TimePointId) -> Result<&TimePoint, LooperError> {
        let index = self
            .position(id)
            .ok_or(LooperError::UnknownTimePoint(id))?;
        self.cursor = index;
        Ok(&self.items[index])
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Swap in a new sequence.
    ///
    /// The cursor follows the current time point's id if it survived the
    /// change, otherwise it goes back to the start.
    pub fn replace(&mut self, items: Vec<TimePoint>) {
        let current_id = self.items.get(self.cursor).map(|tp| tp.id);
        self.items = items;
        self.cursor = current_id
            .and_then(|id| self.position(id))
            .unwrap_or(0);
    }
}

impl Default for TimePointQueue {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::time_point::Kind;
    use proptest::prelude::*;

    fn queue_of(n: usize) -> TimePointQueue {
        TimePointQueue::new(
            (0..n)
                .map(|i| TimePoint::new(format!("tp {i}"), Kind::Work, 60))
                .collect(),
        )
    }

    #[test]
    fn empty_queue_has_no_current() {
        let q = TimePointQueue::default();
        assert!(q.is_empty());
        assert_eq!(q.current().unwrap_err(), LooperError::EmptyQueue);
    }

    #[test]
    fn empty_queue_does_not_move() {
        let mut q = TimePointQueue::default();
        assert!(!q.move_next());
        assert!(!q.move_previous());
        assert_eq!(q.cursor(), 0);
    }

    #[test]
    fn move_previous_wraps_to_last() {
        let mut q = queue_of(3);
        assert!(q.move_previous());
        assert_eq!(q.cursor(), 2);
    }

    #[test]
    fn no_wrap_stops_at_end() {
        let mut q = queue_of(2).with_wrap_around(false);
        assert!(q.move_next());
        assert!(!q.move_next());
        assert_eq!(q.cursor(), 1);
        assert!(q.move_previous());
        assert!(!q.move_previous());
    }

    #[test]
    fn replace_keeps_cursor_on_surviving_time_point() {
        let mut q = queue_of(3);
        q.move_next();
        let current = q.current().unwrap().clone();

        let mut items: Vec<TimePoint> = q.iter().cloned().collect();
        items.insert(0, TimePoint::new("new head", Kind::Break, 30));
        q.replace(items);

        assert_eq!(q.cursor(), 2);
        assert_eq!(q.current().unwrap().id, current.id);
    }

    #[test]
    fn replace_resets_cursor_when_time_point_is_gone() {
        let mut q = queue_of(3);
        q.move_next();
        q.move_next();
        q.replace(queue_of(4).iter().cloned().collect());
        assert_eq!(q.cursor(), 0);
    }

    #[test]
    fn move_to_unknown_id_fails() {
        let mut q = queue_of(2);
        let id = uuid::Uuid::new_v4();
        assert_eq!(q.move_to(id).unwrap_err(), LooperError::UnknownTimePoint(id));
    }

    proptest! {
        #[test]
        fn move_next_is_modular(len in 1usize..20, steps in 0usize..200) {
            let mut q = queue_of(len);
            let ids: Vec<_> = q.iter().map(|tp| tp.id).collect();
            for _ in 0..steps {
                prop_assert!(q.move_next());
            }
            prop_assert_eq!(q.current().unwrap().id, ids[steps % len]);
        }

        #[test]
        fn next_then_previous_is_identity(len in 1usize..20, start in 0usize..20) {
            let mut q = queue_of(len);
            for _ in 0..(start % len) {
                q.move_next();
            }
            let before = q.cursor();
            q.move_next();
            q.move_previous();
            prop_assert_eq!(q.cursor(), before);
        }
    }
}
