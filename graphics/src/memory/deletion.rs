//! FIFO queue of items waiting for a frame watermark.

use std::collections::VecDeque;

/// Items paired with the frame index at which they may be destroyed.
///
/// Items are pushed with non-decreasing delete frames, so checking the front
/// is enough to find every due entry.
pub struct DeletionQueue<T> {
    entries: VecDeque<(T, u64)>,
}

impl<T> DeletionQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, item: T, delete_frame: u64) {
        debug_assert!(
            self.entries.back().is_none_or(|(_, last)| *last <= delete_frame),
            "delete frames must not decrease"
        );
        self.entries.push_back((item, delete_frame));
    }

    /// Pop every entry with `delete_frame <= frame_index`.
    pub(crate) fn pop_due(&mut self, frame_index: u64) -> Vec<T> {
        let mut due = Vec::new();
        while let Some((_, delete_frame)) = self.entries.front() {
            if *delete_frame > frame_index {
                break;
            }
            if let Some((item, _)) = self.entries.pop_front() {
                due.push(item);
            }
        }
        due
    }

    /// Largest pending delete frame.
    pub(crate) fn last_delete_frame(&self) -> Option<u64> {
        self.entries.back().map(|(_, frame)| *frame)
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_due_stops_at_first_pending() {
        let mut queue = DeletionQueue::new();
        queue.push("a", 3);
        queue.push("b", 3);
        queue.push("c", 5);

        assert!(queue.pop_due(2).is_empty());
        assert_eq!(queue.pop_due(3), vec!["a", "b"]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.last_delete_frame(), Some(5));
        assert_eq!(queue.pop_due(10), vec!["c"]);
        assert!(queue.is_empty());
    }
}
