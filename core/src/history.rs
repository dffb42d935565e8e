//! Bounded ring buffer with drop counters and snapshot APIs
//!
//! Used for breaker transition audit trails and rolling probe histories.

use std::collections::VecDeque;

/// A bounded-capacity ring buffer of recent entries.
///
/// - When capacity is exceeded, the oldest entry is dropped and `total_dropped` is incremented.
/// - `total_pushed` counts every entry ever recorded.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    capacity: usize,
    total_dropped: u64,
    total_pushed: u64,
    entries: VecDeque<T>,
}

impl<T: Clone> BoundedHistory<T> {
    /// Create a new history with the given capacity (clamped to at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            total_dropped: 0,
            total_pushed: 0,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Push a new entry, evicting the oldest one if the buffer is full
    pub fn push(&mut self, entry: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.total_dropped = self.total_dropped.saturating_add(1);
        }
        self.entries.push_back(entry);
        self.total_pushed = self.total_pushed.saturating_add(1);
    }

    /// Current number of entries retained
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries retained
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of entries ever dropped due to capacity
    pub fn total_dropped(&self) -> u64 {
        self.total_dropped
    }

    /// Total number of entries ever pushed
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    /// Most recently pushed entry
    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Iterate retained entries, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Clone the retained entries, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_around_and_drop_count() {
        let mut history = BoundedHistory::new(3);
        assert!(history.is_empty());

        for value in ["a", "b", "c", "d", "e"] {
            history.push(value);
        }

        assert_eq!(history.len(), 3);
        assert_eq!(history.total_dropped(), 2);
        assert_eq!(history.total_pushed(), 5);
        assert_eq!(history.snapshot(), vec!["c", "d", "e"]);
        assert_eq!(history.latest(), Some(&"e"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut history = BoundedHistory::new(0);
        history.push(1);
        history.push(2);
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.snapshot(), vec![2]);
    }
}
