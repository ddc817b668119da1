//! Bounded history of shown displays

use std::collections::VecDeque;

use tokio::time::Instant;

use super::request::DisplayRequest;

/// How a display reached the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowCause {
    /// Shown as soon as it was submitted
    Direct,
    /// System boot screen for starting apps
    BootScreen,
    /// Held during boot, shown when the boot screen ended
    BootFlush,
    /// Held by the throttle, shown when the interval lapsed
    ThrottleFlush,
    /// System-priority app took over the display
    Override,
    /// Re-shown after a boot screen or override ended
    Restore,
}

/// One shown display
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub request: DisplayRequest,
    pub shown_at: Instant,
    pub cause: ShowCause,
}

/// Ring buffer of the most recent shown displays
#[derive(Debug)]
pub struct DisplayHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl DisplayHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a shown display, evicting the oldest if full
    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entries from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let now = Instant::now();
        let mut history = DisplayHistory::with_capacity(2);

        for text in ["a", "b", "c"] {
            history.push(HistoryEntry {
                request: DisplayRequest::text("com.a", text, now),
                shown_at: now,
                cause: ShowCause::Direct,
            });
        }

        let texts: Vec<_> = history
            .iter()
            .filter_map(|e| e.request.layout.text())
            .collect();
        assert_eq!(texts, ["b", "c"]);
        assert_eq!(history.last().unwrap().request.layout.text(), Some("c"));
    }
}
