//! Keyed, cancellable scheduler timers
//!
//! Timers are plain deadlines owned by the scheduler. The session task sleeps
//! until [`Timers::next_deadline`] and then hands control back to the
//! scheduler, so a timer can only ever fire inside its own session's
//! sequential context. Cancelling a timer is removing its key; dropping the
//! scheduler drops every pending timer with it.

use std::collections::HashMap;

use tokio::time::Instant;

use crate::protocol::PackageName;

/// Purpose of a scheduled deadline
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// End of the boot screen
    Boot,
    /// Flush of one app's throttle slot
    Throttle(PackageName),
    /// Auto-clear of the active display
    AutoClear,
}

/// Pending deadlines, at most one per kind
#[derive(Debug, Default)]
pub struct Timers {
    deadlines: HashMap<TimerKind, Instant>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule (or reschedule) a timer; returns the deadline it replaced
    pub fn schedule(&mut self, kind: TimerKind, at: Instant) -> Option<Instant> {
        self.deadlines.insert(kind, at)
    }

    /// Schedule a timer only if none of this kind is pending
    pub fn schedule_if_absent(&mut self, kind: TimerKind, at: Instant) -> bool {
        if self.deadlines.contains_key(&kind) {
            return false;
        }
        self.deadlines.insert(kind, at);
        true
    }

    /// Cancel a timer; returns whether it was pending
    pub fn cancel(&mut self, kind: &TimerKind) -> bool {
        self.deadlines.remove(kind).is_some()
    }

    pub fn deadline(&self, kind: &TimerKind) -> Option<Instant> {
        self.deadlines.get(kind).copied()
    }

    pub fn is_scheduled(&self, kind: &TimerKind) -> bool {
        self.deadlines.contains_key(kind)
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return the earliest timer due at `now`
    ///
    /// Ties are broken by kind so firing order is deterministic.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerKind, Instant)> {
        let kind = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .min_by(|(ka, a), (kb, b)| a.cmp(b).then_with(|| ka.cmp(kb)))
            .map(|(kind, _)| kind.clone())?;

        self.deadlines.remove(&kind).map(|at| (kind, at))
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Cancel everything
    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_pop_due_in_deadline_order() {
        let t0 = Instant::now();
        let mut timers = Timers::new();
        timers.schedule(TimerKind::AutoClear, t0 + Duration::from_millis(30));
        timers.schedule(TimerKind::Boot, t0 + Duration::from_millis(10));
        timers.schedule(
            TimerKind::Throttle("com.a".into()),
            t0 + Duration::from_millis(20),
        );

        assert_eq!(timers.next_deadline(), Some(t0 + Duration::from_millis(10)));
        assert!(timers.pop_due(t0).is_none());

        let now = t0 + Duration::from_millis(25);
        assert_eq!(timers.pop_due(now).map(|(k, _)| k), Some(TimerKind::Boot));
        assert_eq!(
            timers.pop_due(now).map(|(k, _)| k),
            Some(TimerKind::Throttle("com.a".into()))
        );
        assert!(timers.pop_due(now).is_none());
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_schedule_if_absent_preserves_deadline() {
        let t0 = Instant::now();
        let mut timers = Timers::new();
        let kind = TimerKind::Throttle("com.a".into());

        assert!(timers.schedule_if_absent(kind.clone(), t0 + Duration::from_millis(100)));
        assert!(!timers.schedule_if_absent(kind.clone(), t0 + Duration::from_millis(500)));
        assert_eq!(timers.deadline(&kind), Some(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn test_cancel_and_clear() {
        let t0 = Instant::now();
        let mut timers = Timers::new();
        timers.schedule(TimerKind::Boot, t0);
        timers.schedule(TimerKind::AutoClear, t0);

        assert!(timers.cancel(&TimerKind::Boot));
        assert!(!timers.cancel(&TimerKind::Boot));
        timers.clear();
        assert!(timers.is_empty());
        assert!(timers.pop_due(t0 + Duration::from_secs(1)).is_none());
    }
}
