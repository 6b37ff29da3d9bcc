//! Delayed render events, ordered by fire time and cancellable by key.
//!
//! Events with equal deadlines fire in the order they were scheduled.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Events the render thread schedules for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderEvent {
    /// Pull buffers from the pool and schedule them
    CalculateFrame,
    RenderVideo,
    RenderAudio,
    /// Stream finished
    RenderEnd,
}

/// Identity of one scheduled event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerKey {
    deadline: Instant,
    seq: i64,
}

impl TimerKey {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: BTreeMap<TimerKey, RenderEvent>,
    next_seq: i64,
    /// Counts down so events jumped to the front sort ahead of everything
    next_front_seq: i64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `event` to fire `delay` after `now`
    pub fn schedule(&mut self, now: Instant, delay: Duration, event: RenderEvent) -> TimerKey {
        let key = TimerKey {
            deadline: now + delay,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, event);
        key
    }

    /// Schedule `event` ahead of every event already scheduled
    pub fn schedule_first(&mut self, now: Instant, event: RenderEvent) -> TimerKey {
        let deadline = self.next_deadline().map_or(now, |first| first.min(now));
        self.next_front_seq -= 1;
        let key = TimerKey {
            deadline,
            seq: self.next_front_seq,
        };
        self.entries.insert(key, event);
        key
    }

    /// Cancel one event. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, key: TimerKey) -> bool {
        self.entries.remove(&key).is_some()
    }

    /// Cancel every event matching `pred`, returning how many were dropped
    pub fn cancel_where(&mut self, mut pred: impl FnMut(RenderEvent) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, event| !pred(*event));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Earliest deadline, if anything is scheduled
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(TimerKey::deadline)
    }

    /// Remove and return the earliest event whose deadline is at or before `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerKey, RenderEvent)> {
        let (&key, _) = self.entries.iter().next()?;
        if key.deadline > now {
            return None;
        }
        self.entries.remove(&key).map(|event| (key, event))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of scheduled events of one kind
    pub fn count(&self, event: RenderEvent) -> usize {
        self.entries.values().filter(|e| **e == event).count()
    }

    /// Deadlines of every scheduled event of one kind, earliest first
    pub fn deadlines_of(&self, event: RenderEvent) -> Vec<Instant> {
        self.entries
            .iter()
            .filter(|(_, e)| **e == event)
            .map(|(k, _)| k.deadline)
            .collect()
    }
}
