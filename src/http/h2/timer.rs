//! One-shot stream timers
//!
//! Each session owns a `TimerQueue`. The event loop sleeps until the earliest
//! deadline and then hands the expired stream IDs back to their handlers.

use super::stream::StreamId;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Min-heap of (deadline, arming order, stream)
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, StreamId)>>,
    seq: u64,
}

impl TimerQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer for `stream_id` that expires `delay` from now
    pub fn arm(&mut self, stream_id: StreamId, delay: Duration) {
        self.arm_at(stream_id, Instant::now() + delay);
    }

    /// Arm a timer with an absolute deadline
    pub fn arm_at(&mut self, stream_id: StreamId, deadline: Instant) {
        self.seq += 1;
        self.heap.push(Reverse((deadline, self.seq, stream_id)));
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    /// Time left until the earliest deadline, zero if already due
    pub fn poll_timeout(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Remove and return every timer due at `now`, earliest first
    ///
    /// Timers with equal deadlines come out in the order they were armed.
    pub fn expired(&mut self, now: Instant) -> Vec<StreamId> {
        let mut due = Vec::new();
        while let Some(Reverse((deadline, _, _))) = self.heap.peek() {
            if *deadline > now {
                break;
            }
            if let Some(Reverse((_, _, stream_id))) = self.heap.pop() {
                due.push(stream_id);
            }
        }
        due
    }

    /// Number of pending timers
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True when no timer is pending
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_in_deadline_order() {
        let mut timers = TimerQueue::new();
        let base = Instant::now();

        timers.arm_at(5, base + Duration::from_secs(10));
        timers.arm_at(1, base + Duration::from_secs(5));
        timers.arm_at(3, base + Duration::from_secs(7));

        assert_eq!(timers.next_deadline(), Some(base + Duration::from_secs(5)));
        assert!(timers.expired(base).is_empty());

        assert_eq!(timers.expired(base + Duration::from_secs(8)), vec![1, 3]);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.expired(base + Duration::from_secs(10)), vec![5]);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_equal_deadlines_keep_arming_order() {
        let mut timers = TimerQueue::new();
        let at = Instant::now();

        timers.arm_at(9, at);
        timers.arm_at(3, at);
        timers.arm_at(7, at);

        assert_eq!(timers.expired(at), vec![9, 3, 7]);
    }

    #[test]
    fn test_poll_timeout() {
        let mut timers = TimerQueue::new();
        let now = Instant::now();
        assert_eq!(timers.poll_timeout(now), None);

        timers.arm_at(1, now + Duration::from_millis(250));
        assert_eq!(timers.poll_timeout(now), Some(Duration::from_millis(250)));
        assert_eq!(
            timers.poll_timeout(now + Duration::from_secs(1)),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_same_stream_may_hold_several_timers() {
        let mut timers = TimerQueue::new();
        timers.arm(1, Duration::ZERO);
        timers.arm(1, Duration::ZERO);
        assert_eq!(timers.expired(Instant::now()), vec![1, 1]);
    }
}
