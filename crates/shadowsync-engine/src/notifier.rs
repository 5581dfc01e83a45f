//! Prioritized notify queues
//!
//! The engine ingests path observations through two FIFO queues: `DirEvents`
//! for scan results and OS watcher events, `Retry` for paths whose last stat
//! failed transiently. Events are stamped with a decisecond clock; the drain
//! loop postpones events fresher than three deciseconds so partially written
//! files settle before they are fingerprinted. Scan-produced events bypass
//! the debounce (`immediate`), otherwise the initial scan would crawl in
//! 300 ms waves.

use std::collections::VecDeque;
use std::time::Instant;

use shadowsync_core::domain::NodeId;

/// Which queue an observation lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyQueue {
    /// Scan results and watcher events
    DirEvents = 0,
    /// Transiently failed stats awaiting re-check
    Retry = 1,
}

/// One queued path observation
#[derive(Debug, Clone)]
pub struct NotifyEvent {
    /// Node the path is relative to; `None` for absolute paths.
    /// A stale id (node destroyed since enqueue) skips the event.
    pub origin: Option<NodeId>,
    /// Path in local encoding
    pub path: Vec<u8>,
    /// Enqueue stamp in deciseconds; 0 for immediate events
    pub timestamp_ds: u64,
}

/// Monotonic decisecond clock
pub struct DsClock {
    start: Instant,
}

impl DsClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Deciseconds elapsed since the clock was created
    pub fn now_ds(&self) -> u64 {
        self.start.elapsed().as_millis() as u64 / 100
    }
}

impl Default for DsClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Two prioritized FIFO queues of path observations
pub struct DirNotifier {
    queues: [VecDeque<NotifyEvent>; 2],
    clock: DsClock,
}

impl DirNotifier {
    pub fn new() -> Self {
        Self {
            queues: [VecDeque::new(), VecDeque::new()],
            clock: DsClock::new(),
        }
    }

    /// Enqueues a path observation
    ///
    /// `immediate` events carry timestamp 0 and are never debounced.
    pub fn notify(
        &mut self,
        queue: NotifyQueue,
        origin: Option<NodeId>,
        path: Vec<u8>,
        immediate: bool,
    ) {
        let timestamp_ds = if immediate { 0 } else { self.clock.now_ds() };
        tracing::trace!(
            queue = ?queue,
            path_len = path.len(),
            immediate,
            "queued notification"
        );
        self.queues[queue as usize].push_back(NotifyEvent {
            origin,
            path,
            timestamp_ds,
        });
    }

    pub fn front(&self, queue: NotifyQueue) -> Option<&NotifyEvent> {
        self.queues[queue as usize].front()
    }

    pub fn pop(&mut self, queue: NotifyQueue) -> Option<NotifyEvent> {
        self.queues[queue as usize].pop_front()
    }

    pub fn len(&self, queue: NotifyQueue) -> usize {
        self.queues[queue as usize].len()
    }

    pub fn is_empty(&self, queue: NotifyQueue) -> bool {
        self.queues[queue as usize].is_empty()
    }

    /// Whether both queues are empty
    pub fn idle(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    /// Current decisecond stamp
    pub fn now_ds(&self) -> u64 {
        self.clock.now_ds()
    }
}

impl Default for DirNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_per_queue() {
        let mut n = DirNotifier::new();
        n.notify(NotifyQueue::DirEvents, None, b"/a".to_vec(), true);
        n.notify(NotifyQueue::DirEvents, None, b"/b".to_vec(), true);

        assert_eq!(n.pop(NotifyQueue::DirEvents).unwrap().path, b"/a");
        assert_eq!(n.pop(NotifyQueue::DirEvents).unwrap().path, b"/b");
        assert!(n.pop(NotifyQueue::DirEvents).is_none());
    }

    #[test]
    fn test_queues_are_independent() {
        let mut n = DirNotifier::new();
        n.notify(NotifyQueue::DirEvents, None, b"/a".to_vec(), true);
        n.notify(NotifyQueue::Retry, None, b"/b".to_vec(), true);

        assert_eq!(n.len(NotifyQueue::DirEvents), 1);
        assert_eq!(n.len(NotifyQueue::Retry), 1);
        assert!(!n.idle());

        n.pop(NotifyQueue::DirEvents);
        assert!(n.is_empty(NotifyQueue::DirEvents));
        assert!(!n.is_empty(NotifyQueue::Retry));
    }

    #[test]
    fn test_immediate_events_carry_zero_stamp() {
        let mut n = DirNotifier::new();
        n.notify(NotifyQueue::DirEvents, None, b"/a".to_vec(), true);
        assert_eq!(n.front(NotifyQueue::DirEvents).unwrap().timestamp_ds, 0);
    }

    #[test]
    fn test_debounced_events_carry_current_stamp() {
        let mut n = DirNotifier::new();
        n.notify(NotifyQueue::DirEvents, None, b"/a".to_vec(), false);
        let ts = n.front(NotifyQueue::DirEvents).unwrap().timestamp_ds;
        assert!(ts <= n.now_ds());
    }
}
