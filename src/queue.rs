// Bounded FIFO used for the window handoff and the outbound control queue.
//
// Overflow is resolved by an explicit policy and every drop is counted, so a
// slow consumer shows up in the metrics instead of as unbounded growth.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

/// What a full queue does with a new item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued item to make room.
    DropOldest,
    /// Wait up to `timeout_ms` for room, then reject the new item.
    Block { timeout_ms: u64 },
}

/// Result of a single push.
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome<T> {
    Accepted,
    /// The item was queued after evicting the oldest one.
    DroppedOldest,
    /// No room appeared within the block timeout; the item is handed back.
    TimedOut(T),
    /// The queue was closed; the item is handed back.
    Closed(T),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub total_pushed: u64,
    pub total_popped: u64,
    pub dropped_oldest: u64,
    pub timed_out: u64,
    pub current_size: usize,
    pub peak_size: usize,
    pub capacity: usize,
}

impl QueueMetrics {
    pub fn total_dropped(&self) -> u64 {
        self.dropped_oldest + self.timed_out
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
    total_pushed: AtomicU64,
    total_popped: AtomicU64,
    dropped_oldest: AtomicU64,
    timed_out: AtomicU64,
    peak_size: AtomicUsize,
}

impl<T> BoundedQueue<T> {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            policy,
            total_pushed: AtomicU64::new(0),
            total_popped: AtomicU64::new(0),
            dropped_oldest: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            peak_size: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, item: T) -> PushOutcome<T> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return PushOutcome::Closed(item);
        }
        let mut outcome = PushOutcome::Accepted;
        if inner.items.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    inner.items.pop_front();
                    self.dropped_oldest.fetch_add(1, Ordering::Relaxed);
                    outcome = PushOutcome::DroppedOldest;
                }
                OverflowPolicy::Block { timeout_ms } => {
                    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
                    while inner.items.len() >= self.capacity && !inner.closed {
                        if self.not_full.wait_until(&mut inner, deadline).timed_out() {
                            break;
                        }
                    }
                    if inner.closed {
                        return PushOutcome::Closed(item);
                    }
                    if inner.items.len() >= self.capacity {
                        self.timed_out.fetch_add(1, Ordering::Relaxed);
                        return PushOutcome::TimedOut(item);
                    }
                }
            }
        }
        inner.items.push_back(item);
        self.total_pushed.fetch_add(1, Ordering::Relaxed);
        self.peak_size.fetch_max(inner.items.len(), Ordering::Relaxed);
        drop(inner);
        self.not_empty.notify_one();
        outcome
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.inner.lock().items.pop_front();
        self.after_pop(item)
    }

    /// Waits up to `timeout` for an item. Returns `None` on timeout or once the
    /// queue is closed and drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.items.is_empty() && !inner.closed {
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        let item = inner.items.pop_front();
        drop(inner);
        self.after_pop(item)
    }

    /// Waits until an item arrives or the queue is closed and drained.
    pub fn pop_blocking(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        while inner.items.is_empty() && !inner.closed {
            self.not_empty.wait(&mut inner);
        }
        let item = inner.items.pop_front();
        drop(inner);
        self.after_pop(item)
    }

    /// Rejects further pushes and wakes every waiter. Queued items can still
    /// be drained.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            total_pushed: self.total_pushed.load(Ordering::Relaxed),
            total_popped: self.total_popped.load(Ordering::Relaxed),
            dropped_oldest: self.dropped_oldest.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            current_size: self.len(),
            peak_size: self.peak_size.load(Ordering::Relaxed),
            capacity: self.capacity,
        }
    }

    fn after_pop(&self, item: Option<T>) -> Option<T> {
        if item.is_some() {
            self.total_popped.fetch_add(1, Ordering::Relaxed);
            self.not_full.notify_one();
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn drop_oldest_keeps_newest_items_in_order() {
        let queue = BoundedQueue::new(3, OverflowPolicy::DropOldest);
        for i in 0..5 {
            queue.push(i);
        }
        let drained: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(drained, vec![2, 3, 4]);
        let metrics = queue.metrics();
        assert_eq!(metrics.dropped_oldest, 2);
        assert_eq!(metrics.total_pushed, 5);
        assert_eq!(metrics.total_popped, 3);
        assert_eq!(metrics.peak_size, 3);
    }

    #[test]
    fn block_times_out_and_rejects_newest() {
        let queue = BoundedQueue::new(1, OverflowPolicy::Block { timeout_ms: 10 });
        assert_eq!(queue.push(1), PushOutcome::Accepted);
        assert_eq!(queue.push(2), PushOutcome::TimedOut(2));
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), None);
        assert_eq!(queue.metrics().timed_out, 1);
    }

    #[test]
    fn block_succeeds_once_consumer_makes_room() {
        let queue = Arc::new(BoundedQueue::new(1, OverflowPolicy::Block { timeout_ms: 2_000 }));
        queue.push(1);
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.try_pop()
            })
        };
        assert_eq!(queue.push(2), PushOutcome::Accepted);
        assert_eq!(consumer.join().unwrap(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.metrics().total_dropped(), 0);
    }

    #[test]
    fn close_drains_then_ends_blocking_pop() {
        let queue = BoundedQueue::new(4, OverflowPolicy::DropOldest);
        queue.push("a");
        queue.close();
        assert_eq!(queue.push("b"), PushOutcome::Closed("b"));
        assert_eq!(queue.pop_blocking(), Some("a"));
        assert_eq!(queue.pop_blocking(), None);
    }

    #[test]
    fn pop_timeout_returns_none_when_idle() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(2, OverflowPolicy::DropOldest);
        assert_eq!(queue.pop_timeout(Duration::from_millis(5)), None);
    }
}
