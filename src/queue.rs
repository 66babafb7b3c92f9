//! The single-producer/single-consumer handshake queue between the command
//! processor and the child worker.
//!
//! Grounded on `session_mt.rs`'s worker wake-up pattern in the teacher
//! crate: a `parking_lot::Mutex` guarding the small bit of shared state plus
//! a `parking_lot::Condvar` used to wake the consumer, rather than a raw
//! semaphore. No long operation is ever held under the lock (spec.md §5).

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::workitem::WorkItem;

/// Ring depth. Chosen well above the worst-case backlog of one long-running
/// file op plus a few queued housekeeping-adjacent commands.
pub const CHILD_QUEUE_DEPTH: usize = 16;

struct Inner {
    items: VecDeque<WorkItem>,
    shutdown: bool,
}

/// Bounded SPSC work queue. The processor thread is the sole producer, the
/// worker thread the sole consumer (spec.md §5).
pub struct HandshakeQueue {
    depth: usize,
    inner: Mutex<Inner>,
    not_empty: Condvar,
}

impl HandshakeQueue {
    /// Build an empty queue with the given capacity.
    pub fn new(depth: usize) -> Self {
        HandshakeQueue {
            depth,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(depth),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Current queue_count gauge value.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// True if the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Try to enqueue `item`. Returns `Err(item)` (the item handed back,
    /// unconsumed) if the queue is full -- the processor never drops or
    /// overwrites an enqueued item; it rejects the *producing* command
    /// instead (spec.md §4.4).
    pub fn try_enqueue(&self, item: WorkItem) -> Result<(), WorkItem> {
        let mut inner = self.inner.lock();
        if inner.items.len() >= self.depth {
            return Err(item);
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until an item is available (or the queue is shut down), then
    /// pop it in FIFO order. Returns `None` on a shutdown wake with an
    /// empty queue -- the worker's cue to exit (spec.md §4.5 step 1).
    pub fn dequeue_blocking(&self) -> Option<WorkItem> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.shutdown {
                return None;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Wake the worker with an empty queue and ask it to exit once drained.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        drop(inner);
        self.not_empty.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::FmPath;

    fn item() -> WorkItem {
        WorkItem::Delete {
            path: FmPath::from_str("/ram/a.txt"),
            internal: false,
        }
    }

    #[test]
    fn fifo_order() {
        let q = HandshakeQueue::new(4);
        q.try_enqueue(WorkItem::Delete {
            path: FmPath::from_str("/ram/1"),
            internal: false,
        })
        .unwrap();
        q.try_enqueue(WorkItem::Delete {
            path: FmPath::from_str("/ram/2"),
            internal: false,
        })
        .unwrap();
        let first = q.dequeue_blocking().unwrap();
        match first {
            WorkItem::Delete { path, .. } => assert_eq!(path.as_str().unwrap(), "/ram/1"),
            _ => panic!(),
        }
    }

    #[test]
    fn rejects_when_full_without_dropping() {
        let q = HandshakeQueue::new(1);
        q.try_enqueue(item()).unwrap();
        let rejected = q.try_enqueue(item());
        assert!(rejected.is_err());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn shutdown_wakes_consumer_with_empty_queue() {
        let q = HandshakeQueue::new(4);
        q.shutdown();
        assert!(q.dequeue_blocking().is_none());
    }
}
