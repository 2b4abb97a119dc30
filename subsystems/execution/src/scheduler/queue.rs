//! # Wait Queue
//!
//! The suspended-thread queue. Strict FIFO: among threads suspended on the
//! same processor, resume order matches suspend order. No priority, no
//! aging.

use crate::ThreadId;
use alloc::collections::VecDeque;

/// Strict-FIFO queue of suspended threads
pub struct WaitQueue {
    queue: VecDeque<ThreadId>,
}

impl WaitQueue {
    /// Create a new empty queue
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Append a thread
    pub fn enqueue(&mut self, id: ThreadId) {
        self.queue.push_back(id);
    }

    /// Remove and return the front element.
    ///
    /// Faults on an empty queue: callers confirm non-emptiness first, so an
    /// empty dequeue is a contract breach, not an empty-result condition.
    pub fn dequeue(&mut self) -> ThreadId {
        self.queue
            .pop_front()
            .expect("wakeup from an empty wait queue")
    }

    /// The front element, if any
    pub fn peek(&self) -> Option<ThreadId> {
        self.queue.front().copied()
    }

    /// Remove every occurrence of a thread; returns whether any was present
    pub fn remove(&mut self, id: ThreadId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|&queued| queued != id);
        self.queue.len() != before
    }

    /// Whether a thread is queued
    pub fn contains(&self, id: ThreadId) -> bool {
        self.queue.iter().any(|&queued| queued == id)
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of queued threads
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> ThreadId {
        ThreadId::from_raw(raw)
    }

    #[test]
    fn dequeues_in_enqueue_order() {
        let mut q = WaitQueue::new();
        q.enqueue(id(1));
        q.enqueue(id(2));
        q.enqueue(id(3));
        assert_eq!(q.peek(), Some(id(1)));
        assert_eq!(q.dequeue(), id(1));
        assert_eq!(q.dequeue(), id(2));
        assert_eq!(q.dequeue(), id(3));
        assert!(q.is_empty());
    }

    #[test]
    fn remove_purges_every_occurrence() {
        let mut q = WaitQueue::new();
        q.enqueue(id(1));
        q.enqueue(id(2));
        q.enqueue(id(1));
        assert!(q.remove(id(1)));
        assert!(!q.contains(id(1)));
        assert_eq!(q.len(), 1);
        assert!(!q.remove(id(1)));
    }

    #[test]
    #[should_panic(expected = "empty wait queue")]
    fn empty_dequeue_faults() {
        WaitQueue::new().dequeue();
    }
}
