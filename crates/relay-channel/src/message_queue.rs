// SPDX-License-Identifier: Apache-2.0

//! Multi-producer multi-consumer unbounded queue of decoded messages
//! (spec §3, "Message queue").
//!
//! Ordering across producers is unspecified; ordering of messages from the
//! same session is FIFO because each session's reader is single-threaded
//! and enqueues in the order frames arrive on the wire. Built on
//! [`crossbeam_queue::SegQueue`], a lock-free unbounded MPMC queue.

use crossbeam_queue::SegQueue;

/// Shared queue of items `T` (in practice, `DecodedMessage`).
pub struct MessageQueue<T> {
    queue: SegQueue<T>,
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    /// Pushes an item onto the queue. Never blocks, never fails.
    pub fn push(&self, item: T) {
        self.queue.push(item);
    }

    /// Pops the oldest item, if any.
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Approximate current length. Used by the autoscaler's backlog check,
    /// which only needs "non-empty vs. empty", not an exact count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if the queue currently holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_within_a_single_producer() {
        let q: MessageQueue<u32> = MessageQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn reports_length_and_emptiness() {
        let q: MessageQueue<u32> = MessageQueue::new();
        assert!(q.is_empty());
        q.push(42);
        assert_eq!(q.len(), 1);
        assert!(!q.is_empty());
    }
}
