// SPDX-License-Identifier: Apache-2.0

//! Lock-free queue of parked worker indices.
//!
//! Invariant (spec §3, "Worker ready queue"): a worker index is present in
//! the queue *iff* that worker has observed an empty message queue and
//! suspended. Producers pop at most one index per enqueued message;
//! consumers push their own index immediately before suspending.
//!
//! Built on [`crossbeam_queue::ArrayQueue`], bounded by the worker pool's
//! `max` size since at most `max` distinct indices can ever be parked at
//! once — an unbounded queue would let a buggy caller push duplicates
//! without limit.

use crossbeam_queue::ArrayQueue;

/// A lock-free MPMC queue of `usize` worker indices.
pub struct ReadyQueue {
    queue: ArrayQueue<usize>,
}

impl ReadyQueue {
    /// Creates a ready queue sized to hold every worker index the pool could
    /// ever have parked simultaneously (`max` workers).
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        Self {
            queue: ArrayQueue::new(max_workers.max(1)),
        }
    }

    /// Pushes `index` onto the queue. Called by a worker immediately before
    /// it suspends on an empty message queue.
    ///
    /// Returns `false` if the queue is at capacity, which only happens if a
    /// caller pushes the same index twice without an intervening pop — a
    /// misuse of the contract, not an expected runtime condition.
    pub fn park(&self, index: usize) -> bool {
        self.queue.push(index).is_ok()
    }

    /// Pops at most one index, called by a producer after enqueuing a
    /// message. Returns `None` if no worker is currently parked.
    #[must_use]
    pub fn pop(&self) -> Option<usize> {
        self.queue.pop()
    }

    /// Removes `index` from the queue if it is present, requeuing every
    /// other entry popped along the way. Returns whether `index` was
    /// found. Used by a worker that is about to retire to evict its own
    /// stale registration rather than leave it for a later `post()` to
    /// pop and find nothing behind it.
    pub fn remove(&self, index: usize) -> bool {
        let mut displaced = Vec::new();
        let mut found = false;
        while let Some(candidate) = self.queue.pop() {
            if candidate == index {
                found = true;
                break;
            }
            displaced.push(candidate);
        }
        for candidate in displaced {
            let _ = self.queue.push(candidate);
        }
        found
    }

    /// Number of workers currently parked. Approximate under concurrent use.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if no worker is currently parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
