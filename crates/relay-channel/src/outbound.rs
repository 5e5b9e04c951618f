// SPDX-License-Identifier: Apache-2.0

//! Bounded multi-producer single-consumer queue of outbound frames
//! (spec §3, "Session" — "one bounded multi-producer single-consumer write
//! queue of outbound frames").
//!
//! Producers are any thread calling [`Session::send`](../../relay_session/struct.Session.html)
//! (worker threads invoking handlers); the sole consumer is the session's
//! writer task. A full queue surfaces as [`crate::error::SendError::Full`]
//! rather than blocking the caller, matching spec §4.4's "never blocks the
//! caller" contract.

use crate::error::{RecvError, SendError};
use tokio::sync::mpsc;

/// Creates a bounded outbound queue with the given capacity.
#[must_use]
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Sender { tx }, Receiver { rx })
}

/// Producer half. Cheaply cloned; one clone per thread that calls `send`.
#[derive(Clone)]
pub struct Sender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Sender<T> {
    /// Enqueues `item` without blocking. Returns `Full` if the queue is at
    /// capacity, `Closed` if the writer task has already exited.
    pub fn try_send(&self, item: T) -> Result<(), SendError<T>> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(item) => SendError::Full(item),
            mpsc::error::TrySendError::Closed(item) => SendError::Closed(item),
        })
    }

    /// True once the receiver (writer task) has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned exclusively by the session's writer task.
pub struct Receiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Receiver<T> {
    /// Awaits the next outbound frame, or `Closed` once every sender has
    /// been dropped and the queue has drained.
    pub async fn recv(&mut self) -> Result<T, RecvError> {
        self.rx.recv().await.ok_or(RecvError::Closed)
    }

    /// Drains whatever is queued without waiting, for best-effort flush on
    /// shutdown (spec §4.4, writer contract: "drain any remaining entries
    /// best-effort, then terminate").
    pub fn try_recv(&mut self) -> Result<T, RecvError> {
        self.rx.try_recv().map_err(|e| match e {
            mpsc::error::TryRecvError::Empty => RecvError::Empty,
            mpsc::error::TryRecvError::Disconnected => RecvError::Closed,
        })
    }

    /// Closes the receiving half so further `try_send` calls observe
    /// `Closed` rather than `Full`.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_recv_preserves_order() {
        let (tx, mut rx) = channel::<u32>(4);
        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        assert_eq!(rx.recv().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn full_queue_surfaces_backpressure() {
        let (tx, _rx) = channel::<u32>(1);
        tx.try_send(1).unwrap();
        match tx.try_send(2) {
            Err(SendError::Full(2)) => {}
            other => panic!("expected Full(2), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_receiver_rejects_sends() {
        let (tx, rx) = channel::<u32>(4);
        drop(rx);
        match tx.try_send(1) {
            Err(SendError::Closed(1)) => {}
            other => panic!("expected Closed(1), got {other:?}"),
        }
    }
}
