// SPDX-License-Identifier: Apache-2.0

//! Lock-free and bounded channel primitives shared by the proactor, session,
//! and worker layers.
//!
//! - [`ready_queue`] — the lock-free queue of parked worker indices (spec §3,
//!   "Worker ready queue").
//! - [`message_queue`] — the unbounded MPMC queue of decoded messages handed
//!   from sessions to the worker pool (spec §3, "Message queue").
//! - [`outbound`] — the bounded MPSC queue backing a session's per-connection
//!   write queue (spec §4.4).

pub mod error;
pub mod message_queue;
pub mod outbound;
pub mod ready_queue;
