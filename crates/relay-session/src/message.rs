// SPDX-License-Identifier: Apache-2.0

//! The message types that cross the session ↔ worker-pool boundary
//! (spec §3, "Decoded message" and "Outbound message").

use crate::SessionHandle;
use bytes::Bytes;

/// A fully decoded inbound frame, owned exclusively by its queue slot until
/// a worker pops and consumes it.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    /// Message-id from the frame header.
    pub id: u16,
    /// Declared body length (equals `payload.len()`).
    pub length: i64,
    /// Owned body bytes, exactly `length` long.
    pub payload: Bytes,
    /// The session this frame arrived on.
    pub session: SessionHandle,
}

/// A fully encoded outbound frame, built by [`crate::Session::send`] and
/// moved into the session's write queue for the writer task to emit
/// verbatim.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Message-id from the header.
    pub id: u16,
    /// Body length (equals `framed_buffer.len() - 10`).
    pub length: i64,
    /// Header-prepended, ready-to-write buffer.
    pub framed_buffer: Bytes,
}

/// Where a session's reader hands off each [`DecodedMessage`] it produces.
/// Implemented by the worker pool (C5); kept as a trait here so this crate
/// has no dependency on the worker pool's queue and autoscaler internals.
pub trait MessageSink: Send + Sync {
    /// Publishes `message` for a worker to eventually pop and dispatch.
    fn post(&self, message: DecodedMessage);
}

/// Lets a [`crate::Session`] remove itself from the server's session table
/// on close without holding a strong reference back to the server (spec
/// §9, "Session ↔ Server back-reference").
pub trait Deregister: Send + Sync {
    /// Removes the session identified by `id` from whatever table owns it.
    fn deregister(&self, id: crate::SessionId);
}
